//! credential bootstrap
//! seeds device storage with the root CAs, device certificate, device key and configuration record

use std::fs;

use crate::common::error::{DeviceClientError, ErrorCode};
use crate::common::setting::Bootstrap;
use crate::common::storage::{
    Storage, CONFIG_FILE_PATH, DEVICE_CERT_PATH, DEVICE_KEY_PATH, ROOT_CA_PATH, ROOT_CA_ROTATED_PATH,
};
use crate::common::transport::Transport;
use crate::{info, warn};

const LOG_TAG: &str = "credential";

/// blobs to place into storage, `None` leaves the stored file untouched
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CredentialBundle {
    pub root_ca: Option<Vec<u8>>,
    pub root_ca_rotated: Option<Vec<u8>>,
    pub device_cert: Option<Vec<u8>>,
    pub device_key: Option<Vec<u8>>,
    pub config: Option<Vec<u8>>,
}

impl CredentialBundle {
    /// read the bundle from the host files named in the settings, unreadable files are skipped
    pub fn from_settings(bootstrap: &Bootstrap) -> Self {
        CredentialBundle {
            root_ca: read_host_file(&bootstrap.root_ca),
            root_ca_rotated: read_host_file(&bootstrap.root_ca_rotated),
            device_cert: read_host_file(&bootstrap.device_cert),
            device_key: read_host_file(&bootstrap.device_key),
            config: read_host_file(&bootstrap.device_config),
        }
    }

    fn entries(&self) -> [(&'static str, Option<&Vec<u8>>); 5] {
        [
            (ROOT_CA_PATH, self.root_ca.as_ref()),
            (ROOT_CA_ROTATED_PATH, self.root_ca_rotated.as_ref()),
            (DEVICE_CERT_PATH, self.device_cert.as_ref()),
            (DEVICE_KEY_PATH, self.device_key.as_ref()),
            (CONFIG_FILE_PATH, self.config.as_ref()),
        ]
    }
}

fn read_host_file(path: &str) -> Option<Vec<u8>> {
    match fs::read(path) {
        Ok(data) => Some(data),
        Err(e) => {
            warn!(LOG_TAG, "bootstrap file {} not readable, skipped: {}", path, e);
            None
        }
    }
}

/// outcome of one bootstrap, every write is reported separately
#[derive(Debug, Default)]
pub struct BootstrapReport {
    pub written: Vec<&'static str>,
    pub skipped: Vec<&'static str>,
    pub failed: Vec<(&'static str, DeviceClientError)>,
}

impl BootstrapReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// write the bundle to storage
/// the network session is left first since the module needs exclusive storage access
pub fn write_credentials(
    transport: &mut impl Transport,
    storage: &mut impl Storage,
    bundle: &CredentialBundle,
) -> BootstrapReport {
    if let Err(e) = transport.leave_network() {
        warn!(LOG_TAG, "leave network before writing credentials failed: {}", e);
    }

    let mut report = BootstrapReport::default();
    for (path, data) in bundle.entries() {
        let Some(data) = data else {
            report.skipped.push(path);
            continue;
        };
        match storage.write(path, data) {
            Ok(()) => report.written.push(path),
            Err(e) => {
                warn!(LOG_TAG, "writing {} failed: {}", path, e);
                report.failed.push((path, e));
            }
        }
    }

    info!(
        LOG_TAG,
        "credential bootstrap done, written: {}, skipped: {}, failed: {}",
        report.written.len(),
        report.skipped.len(),
        report.failed.len()
    );
    report
}

/// the three files provisioning cannot run without
pub fn check_required(storage: &impl Storage) -> Result<(), DeviceClientError> {
    let missing: Vec<&str> = [ROOT_CA_PATH, DEVICE_CERT_PATH, DEVICE_KEY_PATH]
        .into_iter()
        .filter(|path| !storage.exists(path))
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(DeviceClientError::new(
            ErrorCode::CredentialMissing,
            format!("missing credential files: {}", missing.join(", ")),
        ))
    }
}
