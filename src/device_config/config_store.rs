//! config store
//! loads the versioned device configuration record from storage
//! - the first field selects the deployment mode
//! - remaining fields are consumed in a fixed order per version
//! - any missing or mistyped field rejects the whole record

use serde_json::Value;

use crate::common::error::{DeviceClientError, ErrorCode};
use crate::common::storage::{Storage, CONFIG_FILE_PATH, DEVICE_CERT_PATH, DEVICE_KEY_PATH, ROOT_CA_ROTATED_PATH};
use crate::common::transport::{TlsMethod, TransportSecurity};
use crate::entity::bo::device_config_bo::{ConfigVersion, DeploymentMode, DeviceConfig, NetworkSettings};
use crate::util::json::field_at;
use crate::{info, warn};

const LOG_TAG: &str = "config_store";

pub const MQTT_CIPHER: &str = "TLS_RSA_WITH_AES_128_CBC_SHA256";

/// fixed security parameters of every broker connection
pub fn device_security() -> TransportSecurity {
    TransportSecurity {
        method: TlsMethod::Tlsv1_2,
        cipher: MQTT_CIPHER.to_string(),
        ca_file: ROOT_CA_ROTATED_PATH.to_string(),
        certificate_file: DEVICE_CERT_PATH.to_string(),
        private_key_file: DEVICE_KEY_PATH.to_string(),
    }
}

/// load the configuration record, on success `security` is reset to the device defaults
pub fn load(storage: &impl Storage, security: &mut TransportSecurity) -> Result<DeviceConfig, DeviceClientError> {
    if !storage.exists(CONFIG_FILE_PATH) {
        return Err(DeviceClientError::new(ErrorCode::ConfigMissing, format!("{CONFIG_FILE_PATH} not found")));
    }
    let data = storage.read(CONFIG_FILE_PATH)?;
    let config = parse(&data).map_err(|e| {
        warn!(LOG_TAG, "loading config file failed: {}", e);
        e
    })?;
    info!(LOG_TAG, "loaded {:?} config for device {}", config.version(), config.device_id);

    *security = device_security();
    Ok(config)
}

/// decode a configuration record
pub fn parse(data: &[u8]) -> Result<DeviceConfig, DeviceClientError> {
    let record: Value = serde_json::from_slice(data).map_err(|e| {
        DeviceClientError::new(ErrorCode::ConfigMalformed, format!("unable to parse config file: {e}"))
    })?;
    if !record.is_object() {
        return Err(DeviceClientError::new(ErrorCode::ConfigMalformed, "config file is not an object"));
    }

    let version = field_at(&record, 0)
        .and_then(|(_, value)| value.as_i64())
        .and_then(ConfigVersion::from_i64)
        .ok_or_else(|| DeviceClientError::new(ErrorCode::ConfigUnsupportedVersion, "wrong config file version"))?;

    let mut reader = FieldReader { record: &record, index: 1 };
    let device_id = reader.next_str("deviceId")?;
    let mode = match version {
        ConfigVersion::ProvisioningMediated => DeploymentMode::ProvisioningMediated {
            scope_id: reader.next_str("scopeId")?,
            dps_address: reader.next_str("DPSServer")?,
            model_id: reader.next_str("modelId")?,
        },
        ConfigVersion::HubDirect => DeploymentMode::HubDirect {
            endpoint: reader.next_str("endpoint")?,
        },
    };
    let network = NetworkSettings {
        ntp_server: reader.next_str("SNTPServer")?,
        timezone: reader.next_str("timezone")?,
        wifi_ssid: reader.next_str("WiFiSSID")?,
        wifi_key: reader.next_str("WiFiPassword")?,
        wifi_security_type: reader.next_int("WiFiSecurity")?,
    };

    Ok(DeviceConfig { device_id, mode, network })
}

/// walks the record fields in order, names only label errors
struct FieldReader<'a> {
    record: &'a Value,
    index: usize,
}

impl<'a> FieldReader<'a> {
    fn next(&mut self, expected: &str) -> Result<&'a Value, DeviceClientError> {
        let (_, value) = field_at(self.record, self.index).ok_or_else(|| {
            DeviceClientError::new(ErrorCode::ConfigMalformed, format!("field {} ({expected}) missing", self.index))
        })?;
        self.index += 1;
        Ok(value)
    }

    fn next_str(&mut self, expected: &str) -> Result<String, DeviceClientError> {
        let index = self.index;
        self.next(expected)?.as_str().map(str::to_string).ok_or_else(|| {
            DeviceClientError::new(ErrorCode::ConfigMalformed, format!("field {index} ({expected}) is not a string"))
        })
    }

    fn next_int(&mut self, expected: &str) -> Result<i64, DeviceClientError> {
        let index = self.index;
        self.next(expected)?.as_i64().ok_or_else(|| {
            DeviceClientError::new(ErrorCode::ConfigMalformed, format!("field {index} ({expected}) is not an integer"))
        })
    }
}
