//! device file storage
//! credential files and persisted records live under fixed relative paths

use std::fs;
use std::path::{Path, PathBuf};

use super::error::{DeviceClientError, ErrorCode};
use crate::debug;

const LOG_TAG: &str = "storage";

/// root CA the broker is known to trust, also the fallback when the rotated CA is refused
pub const ROOT_CA_PATH: &str = "user/azrootca";
/// rotated root CA, tried first on every connect
pub const ROOT_CA_ROTATED_PATH: &str = "user/azrootca1";
pub const DEVICE_CERT_PATH: &str = "user/azdevcert";
pub const DEVICE_KEY_PATH: &str = "user/azdevkey";
/// resolved hub address, its presence marks the device as provisioned
pub const HUB_ADDRESS_PATH: &str = "user/iotHubAddr";
pub const CONFIG_FILE_PATH: &str = "user/azdevconf";

/// file operations offered by the connectivity module
pub trait Storage {
    fn exists(&self, path: &str) -> bool;

    fn read(&self, path: &str) -> Result<Vec<u8>, DeviceClientError>;

    fn write(&mut self, path: &str, data: &[u8]) -> Result<(), DeviceClientError>;

    fn delete(&mut self, path: &str) -> Result<(), DeviceClientError>;

    /// read a record as utf-8 text, trailing whitespace removed
    fn read_string(&self, path: &str) -> Result<String, DeviceClientError> {
        let data = self.read(path)?;
        let text = String::from_utf8(data).map_err(|e| {
            DeviceClientError::new(ErrorCode::StorageError, format!("{path} is not utf-8: {e}"))
        })?;
        Ok(text.trim_end().to_string())
    }
}

/// storage backed by a directory on the host file system
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl AsRef<Path>) -> Result<Self, DeviceClientError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root).map_err(|e| {
            DeviceClientError::new(ErrorCode::StorageError, format!("create dir {} error: {e}", root.display()))
        })?;
        Ok(FsStorage { root })
    }

    /// absolute location of a storage path, used to hand credential files to the TLS layer
    pub fn resolve(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
}

impl Storage for FsStorage {
    fn exists(&self, path: &str) -> bool {
        self.resolve(path).is_file()
    }

    fn read(&self, path: &str) -> Result<Vec<u8>, DeviceClientError> {
        fs::read(self.resolve(path)).map_err(|e| {
            DeviceClientError::new(ErrorCode::StorageError, format!("read {path} error: {e}"))
        })
    }

    fn write(&mut self, path: &str, data: &[u8]) -> Result<(), DeviceClientError> {
        let full_path = self.resolve(path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                DeviceClientError::new(ErrorCode::StorageError, format!("create dir for {path} error: {e}"))
            })?;
        }
        fs::write(&full_path, data).map_err(|e| {
            DeviceClientError::new(ErrorCode::StorageError, format!("write {path} error: {e}"))
        })?;
        debug!(LOG_TAG, "wrote {} bytes to {}", data.len(), path);
        Ok(())
    }

    fn delete(&mut self, path: &str) -> Result<(), DeviceClientError> {
        fs::remove_file(self.resolve(path)).map_err(|e| {
            DeviceClientError::new(ErrorCode::StorageError, format!("delete {path} error: {e}"))
        })
    }
}
