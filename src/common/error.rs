use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorCode {
    // configuration record does not exist in storage
    ConfigMissing = 1001,
    // first field of the configuration record is not a known version
    ConfigUnsupportedVersion = 1002,
    // configuration field missing or of the wrong type
    ConfigMalformed = 1003,
    // root CA, device certificate or device key absent
    CredentialMissing = 1004,
    // broker connection could not be established
    ConnectFailure = 1005,
    // broker rejected the configured root CA
    WrongRootCa = 1006,
    // operation needs an established broker connection
    NotConnected = 1007,
    PublishFailure = 1008,
    SubscribeFailure = 1009,
    // broker payload empty or not the expected shape
    ParseError = 1010,
    // desired value or command argument out of range
    ValidationError = 1011,
    StorageError = 1012,
}

/// error raised by the cloud connectivity layer
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceClientError {
    pub code: ErrorCode,
    pub msg: String,
}

impl DeviceClientError {
    pub fn new(code: ErrorCode, msg: impl Into<String>) -> Self {
        DeviceClientError { code, msg: msg.into() }
    }
}

impl Display for DeviceClientError {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "device client error code: {},  msg: {}", self.code as u16, self.msg)
    }
}

impl Error for DeviceClientError {}
