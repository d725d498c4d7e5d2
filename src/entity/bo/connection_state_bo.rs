//! connection state Bo

use std::fmt::{Display, Formatter};
use std::fmt;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    WifiConnected,
    BrokerConnected,
    Provisioning,
    // left only through an explicit recovery
    Error,
}

impl Display for ConnectionState {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::WifiConnected => "wifi connected",
            ConnectionState::BrokerConnected => "broker connected",
            ConnectionState::Provisioning => "provisioning",
            ConnectionState::Error => "error",
        };
        f.write_str(name)
    }
}

/// consecutive telemetry publish failures
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TelemetryFault {
    pub consecutive_lost: u8,
}
