//! connectivity module interface
//! network association, TLS broker session and raw publish/subscribe/receive

use super::error::DeviceClientError;
use crate::entity::bo::device_config_bo::NetworkSettings;

/// broker delivery guarantee
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum QoS {
    AtLeastOnce = 1,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TlsMethod {
    Tlsv1_2,
}

/// security parameters of the broker connection, all file paths are storage paths
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSecurity {
    pub method: TlsMethod,
    pub cipher: String,
    pub ca_file: String,
    pub certificate_file: String,
    pub private_key_file: String,
}

/// everything needed to open one broker session
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectOptions {
    pub address: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub security: TransportSecurity,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Vec<u8>,
}

/// identity of the radio module
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleInfo {
    pub firmware_version: String,
    pub mac_address: String,
    pub udid: String,
}

pub trait Transport {
    /// associate with the network and set up time sync
    fn join_network(&mut self, network: &NetworkSettings) -> Result<(), DeviceClientError>;

    fn leave_network(&mut self) -> Result<(), DeviceClientError>;

    /// open a secure broker session, a rejected root CA is reported as `ErrorCode::WrongRootCa`
    fn connect(&mut self, options: &ConnectOptions) -> Result<(), DeviceClientError>;

    fn disconnect(&mut self);

    fn publish(&mut self, topic: &str, qos: QoS, payload: &[u8]) -> Result<(), DeviceClientError>;

    fn subscribe(&mut self, topics: &[(&str, QoS)]) -> Result<(), DeviceClientError>;

    /// wait for the next inbound message, the timeout is owned by the transport
    fn receive(&mut self) -> Option<InboundMessage>;

    fn module_info(&self) -> ModuleInfo;
}
