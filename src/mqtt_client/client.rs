use crate::common::error::{DeviceClientError, ErrorCode};
use crate::common::storage::ROOT_CA_PATH;
use crate::common::transport::{ConnectOptions, InboundMessage, ModuleInfo, QoS, Transport, TransportSecurity};
use crate::entity::bo::connection_state_bo::{ConnectionState, TelemetryFault};
use crate::entity::bo::device_config_bo::NetworkSettings;
use crate::entity::dto::property_dto::ReportedProperty;
use crate::entity::dto::telemetry_dto::TelemetryDto;
use crate::{debug, error, info, warn};

use super::codec;
use super::controller::property_updater::DEFAULT_SEND_INTERVAL_SECS;
use super::protocol::{
    self, BrokerTarget, DESIRED_PATCH_SUBSCRIPTION, METHOD_SUBSCRIPTION, PROVISIONING_SUBSCRIPTION,
    TWIN_RESPONSE_SUBSCRIPTION,
};

const LOG_TAG: &str = "mqtt_client";

/// consecutive telemetry losses that put the session into the error state
pub const MAX_PACKET_LOSS: u8 = 3;

/// one broker session and all protocol state that goes with it
pub struct CloudSession<T: Transport> {
    transport: T,
    state: ConnectionState,
    // last request id handed out, shared by twin and provisioning requests
    request_id: u32,
    fault: TelemetryFault,
    security: TransportSecurity,
    port: u16,
    telemetry_interval_secs: u64,
}

impl<T: Transport> CloudSession<T> {
    pub fn new(transport: T, port: u16, security: TransportSecurity) -> Self {
        CloudSession {
            transport,
            state: ConnectionState::Disconnected,
            request_id: 0,
            fault: TelemetryFault::default(),
            security,
            port,
            telemetry_interval_secs: DEFAULT_SEND_INTERVAL_SECS,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_status_ok(&self) -> bool {
        self.state != ConnectionState::Error
    }

    pub fn fault(&self) -> &TelemetryFault {
        &self.fault
    }

    pub fn security(&self) -> &TransportSecurity {
        &self.security
    }

    pub fn security_mut(&mut self) -> &mut TransportSecurity {
        &mut self.security
    }

    pub fn telemetry_interval_secs(&self) -> u64 {
        self.telemetry_interval_secs
    }

    pub fn set_telemetry_interval_secs(&mut self, secs: u64) {
        info!(LOG_TAG, "telemetry send interval {} -> {} s", self.telemetry_interval_secs, secs);
        self.telemetry_interval_secs = secs;
    }

    pub fn module_info(&self) -> ModuleInfo {
        self.transport.module_info()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn next_request_id(&mut self) -> u32 {
        self.request_id = self.request_id.wrapping_add(1);
        self.request_id
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state != state {
            info!(LOG_TAG, "connection state {} -> {}", self.state, state);
            self.state = state;
        }
    }

    fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::BrokerConnected | ConnectionState::Provisioning)
    }

    pub fn join_network(&mut self, network: &NetworkSettings) -> bool {
        if self.state == ConnectionState::Error {
            warn!(LOG_TAG, "join network refused, session is in error state");
            return false;
        }
        match self.transport.join_network(network) {
            Ok(()) => {
                if self.state == ConnectionState::Disconnected {
                    self.set_state(ConnectionState::WifiConnected);
                }
                true
            }
            Err(e) => {
                error!(LOG_TAG, "join network {} failed: {}", network.wifi_ssid, e);
                false
            }
        }
    }

    pub fn leave_network(&mut self) {
        if let Err(e) = self.transport.leave_network() {
            warn!(LOG_TAG, "leave network failed: {}", e);
        }
        if self.state != ConnectionState::Error {
            self.set_state(ConnectionState::Disconnected);
        }
    }

    /// secure connect, a refused rotated root CA is replaced by the old one and retried once
    fn open(&mut self, target: &BrokerTarget) -> Result<(), DeviceClientError> {
        if self.state == ConnectionState::Error {
            return Err(DeviceClientError::new(ErrorCode::ConnectFailure, "session is in error state"));
        }

        let mut options = ConnectOptions {
            address: target.address.clone(),
            port: self.port,
            client_id: target.client_id.clone(),
            username: target.username.clone(),
            security: self.security.clone(),
        };
        info!(LOG_TAG, "connecting to {}:{} as {}", options.address, options.port, options.client_id);

        match self.transport.connect(&options) {
            Err(e) if e.code == ErrorCode::WrongRootCa => {
                warn!(LOG_TAG, "root CA {} refused, falling back to {}", self.security.ca_file, ROOT_CA_PATH);
                self.security.ca_file = ROOT_CA_PATH.to_string();
                options.security = self.security.clone();
                self.transport.connect(&options)
            }
            result => result,
        }
    }

    /// connect to the operational broker
    pub fn connect(&mut self, target: &BrokerTarget) -> bool {
        match self.open(target) {
            Ok(()) => {
                self.fault = TelemetryFault::default();
                self.set_state(ConnectionState::BrokerConnected);
                true
            }
            Err(e) => {
                error!(LOG_TAG, "connect to {} failed: {}", target.address, e);
                self.set_state(ConnectionState::Error);
                false
            }
        }
    }

    /// connect to the provisioning broker and subscribe to its replies
    pub fn connect_provisioning(&mut self, target: &BrokerTarget) -> Result<(), DeviceClientError> {
        if let Err(e) = self.open(target) {
            error!(LOG_TAG, "connect to provisioning broker {} failed: {}", target.address, e);
            self.set_state(ConnectionState::Error);
            return Err(DeviceClientError::new(ErrorCode::ConnectFailure, e.msg));
        }
        self.set_state(ConnectionState::Provisioning);
        if let Err(e) = self.transport.subscribe(&[(PROVISIONING_SUBSCRIPTION, QoS::AtLeastOnce)]) {
            error!(LOG_TAG, "subscribe to provisioning replies failed: {}", e);
            self.disconnect();
            return Err(e);
        }
        Ok(())
    }

    /// subscribe to twin responses, desired property patches and direct methods
    ///
    /// A failed subscribe closes the connection so the next connect subscribes again.
    pub fn subscribe_topics(&mut self) -> bool {
        if self.state != ConnectionState::BrokerConnected {
            warn!(LOG_TAG, "subscribe refused, state is {}", self.state);
            return false;
        }
        let topics = [
            (TWIN_RESPONSE_SUBSCRIPTION, QoS::AtLeastOnce),
            (DESIRED_PATCH_SUBSCRIPTION, QoS::AtLeastOnce),
            (METHOD_SUBSCRIPTION, QoS::AtLeastOnce),
        ];
        match self.transport.subscribe(&topics) {
            Ok(()) => true,
            Err(e) => {
                error!(LOG_TAG, "subscribe failed: {}", e);
                self.disconnect();
                false
            }
        }
    }

    /// at-least-once publish on the current connection
    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), DeviceClientError> {
        if !self.is_connected() {
            return Err(DeviceClientError::new(
                ErrorCode::NotConnected,
                format!("cannot publish to {topic}, state is {}", self.state),
            ));
        }
        debug!(LOG_TAG, "publish {} bytes to {}", payload.len(), topic);
        self.transport.publish(topic, QoS::AtLeastOnce, payload)
    }

    /// publish a sensor snapshot, consecutive losses are counted and escalate to the error state
    pub fn publish_telemetry(&mut self, device_id: &str, telemetry: &TelemetryDto) -> bool {
        if self.state != ConnectionState::BrokerConnected {
            warn!(LOG_TAG, "telemetry not sent, state is {}", self.state);
            return false;
        }
        let result = codec::encode_telemetry(telemetry)
            .and_then(|payload| self.publish(&protocol::telemetry_topic(device_id), &payload));
        match result {
            Ok(()) => {
                self.fault.consecutive_lost = 0;
                true
            }
            Err(e) => {
                self.fault.consecutive_lost = self.fault.consecutive_lost.saturating_add(1);
                warn!(
                    LOG_TAG,
                    "telemetry lost ({}/{}): {}",
                    self.fault.consecutive_lost, MAX_PACKET_LOSS, e
                );
                if self.fault.consecutive_lost >= MAX_PACKET_LOSS {
                    error!(LOG_TAG, "too many lost telemetry messages");
                    self.set_state(ConnectionState::Error);
                }
                false
            }
        }
    }

    /// report one property, failures are logged only
    pub fn publish_property(&mut self, property: &ReportedProperty) -> bool {
        let request_id = self.next_request_id();
        let result = codec::encode_property(property)
            .and_then(|payload| self.publish(&protocol::reported_properties_topic(request_id), &payload));
        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(LOG_TAG, "reporting property {:?} failed: {}", property, e);
                false
            }
        }
    }

    /// ask the hub for the full twin document
    pub fn request_twin(&mut self) -> bool {
        let request_id = self.next_request_id();
        match self.publish(&protocol::twin_get_topic(request_id), b"") {
            Ok(()) => true,
            Err(e) => {
                warn!(LOG_TAG, "twin request failed: {}", e);
                false
            }
        }
    }

    /// empty-bodied method response carrying the status in its topic
    pub fn publish_method_response(&mut self, status: u16, request_id: &str) -> bool {
        match self.publish(&protocol::method_response_topic(status, request_id), b"") {
            Ok(()) => true,
            Err(e) => {
                warn!(LOG_TAG, "method response {} for request {} failed: {}", status, request_id, e);
                false
            }
        }
    }

    /// next inbound message, `None` when not connected or nothing arrived in time
    pub fn receive(&mut self) -> Option<InboundMessage> {
        if !self.is_connected() {
            return None;
        }
        self.transport.receive()
    }

    pub fn disconnect(&mut self) {
        self.transport.disconnect();
        if self.is_connected() {
            self.set_state(ConnectionState::WifiConnected);
        }
    }

    /// leave the error state, the connection is closed and counters are cleared
    pub fn recover(&mut self) {
        self.transport.disconnect();
        self.fault = TelemetryFault::default();
        self.set_state(ConnectionState::Disconnected);
    }
}
