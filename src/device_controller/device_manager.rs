//! device manager
//! - owns the broker session, device storage and board peripherals
//! - drives the startup sequence: credentials, configuration, network, provisioning
//! - publishes telemetry and properties, hands inbound messages to the dispatcher
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::common::clock::Clock;
use crate::common::error::{DeviceClientError, ErrorCode};
use crate::common::setting::Settings;
use crate::common::storage::{Storage, CONFIG_FILE_PATH, HUB_ADDRESS_PATH};
use crate::common::transport::Transport;
use crate::device_config::config_store::{self, device_security};
use crate::device_config::credential::{write_credentials, BootstrapReport, CredentialBundle};
use crate::driver::traits::peripherals::Peripherals;
use crate::entity::bo::connection_state_bo::ConnectionState;
use crate::entity::bo::device_config_bo::{DeploymentMode, DeviceConfig};
use crate::entity::bo::provisioning_bo::ProvisioningOutcome;
use crate::entity::dto::property_dto::{ModuleField, ReportedProperty};
use crate::mqtt_client::client::CloudSession;
use crate::mqtt_client::message_listener::{on_message, Dispatched};
use crate::mqtt_client::protocol::BrokerTarget;
use crate::mqtt_client::provisioning;
use crate::{error, info, warn};

const LOG_TAG: &str = "device_manager";

/// oldest module firmware (major, minor) the client is known to work with
const MIN_FIRMWARE_VERSION: (u32, u32) = (2, 2);

pub struct DeviceManager<T: Transport, S: Storage, P: Peripherals, C: Clock> {
    session: CloudSession<T>,
    storage: S,
    board: P,
    clock: C,
    config: Option<DeviceConfig>,
    hub_address: Option<String>,
    component_name: String,
    provisioning_timeout: Duration,
    last_battery_voltage: Option<f64>,
}

impl<T: Transport, S: Storage, P: Peripherals, C: Clock> DeviceManager<T, S, P, C> {
    pub fn new(transport: T, storage: S, board: P, clock: C, settings: &Settings) -> Self {
        DeviceManager {
            session: CloudSession::new(transport, settings.mqtt.port, device_security()),
            storage,
            board,
            clock,
            config: None,
            hub_address: None,
            component_name: settings.board.component_name.clone(),
            provisioning_timeout: Duration::from_secs(settings.provisioning.deadline_secs),
            last_battery_voltage: None,
        }
    }

    pub fn session(&self) -> &CloudSession<T> {
        &self.session
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn config_or_err(&self) -> Result<&DeviceConfig, DeviceClientError> {
        self.config
            .as_ref()
            .ok_or_else(|| DeviceClientError::new(ErrorCode::ConfigMissing, "device is not configured"))
    }

    /// write the credential bundle, then load the configuration and join the network
    pub fn initialize(&mut self, bundle: &CredentialBundle) -> Result<BootstrapReport, DeviceClientError> {
        let report = write_credentials(self.session.transport_mut(), &mut self.storage, bundle);
        for (path, e) in &report.failed {
            error!(LOG_TAG, "credential {} not written: {}", path, e);
        }
        self.configuration_complete()?;
        Ok(report)
    }

    /// load the stored configuration, join the network and pick up a persisted hub address
    pub fn configuration_complete(&mut self) -> Result<(), DeviceClientError> {
        let config = config_store::load(&self.storage, self.session.security_mut())?;

        if !self.session.join_network(&config.network) {
            self.config = Some(config);
            return Err(DeviceClientError::new(ErrorCode::ConnectFailure, "joining the network failed"));
        }

        self.hub_address = if self.storage.exists(HUB_ADDRESS_PATH) {
            Some(self.storage.read_string(HUB_ADDRESS_PATH)?)
        } else {
            None
        };
        info!(
            LOG_TAG,
            "device {} configured, hub: {}",
            config.device_id,
            self.hub_address.as_deref().unwrap_or("not provisioned")
        );
        self.config = Some(config);
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.config.is_some()
    }

    /// the persisted hub address is the only provisioning flag
    pub fn is_provisioned(&self) -> bool {
        self.storage.exists(HUB_ADDRESS_PATH)
    }

    pub fn needs_provisioning(&self) -> bool {
        matches!(
            self.config.as_ref().map(|config| &config.mode),
            Some(DeploymentMode::ProvisioningMediated { .. })
        ) && !self.is_provisioned()
    }

    pub fn is_up_to_date(&self) -> bool {
        let info = self.session.module_info();
        match parse_major_minor(&info.firmware_version) {
            Some(version) => version >= MIN_FIRMWARE_VERSION,
            None => {
                warn!(LOG_TAG, "unreadable firmware version {}", info.firmware_version);
                false
            }
        }
    }

    pub fn is_status_ok(&self) -> bool {
        self.session.is_status_ok()
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn telemetry_send_interval(&self) -> Duration {
        Duration::from_secs(self.session.telemetry_interval_secs())
    }

    pub fn last_battery_voltage(&self) -> Option<f64> {
        self.last_battery_voltage
    }

    /// register with the provisioning broker, bounded by the configured deadline
    pub fn provision(&mut self, cancel: &CancellationToken) -> Result<ProvisioningOutcome, DeviceClientError> {
        let config = self.config_or_err()?.clone();
        let outcome = provisioning::provision(
            &mut self.session,
            &mut self.storage,
            &self.clock,
            &config,
            self.provisioning_timeout,
            cancel,
        )?;
        if let ProvisioningOutcome::Assigned { hub_address } = &outcome {
            self.hub_address = Some(hub_address.clone());
        }
        Ok(outcome)
    }

    /// connect to the assigned hub or the fixed endpoint
    pub fn connect(&mut self) -> bool {
        let target = match self
            .config_or_err()
            .and_then(|config| BrokerTarget::operational(config, self.hub_address.as_deref()))
        {
            Ok(target) => target,
            Err(e) => {
                error!(LOG_TAG, "cannot connect: {}", e);
                return false;
            }
        };
        self.session.connect(&target)
    }

    pub fn subscribe_to_topics(&mut self) -> bool {
        self.session.subscribe_topics()
    }

    pub fn publish_sensor_data(&mut self) -> bool {
        let device_id = match self.config_or_err() {
            Ok(config) => config.device_id.clone(),
            Err(e) => {
                warn!(LOG_TAG, "telemetry not sent: {}", e);
                return false;
            }
        };
        match self.board.read_sensors() {
            Ok(telemetry) => self.session.publish_telemetry(&device_id, &telemetry),
            Err(e) => {
                error!(LOG_TAG, "reading sensors failed: {}", e);
                false
            }
        }
    }

    pub fn publish_battery_voltage(&mut self) -> bool {
        match self.board.battery_voltage() {
            Ok(voltage) => {
                self.last_battery_voltage = Some(voltage);
                self.session.publish_property(&ReportedProperty::BatteryVoltage(voltage))
            }
            Err(e) => {
                error!(LOG_TAG, "reading battery voltage failed: {}", e);
                false
            }
        }
    }

    fn publish_module_property(&mut self, field: ModuleField, value: String) -> bool {
        self.session.publish_property(&ReportedProperty::Module {
            component: self.component_name.clone(),
            field,
            value,
        })
    }

    /// request the twin, then report voltage and module identity, each followed by one receive
    pub fn publish_properties(&mut self) -> bool {
        let info = self.session.module_info();
        let mut all_sent = self.session.request_twin();
        self.process_cloud_message();

        all_sent &= self.publish_battery_voltage();
        self.process_cloud_message();

        let reports = [
            (ModuleField::MacAddress, info.mac_address),
            (ModuleField::Udid, info.udid),
            (ModuleField::FirmwareVersion, info.firmware_version),
        ];
        for (field, value) in reports {
            all_sent &= self.publish_module_property(field, value);
            self.process_cloud_message();
        }
        all_sent
    }

    /// wait for one inbound message and dispatch it
    pub fn process_cloud_message(&mut self) -> Dispatched {
        match self.session.receive() {
            Some(message) => on_message(&mut self.session, &mut self.board, &message),
            None => Dispatched::NoMessage,
        }
    }

    fn delete_record(&mut self, path: &str) {
        if self.storage.exists(path) {
            if let Err(e) = self.storage.delete(path) {
                warn!(LOG_TAG, "deleting {} failed: {}", path, e);
            }
        }
    }

    pub fn disconnect(&mut self) {
        self.session.disconnect();
    }

    /// leave the network and forget configuration and provisioning
    pub fn reset(&mut self) {
        self.session.leave_network();
        self.delete_record(HUB_ADDRESS_PATH);
        self.delete_record(CONFIG_FILE_PATH);
        self.config = None;
        self.hub_address = None;
        info!(LOG_TAG, "device reset");
    }

    /// leave the error state and come back up with the stored configuration
    pub fn restart(&mut self) -> Result<(), DeviceClientError> {
        self.session.recover();
        self.configuration_complete()
    }

    /// forget the assigned hub so the next start provisions again
    pub fn reprovision(&mut self) {
        self.session.disconnect();
        self.delete_record(HUB_ADDRESS_PATH);
        self.hub_address = None;
        info!(LOG_TAG, "hub address removed, device will provision again");
    }
}

/// `"2.2.0"` -> `(2, 2)`
fn parse_major_minor(version: &str) -> Option<(u32, u32)> {
    let mut parts = version.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::clock::manual::ManualClock;
    use crate::common::storage::memory::MemoryStorage;
    use crate::common::storage::ROOT_CA_PATH;
    use crate::common::transport::mock::MockTransport;
    use crate::device_config::config_store::test::{HUB_DIRECT_CONFIG, PROVISIONING_CONFIG};
    use crate::driver::traits::peripherals::recording::RecordingBoard;

    type TestManager = DeviceManager<MockTransport, MemoryStorage, RecordingBoard, ManualClock>;

    fn manager(transport: MockTransport) -> TestManager {
        DeviceManager::new(transport, MemoryStorage::new(), RecordingBoard::new(), ManualClock::new(), &Settings::default())
    }

    fn bundle(config: &str) -> CredentialBundle {
        CredentialBundle {
            root_ca: Some(b"root ca".to_vec()),
            root_ca_rotated: Some(b"rotated root ca".to_vec()),
            device_cert: Some(b"device cert".to_vec()),
            device_key: Some(b"device key".to_vec()),
            config: Some(config.as_bytes().to_vec()),
        }
    }

    #[test]
    fn test_provision_connect_and_report() {
        let mut transport = MockTransport::new();
        transport.push_inbound(
            "$dps/registrations/res/202/?$rid=1&retry-after=3",
            r#"{"operationId":"4.op","status":"assigning"}"#,
        );
        transport.push_inbound(
            "$dps/registrations/res/200/?$rid=2",
            r#"{"operationId":"4.op","status":"assigned","registrationState":{"assignedHub":"myhub.example.net"}}"#,
        );
        let mut manager = manager(transport);

        let report = manager.initialize(&bundle(PROVISIONING_CONFIG)).unwrap();
        assert!(report.is_complete());
        assert!(manager.is_configured());
        assert!(!manager.is_provisioned());
        assert!(manager.needs_provisioning());
        assert_eq!(manager.state(), ConnectionState::WifiConnected);

        let outcome = manager.provision(&CancellationToken::new()).unwrap();
        assert_eq!(outcome, ProvisioningOutcome::Assigned { hub_address: "myhub.example.net".to_string() });
        assert!(manager.is_provisioned());
        assert!(!manager.needs_provisioning());

        assert!(manager.connect());
        assert!(manager.subscribe_to_topics());
        let connect = manager.session().transport().connects.last().unwrap().clone();
        assert_eq!(connect.address, "myhub.example.net");
        assert_eq!(
            connect.username.as_deref(),
            Some("myhub.example.net/Calypso-129001293/?api-version=2021-04-12&model-id=dtmi:wuerthelektronik:designkit:calypsoiotkit;1")
        );

        let before = manager.session().transport().published.len();
        assert!(manager.publish_properties());
        let transport = manager.session().transport();
        let all_topics = transport.published_topics();
        let topics = &all_topics[before..];
        assert_eq!(topics.len(), 5);
        assert!(topics[0].starts_with("$iothub/twin/GET/?$rid="));
        assert!(topics[1..].iter().all(|topic| topic.starts_with("$iothub/twin/PATCH/properties/reported/?$rid=")));
        assert_eq!(transport.published_json(before + 1), serde_json::json!({"batteryVoltage": 3.7}));
        assert_eq!(
            transport.published_json(before + 2),
            serde_json::json!({"calypso": {"__t": "c", "macAddress": "a0:b1:c2:d3:e4:f5"}})
        );
        assert_eq!(manager.last_battery_voltage(), Some(3.7));

        assert!(manager.publish_sensor_data());
        assert_eq!(
            manager.session().transport().published_topics().last().copied(),
            Some("devices/Calypso-129001293/messages/events/")
        );
    }

    #[test]
    fn test_hub_direct_needs_no_provisioning() {
        let mut manager = manager(MockTransport::new());
        manager.initialize(&bundle(HUB_DIRECT_CONFIG)).unwrap();

        assert!(!manager.needs_provisioning());
        assert!(manager.connect());
        let connect = &manager.session().transport().connects[0];
        assert_eq!(connect.address, "example-ats.iot.us-east-1.amazonaws.com");
        assert_eq!(connect.client_id, "calypso-iot-kit-1");
        assert_eq!(connect.username, None);
    }

    #[test]
    fn test_unprovisioned_device_cannot_connect() {
        let mut manager = manager(MockTransport::new());
        manager.initialize(&bundle(PROVISIONING_CONFIG)).unwrap();
        assert!(!manager.connect());
        assert!(manager.session().transport().connects.is_empty());
    }

    #[test]
    fn test_twin_snapshot_sets_interval() {
        let mut transport = MockTransport::new();
        transport.push_inbound(
            "$iothub/twin/res/200/?$rid=1",
            r#"{"desired":{"telemetrySendFrequency":15,"$version":3},"reported":{}}"#,
        );
        let mut manager = manager(transport);
        manager.initialize(&bundle(HUB_DIRECT_CONFIG)).unwrap();
        assert_eq!(manager.telemetry_send_interval(), Duration::from_secs(30));

        manager.connect();
        manager.publish_properties();
        assert_eq!(manager.telemetry_send_interval(), Duration::from_secs(15));
    }

    #[test]
    fn test_reset_and_reprovision() {
        let mut manager = manager(MockTransport::new());
        manager.initialize(&bundle(PROVISIONING_CONFIG)).unwrap();
        manager.storage.write(HUB_ADDRESS_PATH, b"myhub.example.net").unwrap();
        manager.configuration_complete().unwrap();
        assert!(manager.is_provisioned());

        manager.reprovision();
        assert!(!manager.is_provisioned());
        assert!(manager.storage().exists(CONFIG_FILE_PATH));
        assert!(manager.is_configured());

        manager.reset();
        assert!(!manager.is_configured());
        assert!(!manager.storage().exists(CONFIG_FILE_PATH));
        assert!(manager.storage().exists(ROOT_CA_PATH));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.session().transport().network_joined);

        let err = manager.configuration_complete().unwrap_err();
        assert_eq!(err.code, ErrorCode::ConfigMissing);
    }

    #[test]
    fn test_restart_recovers_from_error() {
        let mut transport = MockTransport::new();
        transport.publish_results.extend([false, false, false]);
        let mut manager = manager(transport);
        manager.initialize(&bundle(HUB_DIRECT_CONFIG)).unwrap();
        manager.connect();

        for _ in 0..3 {
            assert!(!manager.publish_sensor_data());
        }
        assert!(!manager.is_status_ok());

        manager.restart().unwrap();
        assert!(manager.is_status_ok());
        assert_eq!(manager.state(), ConnectionState::WifiConnected);
        assert!(manager.connect());
        assert!(manager.publish_sensor_data());
    }

    #[test]
    fn test_subscribe_failure_is_retried_with_the_next_connect() {
        let mut transport = MockTransport::new();
        transport.subscribe_ok = false;
        let mut manager = manager(transport);
        manager.initialize(&bundle(HUB_DIRECT_CONFIG)).unwrap();

        assert!(manager.connect());
        assert!(!manager.subscribe_to_topics());
        assert_ne!(manager.state(), ConnectionState::BrokerConnected);
        assert!(manager.is_status_ok());

        manager.session.transport_mut().subscribe_ok = true;
        assert!(manager.connect());
        assert!(manager.subscribe_to_topics());
        assert_eq!(manager.session().transport().subscribed.len(), 3);
        assert_eq!(manager.state(), ConnectionState::BrokerConnected);
    }

    #[test]
    fn test_failed_network_join_keeps_configuration() {
        let mut transport = MockTransport::new();
        transport.join_ok = false;
        let mut manager = manager(transport);

        let err = manager.initialize(&bundle(HUB_DIRECT_CONFIG)).unwrap_err();
        assert_eq!(err.code, ErrorCode::ConnectFailure);
        assert!(manager.is_configured());
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        manager.session.transport_mut().join_ok = true;
        manager.restart().unwrap();
        assert_eq!(manager.state(), ConnectionState::WifiConnected);
        assert!(manager.connect());
    }

    #[test]
    fn test_firmware_version_check() {
        for (version, expected) in [("2.2.0", true), ("2.10.1", true), ("3.0", true), ("2.1.9", false), ("1.9.0", false), ("dev", false)] {
            let mut transport = MockTransport::new();
            transport.module.firmware_version = version.to_string();
            assert_eq!(manager(transport).is_up_to_date(), expected, "{version}");
        }
    }

    #[test]
    fn test_partial_bootstrap_is_reported() {
        let mut manager = manager(MockTransport::new());
        manager.storage.read_only.insert(ROOT_CA_PATH.to_string());
        let report = manager.initialize(&bundle(HUB_DIRECT_CONFIG)).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(manager.is_configured());

        let err = manager.provision(&CancellationToken::new()).unwrap_err();
        assert_eq!(err.code, ErrorCode::CredentialMissing);
    }
}
