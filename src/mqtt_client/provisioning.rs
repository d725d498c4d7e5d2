//! provisioning state machine
//! registers the device with the provisioning broker and polls the operation status
//! until the broker assigns a hub or rejects the registration
//! - the wait is bounded by the caller deadline and cancellation token
//! - the retry-after hint of every reply sets the delay before the next status check

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::common::clock::Clock;
use crate::common::error::{DeviceClientError, ErrorCode};
use crate::common::storage::{Storage, HUB_ADDRESS_PATH};
use crate::common::transport::Transport;
use crate::device_config::credential::check_required;
use crate::entity::bo::device_config_bo::DeviceConfig;
use crate::entity::bo::provisioning_bo::{ProvisioningOutcome, ProvisioningPhase, ProvisioningSession};
use crate::entity::dto::provisioning_dto::ProvisioningResponseDto;
use crate::{debug, error, info, warn};

use super::client::CloudSession;
use super::codec;
use super::protocol::{self, BrokerTarget, InboundTopic, TopicCategory, STATUS_BAD_REQUEST, STATUS_THROTTLED};

const LOG_TAG: &str = "provisioning";

/// pause between receive attempts that returned nothing
pub const IDLE_BACKOFF: Duration = Duration::from_millis(100);

const STATUS_ASSIGNED: &str = "assigned";
const STATUS_FAILED: &str = "failed";

/// run the full register and poll flow, the assigned hub address is persisted on success
///
/// Fails without touching the network when a required credential file is absent, and with
/// `ConnectFailure` when the provisioning broker cannot be reached.
pub fn provision<T: Transport, S: Storage, C: Clock>(
    session: &mut CloudSession<T>,
    storage: &mut S,
    clock: &C,
    config: &DeviceConfig,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ProvisioningOutcome, DeviceClientError> {
    check_required(storage)?;
    let model_id = config.model_id().ok_or_else(|| {
        DeviceClientError::new(ErrorCode::ConfigMalformed, "provisioning needs a model id")
    })?;
    let target = BrokerTarget::provisioning(config)?;

    session.connect_provisioning(&target)?;

    let mut provisioner = Provisioner {
        session: &mut *session,
        clock,
        cancel,
        deadline: clock.now() + timeout,
        state: ProvisioningSession::new(),
    };
    let outcome = provisioner.run(&config.device_id, model_id);
    session.disconnect();
    let outcome = outcome?;

    if let ProvisioningOutcome::Assigned { hub_address } = &outcome {
        storage.write(HUB_ADDRESS_PATH, hub_address.as_bytes())?;
        info!(LOG_TAG, "hub address {} saved", hub_address);
    }
    Ok(outcome)
}

enum Wait {
    Reply(InboundTopic, ProvisioningResponseDto),
    // error status in the reply topic, the body carries no registration status
    Rejected(u16),
    Throttled(InboundTopic),
    Stopped(ProvisioningOutcome),
}

struct Provisioner<'a, T: Transport, C: Clock> {
    session: &'a mut CloudSession<T>,
    clock: &'a C,
    cancel: &'a CancellationToken,
    deadline: Instant,
    state: ProvisioningSession,
}

impl<'a, T: Transport, C: Clock> Provisioner<'a, T, C> {
    fn set_phase(&mut self, phase: ProvisioningPhase) {
        debug!(LOG_TAG, "phase {:?} -> {:?}", self.state.phase, phase);
        self.state.phase = phase;
    }

    fn stop_reason(&self) -> Option<ProvisioningOutcome> {
        if self.cancel.is_cancelled() {
            Some(ProvisioningOutcome::Cancelled)
        } else if self.clock.now() >= self.deadline {
            Some(ProvisioningOutcome::TimedOut)
        } else {
            None
        }
    }

    fn register(&mut self, body: &[u8]) -> Result<(), DeviceClientError> {
        let request_id = self.session.next_request_id();
        self.session.publish(&protocol::registration_topic(request_id), body)?;
        self.state.last_request_id = request_id;
        Ok(())
    }

    fn run(&mut self, device_id: &str, model_id: &str) -> Result<ProvisioningOutcome, DeviceClientError> {
        let body = codec::encode_provisioning_request(device_id, model_id)?;
        self.register(&body)?;
        self.set_phase(ProvisioningPhase::RegisterSent);
        info!(LOG_TAG, "registration of {} sent", device_id);

        loop {
            let reply = match self.wait_for_reply() {
                Wait::Reply(topic, reply) => {
                    self.state.retry_after_secs = topic.retry_after();
                    reply
                }
                Wait::Rejected(status) => {
                    self.set_phase(ProvisioningPhase::Failed);
                    error!(LOG_TAG, "registration rejected with status {}", status);
                    return Ok(ProvisioningOutcome::Failed);
                }
                Wait::Throttled(topic) => {
                    self.state.retry_after_secs = topic.retry_after();
                    warn!(LOG_TAG, "provisioning broker throttled request {}", self.state.last_request_id);
                    if let Some(outcome) = self.pause(self.state.poll_interval()) {
                        return Ok(self.stop(outcome));
                    }
                    if self.state.operation_id.is_some() {
                        self.request_status();
                    } else if let Err(e) = self.register(&body) {
                        warn!(LOG_TAG, "registration retry failed: {}", e);
                    }
                    continue;
                }
                Wait::Stopped(outcome) => return Ok(self.stop(outcome)),
            };
            if let Some(operation_id) = reply.operation_id {
                self.state.operation_id = Some(operation_id);
            }

            if reply.status.starts_with(STATUS_ASSIGNED) {
                let Some(hub_address) = reply.assigned_hub else {
                    return Err(DeviceClientError::new(ErrorCode::ParseError, "assigned reply without hub address"));
                };
                self.set_phase(ProvisioningPhase::Assigned);
                info!(LOG_TAG, "device assigned to {}", hub_address);
                return Ok(ProvisioningOutcome::Assigned { hub_address });
            }
            if reply.status.starts_with(STATUS_FAILED) {
                self.set_phase(ProvisioningPhase::Failed);
                error!(LOG_TAG, "registration failed");
                return Ok(ProvisioningOutcome::Failed);
            }
            info!(LOG_TAG, "registration status {}, polling", reply.status);
            self.set_phase(ProvisioningPhase::Polling);

            if let Some(outcome) = self.pause(self.state.poll_interval()) {
                return Ok(self.stop(outcome));
            }
            self.request_status();
        }
    }

    fn stop(&mut self, outcome: ProvisioningOutcome) -> ProvisioningOutcome {
        warn!(LOG_TAG, "provisioning stopped in phase {:?}: {:?}", self.state.phase, outcome);
        outcome
    }

    fn request_status(&mut self) {
        let Some(operation_id) = self.state.operation_id.clone() else {
            warn!(LOG_TAG, "no operation id yet, waiting for the registration reply");
            return;
        };
        let request_id = self.session.next_request_id();
        match self.session.publish(&protocol::operation_status_topic(request_id, &operation_id), b"") {
            Ok(()) => self.state.last_request_id = request_id,
            Err(e) => warn!(LOG_TAG, "status request {} failed: {}", request_id, e),
        }
    }

    /// sleep for the poll interval, cut short by the deadline
    fn pause(&self, interval: Duration) -> Option<ProvisioningOutcome> {
        if let Some(outcome) = self.stop_reason() {
            return Some(outcome);
        }
        let remaining = self.deadline.saturating_duration_since(self.clock.now());
        self.clock.sleep(interval.min(remaining));
        self.stop_reason()
    }

    /// block until a provisioning reply arrives, other messages are dropped
    fn wait_for_reply(&mut self) -> Wait {
        loop {
            if let Some(outcome) = self.stop_reason() {
                return Wait::Stopped(outcome);
            }
            let Some(message) = self.session.receive() else {
                self.clock.sleep(IDLE_BACKOFF);
                continue;
            };

            let topic = match protocol::classify(&message.topic) {
                Some(topic) if topic.category == TopicCategory::ProvisioningResponse => topic,
                _ => {
                    debug!(LOG_TAG, "ignoring message on {}", message.topic);
                    continue;
                }
            };
            match topic.status() {
                Some(STATUS_THROTTLED) => return Wait::Throttled(topic),
                Some(status) if status >= STATUS_BAD_REQUEST => return Wait::Rejected(status),
                _ => {}
            }
            let reply = codec::decode(&message.payload).and_then(|value| codec::parse_provisioning_response(&value));
            let reply = match reply {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(LOG_TAG, "unreadable provisioning reply on {}: {}", message.topic, e);
                    continue;
                }
            };

            let expected = self.state.last_request_id.to_string();
            if topic.request_id().is_some_and(|rid| rid != expected) {
                warn!(
                    LOG_TAG,
                    "reply for request {:?} while waiting for {}",
                    topic.request_id(), expected
                );
            }
            return Wait::Reply(topic, reply);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::clock::manual::ManualClock;
    use crate::common::storage::memory::MemoryStorage;
    use crate::common::storage::{DEVICE_KEY_PATH, ROOT_CA_PATH};
    use crate::device_config::config_store;
    use crate::device_config::config_store::test::PROVISIONING_CONFIG;
    use crate::entity::bo::connection_state_bo::ConnectionState;
    use crate::mqtt_client::client::test::session;

    const ASSIGNING: &str = r#"{"operationId":"4.d0a671905ea5b2c8.42d78160-4c78-479e-8be7-61d5e55dac0d","status":"assigning"}"#;
    const OPERATION_ID: &str = "4.d0a671905ea5b2c8.42d78160-4c78-479e-8be7-61d5e55dac0d";
    const ASSIGNED: &str = r#"{"operationId":"4.d0a671905ea5b2c8.42d78160-4c78-479e-8be7-61d5e55dac0d","status":"assigned",
        "registrationState":{"registrationId":"Calypso-129001293","createdDateTimeUtc":"2023-01-11T10:00:00Z",
        "assignedHub":"myhub.example.net","deviceId":"Calypso-129001293","status":"assigned","substatus":"initialAssignment",
        "lastUpdatedDateTimeUtc":"2023-01-11T10:00:01Z","etag":"IjAwMDAi"}}"#;

    fn config() -> DeviceConfig {
        config_store::parse(PROVISIONING_CONFIG.as_bytes()).unwrap()
    }

    #[test]
    fn test_retry_after_then_assigned() {
        let mut session = session();
        session.transport_mut().push_inbound("$dps/registrations/res/202/?$rid=1&retry-after=7", ASSIGNING);
        session.transport_mut().push_inbound("$dps/registrations/res/200/?$rid=2", ASSIGNED);
        let mut storage = MemoryStorage::new().with_credentials();
        let clock = ManualClock::new();

        let outcome = provision(
            &mut session, &mut storage, &clock, &config(), Duration::from_secs(300), &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(outcome, ProvisioningOutcome::Assigned { hub_address: "myhub.example.net".to_string() });
        assert_eq!(*clock.sleeps.borrow(), vec![Duration::from_secs(7)]);
        assert_eq!(storage.read_string(HUB_ADDRESS_PATH).unwrap(), "myhub.example.net");

        let transport = session.transport();
        assert_eq!(transport.subscribed, vec![protocol::PROVISIONING_SUBSCRIPTION]);
        assert_eq!(
            transport.published_topics(),
            vec![
                "$dps/registrations/PUT/iotdps-register/?$rid=1".to_string(),
                protocol::operation_status_topic(2, OPERATION_ID),
            ]
        );
        assert_eq!(
            transport.published_json(0),
            serde_json::json!({
                "registrationId": "Calypso-129001293",
                "payload": {"modelId": "dtmi:wuerthelektronik:designkit:calypsoiotkit;1"}
            })
        );
        assert_eq!(
            transport.connects[0].username.as_deref(),
            Some("0ne006E0511/registrations/Calypso-129001293/api-version=2021-06-01&model-id=dtmi:wuerthelektronik:designkit:calypsoiotkit;1")
        );
        assert_eq!(session.state(), ConnectionState::WifiConnected);
    }

    #[test]
    fn test_implausible_retry_hint_uses_default_interval() {
        let mut session = session();
        session.transport_mut().push_inbound("$dps/registrations/res/202/?$rid=1&retry-after=3600", ASSIGNING);
        session.transport_mut().push_inbound("$dps/registrations/res/202/?$rid=2", ASSIGNING);
        session.transport_mut().push_inbound("$dps/registrations/res/200/?$rid=3", ASSIGNED);
        let mut storage = MemoryStorage::new().with_credentials();
        let clock = ManualClock::new();

        let outcome = provision(
            &mut session, &mut storage, &clock, &config(), Duration::from_secs(300), &CancellationToken::new(),
        )
        .unwrap();

        assert!(matches!(outcome, ProvisioningOutcome::Assigned { .. }));
        assert_eq!(*clock.sleeps.borrow(), vec![Duration::from_secs(5), Duration::from_secs(5)]);
    }

    #[test]
    fn test_failed_registration() {
        let mut session = session();
        session.transport_mut().push_inbound("$dps/registrations/res/202/?$rid=1&retry-after=3", ASSIGNING);
        session.transport_mut().push_inbound(
            "$dps/registrations/res/200/?$rid=2",
            r#"{"operationId":"4.x","status":"failed","registrationState":{"errorCode":400209}}"#,
        );
        let mut storage = MemoryStorage::new().with_credentials();
        let clock = ManualClock::new();

        let outcome = provision(
            &mut session, &mut storage, &clock, &config(), Duration::from_secs(300), &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(outcome, ProvisioningOutcome::Failed);
        assert!(!storage.exists(HUB_ADDRESS_PATH));
    }

    #[test]
    fn test_unrecognised_status_times_out() {
        let mut session = session();
        session.transport_mut().push_inbound(
            "$dps/registrations/res/202/?$rid=1&retry-after=2",
            r#"{"operationId":"4.x","status":"disabled"}"#,
        );
        let mut storage = MemoryStorage::new().with_credentials();
        let clock = ManualClock::new();

        let outcome = provision(
            &mut session, &mut storage, &clock, &config(), Duration::from_secs(30), &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(outcome, ProvisioningOutcome::TimedOut);
        assert!(clock.elapsed() >= Duration::from_secs(30));
        assert!(clock.elapsed() < Duration::from_secs(31));
        assert_eq!(session.transport().published.len(), 2);
        assert!(!storage.exists(HUB_ADDRESS_PATH));
    }

    #[test]
    fn test_unrelated_and_garbage_messages_are_skipped() {
        let mut session = session();
        session.transport_mut().push_inbound("$iothub/twin/res/200/?$rid=1", "{}");
        session.transport_mut().push_inbound("$dps/registrations/res/202/?$rid=1", "");
        session.transport_mut().push_inbound("$dps/registrations/res/200/?$rid=1", ASSIGNED);
        let mut storage = MemoryStorage::new().with_credentials();
        let clock = ManualClock::new();

        let outcome = provision(
            &mut session, &mut storage, &clock, &config(), Duration::from_secs(300), &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(outcome, ProvisioningOutcome::Assigned { hub_address: "myhub.example.net".to_string() });
        assert!(clock.sleeps.borrow().is_empty());
    }

    #[test]
    fn test_error_status_fails_without_waiting() {
        let mut session = session();
        session.transport_mut().push_inbound(
            "$dps/registrations/res/401/?$rid=1",
            r#"{"errorCode":401002,"trackingId":"8ad0463c","message":"The request is unauthorized."}"#,
        );
        let mut storage = MemoryStorage::new().with_credentials();
        let clock = ManualClock::new();

        let outcome = provision(
            &mut session, &mut storage, &clock, &config(), Duration::from_secs(300), &CancellationToken::new(),
        )
        .unwrap();

        assert_eq!(outcome, ProvisioningOutcome::Failed);
        assert!(clock.sleeps.borrow().is_empty());
        assert!(!storage.exists(HUB_ADDRESS_PATH));
    }

    #[test]
    fn test_throttled_registration_is_sent_again() {
        let mut session = session();
        session.transport_mut().push_inbound(
            "$dps/registrations/res/429/?$rid=1&retry-after=4",
            r#"{"errorCode":429001,"message":"Operations are being throttled for this tenant."}"#,
        );
        session.transport_mut().push_inbound("$dps/registrations/res/200/?$rid=2", ASSIGNED);
        let mut storage = MemoryStorage::new().with_credentials();
        let clock = ManualClock::new();

        let outcome = provision(
            &mut session, &mut storage, &clock, &config(), Duration::from_secs(300), &CancellationToken::new(),
        )
        .unwrap();

        assert!(matches!(outcome, ProvisioningOutcome::Assigned { .. }));
        assert_eq!(*clock.sleeps.borrow(), vec![Duration::from_secs(4)]);
        assert_eq!(
            session.transport().published_topics(),
            vec!["$dps/registrations/PUT/iotdps-register/?$rid=1", "$dps/registrations/PUT/iotdps-register/?$rid=2"]
        );
    }

    #[test]
    fn test_subscribe_failure_closes_provisioning_connection() {
        let mut session = session();
        session.transport_mut().subscribe_ok = false;
        let mut storage = MemoryStorage::new().with_credentials();
        let clock = ManualClock::new();

        let err = provision(
            &mut session, &mut storage, &clock, &config(), Duration::from_secs(300), &CancellationToken::new(),
        )
        .unwrap_err();

        assert_eq!(err.code, ErrorCode::SubscribeFailure);
        assert_eq!(session.state(), ConnectionState::WifiConnected);
        assert_eq!(session.transport().disconnects, 1);
        assert!(session.transport().published.is_empty());
    }

    #[test]
    fn test_cancelled() {
        let mut session = session();
        let mut storage = MemoryStorage::new().with_credentials();
        let clock = ManualClock::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome =
            provision(&mut session, &mut storage, &clock, &config(), Duration::from_secs(300), &cancel).unwrap();

        assert_eq!(outcome, ProvisioningOutcome::Cancelled);
        assert_eq!(session.transport().published.len(), 1);
    }

    #[test]
    fn test_missing_credentials_fail_before_connecting() {
        let mut session = session();
        let mut storage = MemoryStorage::new().with_credentials();
        storage.files.remove(DEVICE_KEY_PATH);
        let clock = ManualClock::new();

        let err = provision(
            &mut session, &mut storage, &clock, &config(), Duration::from_secs(300), &CancellationToken::new(),
        )
        .unwrap_err();

        assert_eq!(err.code, ErrorCode::CredentialMissing);
        assert!(session.transport().connects.is_empty());
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_connect_failure_aborts_before_registering() {
        let mut session = session();
        session.transport_mut().fail_next_connect(ErrorCode::WrongRootCa);
        session.transport_mut().fail_next_connect(ErrorCode::ConnectFailure);
        let mut storage = MemoryStorage::new().with_credentials();
        let clock = ManualClock::new();

        let err = provision(
            &mut session, &mut storage, &clock, &config(), Duration::from_secs(300), &CancellationToken::new(),
        )
        .unwrap_err();

        assert_eq!(err.code, ErrorCode::ConnectFailure);
        assert_eq!(session.transport().connects[1].security.ca_file, ROOT_CA_PATH);
        assert!(session.transport().published.is_empty());
        assert_eq!(session.state(), ConnectionState::Error);
    }
}
