//! get message from the broker session, then dispatch it to the property or command controller

use serde_json::Value;

use crate::common::error::DeviceClientError;
use crate::common::transport::{InboundMessage, Transport};
use crate::driver::traits::peripherals::Peripherals;
use crate::{debug, info, warn};

use super::client::CloudSession;
use super::codec;
use super::controller::device_commander::{control_led_color, is_known_method};
use super::controller::property_updater::{update_from_patch, update_from_twin, IntervalUpdate};
use super::protocol::{classify, TopicCategory, STATUS_CLOUD_SUCCESS, STATUS_SUCCESS};

const LOG_TAG: &str = "message_listener";

/// what handling one inbound message amounted to
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatched {
    // nothing arrived, or the payload could not be decoded
    NoMessage,
    // topic, method or status nobody handles
    Dropped,
    TwinAcknowledged,
    TwinSnapshot(IntervalUpdate),
    TwinRequestFailed(u16),
    DesiredPatch(IntervalUpdate),
    Method { name: String, status: u16 },
}

fn decode_or_log(message: &InboundMessage) -> Option<Value> {
    match codec::decode(&message.payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(LOG_TAG, "payload on {} ignored: {}", message.topic, e);
            None
        }
    }
}

fn log_shape_error(message: &InboundMessage, e: DeviceClientError) -> Dispatched {
    warn!(LOG_TAG, "payload on {} has an unexpected shape: {}", message.topic, e);
    Dispatched::NoMessage
}

/// route one inbound message by its topic
pub fn on_message<T: Transport, P: Peripherals>(
    session: &mut CloudSession<T>,
    board: &mut P,
    message: &InboundMessage,
) -> Dispatched {
    // 1. parse topic
    let Some(topic) = classify(&message.topic) else {
        debug!(LOG_TAG, "no handler for topic {}", message.topic);
        return Dispatched::Dropped;
    };

    // 2. dispatch by category, payloads are decoded only where a handler reads them
    match topic.category {
        TopicCategory::TwinResponse => match topic.status() {
            Some(STATUS_CLOUD_SUCCESS) => {
                info!(LOG_TAG, "device property updated successfully");
                Dispatched::TwinAcknowledged
            }
            Some(STATUS_SUCCESS) => {
                let Some(twin) = decode_or_log(message) else {
                    return Dispatched::NoMessage;
                };
                match update_from_twin(session, &twin) {
                    Ok(update) => Dispatched::TwinSnapshot(update),
                    Err(e) => log_shape_error(message, e),
                }
            }
            Some(status) => {
                warn!(LOG_TAG, "twin request failed, status: {}", status);
                Dispatched::TwinRequestFailed(status)
            }
            None => {
                warn!(LOG_TAG, "twin response without status: {}", message.topic);
                Dispatched::Dropped
            }
        },
        TopicCategory::TwinDesiredPatch => {
            let Some(patch) = decode_or_log(message) else {
                return Dispatched::NoMessage;
            };
            match update_from_patch(session, &patch) {
                Ok(update) => Dispatched::DesiredPatch(update),
                Err(e) => log_shape_error(message, e),
            }
        }
        TopicCategory::DirectMethod => {
            let (Some(name), Some(request_id)) = (topic.method_name(), topic.request_id()) else {
                warn!(LOG_TAG, "malformed method topic {}", message.topic);
                return Dispatched::Dropped;
            };
            if !is_known_method(name) {
                warn!(LOG_TAG, "unknown method {}, dropped", name);
                return Dispatched::Dropped;
            }
            let Some(args) = decode_or_log(message) else {
                return Dispatched::NoMessage;
            };
            let status = control_led_color(session, board, request_id, &args);
            Dispatched::Method { name: name.to_string(), status }
        }
        TopicCategory::ProvisioningResponse => {
            debug!(LOG_TAG, "late provisioning reply ignored: {}", message.topic);
            Dispatched::Dropped
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::common::transport::mock::MockTransport;
    use crate::driver::traits::peripherals::recording::RecordingBoard;
    use crate::mqtt_client::client::test::connected_session;

    fn dispatch(session: &mut CloudSession<MockTransport>, topic: &str, payload: &str) -> Dispatched {
        let mut board = RecordingBoard::new();
        let message = InboundMessage { topic: topic.to_string(), payload: payload.as_bytes().to_vec() };
        on_message(session, &mut board, &message)
    }

    #[test]
    fn test_twin_responses() {
        let mut session = connected_session();

        assert_eq!(dispatch(&mut session, "$iothub/twin/res/204/?$rid=2&$version=5", ""), Dispatched::TwinAcknowledged);
        assert!(session.transport().published.is_empty());

        assert_eq!(
            dispatch(&mut session, "$iothub/twin/res/200/?$rid=1", r#"{"desired":{"telemetrySendFrequency":10,"$version":2},"reported":{}}"#),
            Dispatched::TwinSnapshot(IntervalUpdate::Applied(10))
        );
        assert_eq!(session.telemetry_interval_secs(), 10);

        assert_eq!(dispatch(&mut session, "$iothub/twin/res/429/?$rid=3", ""), Dispatched::TwinRequestFailed(429));
        assert_eq!(dispatch(&mut session, "$iothub/twin/res/200/?$rid=4", ""), Dispatched::NoMessage);
        assert_eq!(dispatch(&mut session, "$iothub/twin/res/200/?$rid=5", "[1]"), Dispatched::NoMessage);
        assert_eq!(session.transport().published.len(), 1);
    }

    #[test]
    fn test_desired_patch() {
        let mut session = connected_session();
        assert_eq!(
            dispatch(&mut session, "$iothub/twin/PATCH/properties/desired/?$version=8", r#"{"telemetrySendFrequency":2,"$version":8}"#),
            Dispatched::DesiredPatch(IntervalUpdate::Rejected(2.into()))
        );
        assert_eq!(
            session.transport().published_json(0)["telemetrySendFrequency"],
            serde_json::json!({"value": 2, "ac": 400, "av": 8, "ad": "invalid parameter"})
        );
    }

    #[test]
    fn test_methods() {
        let mut session = connected_session();
        assert_eq!(
            dispatch(&mut session, "$iothub/methods/POST/setLEDColor/?$rid=5", r#"{"red":300,"green":10,"blue":10}"#),
            Dispatched::Method { name: "setLEDColor".to_string(), status: 400 }
        );
        assert_eq!(
            dispatch(&mut session, "$iothub/methods/POST/setLEDColor/?$rid=6", r#"{"red":10,"green":10,"blue":10}"#),
            Dispatched::Method { name: "setLEDColor".to_string(), status: 200 }
        );
        assert_eq!(dispatch(&mut session, "$iothub/methods/POST/reboot/?$rid=7", "{}"), Dispatched::Dropped);
        assert_eq!(
            session.transport().published_topics(),
            vec!["$iothub/methods/res/400/?$rid=5", "$iothub/methods/res/200/?$rid=6"]
        );
    }

    #[test]
    fn test_unknown_topics_are_dropped() {
        let mut session = connected_session();
        assert_eq!(dispatch(&mut session, "devices/dev-1/messages/devicebound/", "{}"), Dispatched::Dropped);
        assert_eq!(dispatch(&mut session, "$dps/registrations/res/200/?$rid=1", "{}"), Dispatched::Dropped);
        assert!(session.transport().published.is_empty());
    }
}
