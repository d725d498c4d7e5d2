//! wire JSON encoding of outbound records and decoding of broker payloads

use serde_json::{json, Map, Value};

use crate::common::error::{DeviceClientError, ErrorCode};
use crate::entity::dto::property_dto::ReportedProperty;
use crate::entity::dto::provisioning_dto::{ProvisioningPayloadDto, ProvisioningRequestDto, ProvisioningResponseDto};
use crate::entity::dto::telemetry_dto::{SensorReading, TelemetryDto};
use crate::util::json::{get_object, get_str};

pub const SEND_INTERVAL_PROPERTY: &str = "telemetrySendFrequency";
pub const BATTERY_VOLTAGE_PROPERTY: &str = "batteryVoltage";
// marks a component property object
const COMPONENT_MARKER: (&str, &str) = ("__t", "c");

fn to_bytes(value: &impl serde::Serialize) -> Result<Vec<u8>, DeviceClientError> {
    serde_json::to_vec(value).map_err(|e| {
        DeviceClientError::new(ErrorCode::ParseError, format!("json serialize error: {e}"))
    })
}

fn readings_object(readings: &[SensorReading]) -> Map<String, Value> {
    readings
        .iter()
        .map(|reading| (reading.name.clone(), json!(reading.value)))
        .collect()
}

/// `{"temperature": .., "humidity": .., "acceleration": {"x": .., ..}}`
pub fn encode_telemetry(telemetry: &TelemetryDto) -> Result<Vec<u8>, DeviceClientError> {
    let mut body = readings_object(&telemetry.readings);
    if !telemetry.acceleration.is_empty() {
        body.insert("acceleration".to_string(), Value::Object(readings_object(&telemetry.acceleration)));
    }
    to_bytes(&Value::Object(body))
}

pub fn encode_property(property: &ReportedProperty) -> Result<Vec<u8>, DeviceClientError> {
    let body = match property {
        ReportedProperty::BatteryVoltage(voltage) => json!({ BATTERY_VOLTAGE_PROPERTY: voltage }),
        ReportedProperty::SendInterval(ack) => json!({ SEND_INTERVAL_PROPERTY: ack }),
        ReportedProperty::Module { component, field, value } => {
            let mut fields = Map::new();
            fields.insert(COMPONENT_MARKER.0.to_string(), json!(COMPONENT_MARKER.1));
            fields.insert(field.key().to_string(), json!(value));
            let mut body = Map::new();
            body.insert(component.clone(), Value::Object(fields));
            Value::Object(body)
        }
    };
    to_bytes(&body)
}

pub fn encode_provisioning_request(device_id: &str, model_id: &str) -> Result<Vec<u8>, DeviceClientError> {
    to_bytes(&ProvisioningRequestDto {
        registration_id: device_id.to_string(),
        payload: ProvisioningPayloadDto { model_id: model_id.to_string() },
    })
}

/// decode a broker payload into a generic tree, empty input is an error like malformed input
pub fn decode(payload: &[u8]) -> Result<Value, DeviceClientError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(DeviceClientError::new(ErrorCode::ParseError, "empty payload"));
    }
    serde_json::from_slice(payload).map_err(|e| {
        DeviceClientError::new(ErrorCode::ParseError, format!("payload is not valid json: {e}"))
    })
}

/// pick the fields the provisioning flow needs out of a registration or status reply
pub fn parse_provisioning_response(reply: &Value) -> Result<ProvisioningResponseDto, DeviceClientError> {
    let status = get_str(reply, "status")?.to_string();
    let operation_id = reply["operationId"].as_str().map(str::to_string);
    let assigned_hub = get_object(reply, "registrationState")
        .ok()
        .and_then(|state| state["assignedHub"].as_str())
        .map(str::to_string);
    Ok(ProvisioningResponseDto { operation_id, status, assigned_hub })
}
