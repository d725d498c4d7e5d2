//! writable telemetry send interval property

use serde_json::{Number, Value};

use crate::common::error::{DeviceClientError, ErrorCode};
use crate::common::transport::Transport;
use crate::entity::dto::property_dto::{ReportedProperty, SendIntervalAckDto};
use crate::mqtt_client::client::CloudSession;
use crate::mqtt_client::codec::SEND_INTERVAL_PROPERTY;
use crate::mqtt_client::protocol::{STATUS_BAD_REQUEST, STATUS_SET_BY_DEVICE, STATUS_SUCCESS, VERSION_TOKEN};
use crate::util::json::{get_int, get_object};
use crate::{info, warn};

const LOG_TAG: &str = "property_updater";

pub const DEFAULT_SEND_INTERVAL_SECS: u64 = 30;
pub const MIN_SEND_INTERVAL_SECS: i64 = 3;
pub const MAX_SEND_INTERVAL_SECS: i64 = 600;

#[derive(Debug, Clone, PartialEq)]
pub enum IntervalUpdate {
    Applied(u64),
    Rejected(Number),
    // the cloud holds no value yet, the device default was reported
    Initialized(u64),
}

pub fn validate_interval(value: i64) -> Result<u64, DeviceClientError> {
    if (MIN_SEND_INTERVAL_SECS..=MAX_SEND_INTERVAL_SECS).contains(&value) {
        Ok(value as u64)
    } else {
        Err(DeviceClientError::new(
            ErrorCode::ValidationError,
            format!("send interval {value} outside [{MIN_SEND_INTERVAL_SECS}, {MAX_SEND_INTERVAL_SECS}]"),
        ))
    }
}

fn acknowledge<T: Transport>(session: &mut CloudSession<T>, value: Number, ac: u16, av: i64, ad: &str) {
    session.publish_property(&ReportedProperty::SendInterval(SendIntervalAckDto {
        value,
        ac,
        av,
        ad: ad.to_string(),
    }));
}

/// validate a desired value, apply it when in range and acknowledge with the same version
///
/// Numbers that are not an `i64` (floats, huge integers) are out of range like any other.
pub fn apply_desired<T: Transport>(session: &mut CloudSession<T>, value: &Number, version: i64) -> IntervalUpdate {
    let validated = value
        .as_i64()
        .ok_or_else(|| {
            DeviceClientError::new(ErrorCode::ValidationError, format!("send interval {value} is not a whole number"))
        })
        .and_then(validate_interval);
    match validated {
        Ok(secs) => {
            session.set_telemetry_interval_secs(secs);
            acknowledge(session, value.clone(), STATUS_SUCCESS, version, "success");
            IntervalUpdate::Applied(secs)
        }
        Err(e) => {
            warn!(LOG_TAG, "desired value rejected: {}", e);
            acknowledge(session, value.clone(), STATUS_BAD_REQUEST, version, "invalid parameter");
            IntervalUpdate::Rejected(value.clone())
        }
    }
}

fn desired_number(desired: &Value) -> Result<&Number, DeviceClientError> {
    match &desired[SEND_INTERVAL_PROPERTY] {
        Value::Number(number) => Ok(number),
        _ => Err(DeviceClientError::new(
            ErrorCode::ParseError,
            format!("{SEND_INTERVAL_PROPERTY} is not a number"),
        )),
    }
}

/// twin document `{"desired": {"telemetrySendFrequency": n, "$version": v}, ..}`
pub fn update_from_twin<T: Transport>(
    session: &mut CloudSession<T>,
    twin: &Value,
) -> Result<IntervalUpdate, DeviceClientError> {
    let desired = get_object(twin, "desired")?;
    if desired.get(SEND_INTERVAL_PROPERTY).is_none() {
        info!(LOG_TAG, "no desired send interval, reporting default {} s", DEFAULT_SEND_INTERVAL_SECS);
        session.set_telemetry_interval_secs(DEFAULT_SEND_INTERVAL_SECS);
        acknowledge(session, DEFAULT_SEND_INTERVAL_SECS.into(), STATUS_SET_BY_DEVICE, 0, "initialize");
        return Ok(IntervalUpdate::Initialized(DEFAULT_SEND_INTERVAL_SECS));
    }
    let value = desired_number(desired)?;
    let version = get_int(desired, VERSION_TOKEN)?;
    Ok(apply_desired(session, value, version))
}

/// desired patch `{"telemetrySendFrequency": n, "$version": v}`
pub fn update_from_patch<T: Transport>(
    session: &mut CloudSession<T>,
    patch: &Value,
) -> Result<IntervalUpdate, DeviceClientError> {
    let value = desired_number(patch)?;
    let version = get_int(patch, VERSION_TOKEN)?;
    Ok(apply_desired(session, value, version))
}
