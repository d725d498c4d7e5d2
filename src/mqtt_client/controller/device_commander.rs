//! direct methods addressed to the board

use serde_json::Value;

use crate::common::error::{DeviceClientError, ErrorCode};
use crate::common::transport::Transport;
use crate::driver::traits::peripherals::Peripherals;
use crate::entity::dto::command_dto::LedColorDto;
use crate::mqtt_client::client::CloudSession;
use crate::mqtt_client::protocol::{STATUS_BAD_REQUEST, STATUS_EXCEPTION, STATUS_SUCCESS};
use crate::util::json::get_int;
use crate::{error, info, warn};

const LOG_TAG: &str = "device_commander";

pub const SET_LED_COLOR: &str = "setLEDColor";

/// method names this device answers, anything else is dropped
pub fn is_known_method(name: &str) -> bool {
    name == SET_LED_COLOR
}

/// make led color dto from the method payload
fn make_led_color_dto(args: &Value) -> Result<LedColorDto, DeviceClientError> {
    Ok(LedColorDto {
        red: get_int(args, "red")?,
        green: get_int(args, "green")?,
        blue: get_int(args, "blue")?,
    })
}

fn validate_led_color(color: &LedColorDto) -> Result<(), DeviceClientError> {
    let channels = [("red", color.red), ("green", color.green), ("blue", color.blue)];
    match channels.iter().find(|(_, value)| !(0..=255).contains(value)) {
        Some((name, value)) => Err(DeviceClientError::new(
            ErrorCode::ValidationError,
            format!("{name} channel {value} outside [0, 255]"),
        )),
        None => Ok(()),
    }
}

/// apply setLEDColor and answer with the request id of the call, returns the status sent
pub fn control_led_color<T: Transport, P: Peripherals>(
    session: &mut CloudSession<T>,
    board: &mut P,
    request_id: &str,
    args: &Value,
) -> u16 {
    let status = match make_led_color_dto(args).and_then(|color| validate_led_color(&color).map(|_| color)) {
        Ok(color) => match board.set_led_color(&color) {
            Ok(()) => {
                info!(LOG_TAG, "LED color set, R: {} G: {} B: {}", color.red, color.green, color.blue);
                STATUS_SUCCESS
            }
            Err(e) => {
                error!(LOG_TAG, "setting LED color failed: {}", e);
                STATUS_EXCEPTION
            }
        },
        Err(e) => {
            warn!(LOG_TAG, "{} rejected: {}", SET_LED_COLOR, e);
            STATUS_BAD_REQUEST
        }
    };
    session.publish_method_response(status, request_id);
    status
}
