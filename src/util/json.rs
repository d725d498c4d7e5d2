use serde_json::Value;

use crate::common::error::{DeviceClientError, ErrorCode};

fn missing(value_name: &str, expected: &str) -> DeviceClientError {
    DeviceClientError::new(ErrorCode::ParseError, format!("json parser: cannot find {expected} {value_name}"))
}

/// get string field, error if absent or not a string
pub fn get_str<'a>(json_data: &'a Value, value_name: &str) -> Result<&'a str, DeviceClientError> {
    json_data[value_name].as_str().ok_or_else(|| missing(value_name, "string"))
}

pub fn get_int(json_data: &Value, value_name: &str) -> Result<i64, DeviceClientError> {
    json_data[value_name].as_i64().ok_or_else(|| missing(value_name, "integer"))
}

/// get nested object field
pub fn get_object<'a>(json_data: &'a Value, value_name: &str) -> Result<&'a Value, DeviceClientError> {
    let value = &json_data[value_name];
    if value.is_object() {
        Ok(value)
    } else {
        Err(missing(value_name, "object"))
    }
}

/// positional access into an object, relies on serde_json keeping insertion order
pub fn field_at<'a>(json_data: &'a Value, index: usize) -> Option<(&'a str, &'a Value)> {
    json_data
        .as_object()?
        .iter()
        .nth(index)
        .map(|(name, value)| (name.as_str(), value))
}
