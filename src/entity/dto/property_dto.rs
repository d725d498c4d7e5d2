//! reported property data transmission objects

use serde_derive::Serialize;
use serde_json::Number;

/// acknowledgement of the writable send interval property
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendIntervalAckDto {
    // desired value as received
    pub value: Number,
    // status code
    pub ac: u16,
    // acknowledged version
    pub av: i64,
    // description
    pub ad: String,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ModuleField {
    FirmwareVersion,
    Udid,
    MacAddress,
}

impl ModuleField {
    pub fn key(&self) -> &'static str {
        match self {
            ModuleField::FirmwareVersion => "swVersion",
            ModuleField::Udid => "udid",
            ModuleField::MacAddress => "macAddress",
        }
    }
}

/// one reported property update
#[derive(Debug, Clone, PartialEq)]
pub enum ReportedProperty {
    BatteryVoltage(f64),
    SendInterval(SendIntervalAckDto),
    // read-only property of a device component, tagged with the component marker
    Module {
        component: String,
        field: ModuleField,
        value: String,
    },
}
