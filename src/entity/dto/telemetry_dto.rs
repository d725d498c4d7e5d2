//! telemetry data transmission object

/// one named sensor value
#[derive(Debug, Clone, PartialEq)]
pub struct SensorReading {
    pub name: String,
    pub value: f64,
}

impl SensorReading {
    pub fn new(name: &str, value: f64) -> Self {
        SensorReading { name: name.to_string(), value }
    }
}

/// sensor snapshot published as one device-to-cloud event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TelemetryDto {
    // flat sensor name to value entries
    pub readings: Vec<SensorReading>,
    // axis values, nested under "acceleration"
    pub acceleration: Vec<SensorReading>,
}
