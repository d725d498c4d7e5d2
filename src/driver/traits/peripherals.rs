//! board peripherals the cloud client reads and drives
use crate::common::error::DeviceClientError;
use crate::entity::dto::command_dto::LedColorDto;
use crate::entity::dto::telemetry_dto::TelemetryDto;

pub trait Peripherals {
    /// current snapshot of every environmental sensor and the accelerometer
    fn read_sensors(&mut self) -> Result<TelemetryDto, DeviceClientError>;

    /// battery voltage in volts
    fn battery_voltage(&mut self) -> Result<f64, DeviceClientError>;

    /// set the RGB status LED, channels are already range checked
    fn set_led_color(&mut self, color: &LedColorDto) -> Result<(), DeviceClientError>;
}

#[cfg(test)]
pub mod recording {
    use super::*;
    use crate::entity::dto::telemetry_dto::SensorReading;

    /// fixed readings, remembers every LED color it was asked to show
    pub struct RecordingBoard {
        pub voltage: f64,
        pub led_colors: Vec<LedColorDto>,
        pub sensor_reads: usize,
    }

    impl RecordingBoard {
        pub fn new() -> Self {
            RecordingBoard { voltage: 3.7, led_colors: Vec::new(), sensor_reads: 0 }
        }
    }

    impl Peripherals for RecordingBoard {
        fn read_sensors(&mut self) -> Result<TelemetryDto, DeviceClientError> {
            self.sensor_reads += 1;
            Ok(TelemetryDto {
                readings: vec![SensorReading::new("temperature", 22.5), SensorReading::new("humidity", 41.0)],
                acceleration: vec![
                    SensorReading::new("x", 0.0),
                    SensorReading::new("y", 0.0),
                    SensorReading::new("z", 1.0),
                ],
            })
        }

        fn battery_voltage(&mut self) -> Result<f64, DeviceClientError> {
            Ok(self.voltage)
        }

        fn set_led_color(&mut self, color: &LedColorDto) -> Result<(), DeviceClientError> {
            self.led_colors.push(color.clone());
            Ok(())
        }
    }
}
