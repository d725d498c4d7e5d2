//! board without sensor hardware, produces slowly drifting synthetic readings
use crate::common::error::DeviceClientError;
use crate::driver::traits::peripherals::Peripherals;
use crate::entity::dto::command_dto::LedColorDto;
use crate::entity::dto::telemetry_dto::{SensorReading, TelemetryDto};
use crate::info;

const LOG_TAG: &str = "dummy_board";

#[derive(Debug, Default)]
pub struct DummyBoard {
    tick: u32,
    led: Option<LedColorDto>,
}

impl DummyBoard {
    pub fn new() -> Self {
        DummyBoard::default()
    }

    // repeats every 60 reads
    fn wave(&self, amplitude: f64) -> f64 {
        let phase = f64::from(self.tick % 60) / 60.0 * std::f64::consts::TAU;
        amplitude * phase.sin()
    }
}

impl Peripherals for DummyBoard {
    fn read_sensors(&mut self) -> Result<TelemetryDto, DeviceClientError> {
        self.tick = self.tick.wrapping_add(1);
        Ok(TelemetryDto {
            readings: vec![
                SensorReading::new("pressure", 1013.25 + self.wave(2.0)),
                SensorReading::new("temperature", 22.0 + self.wave(1.5)),
                SensorReading::new("humidity", 45.0 + self.wave(5.0)),
            ],
            acceleration: vec![
                SensorReading::new("x", self.wave(0.05)),
                SensorReading::new("y", -self.wave(0.05)),
                SensorReading::new("z", 1.0),
            ],
        })
    }

    fn battery_voltage(&mut self) -> Result<f64, DeviceClientError> {
        Ok(3.7 + self.wave(0.1))
    }

    fn set_led_color(&mut self, color: &LedColorDto) -> Result<(), DeviceClientError> {
        match &self.led {
            Some(old) if old == color => info!(LOG_TAG, "LED color unchanged"),
            Some(old) => info!(
                LOG_TAG,
                "LED color R: {} G: {} B: {} -> R: {} G: {} B: {}",
                old.red, old.green, old.blue, color.red, color.green, color.blue
            ),
            None => info!(LOG_TAG, "LED color set, R: {} G: {} B: {}", color.red, color.green, color.blue),
        }
        self.led = Some(color.clone());
        Ok(())
    }
}
