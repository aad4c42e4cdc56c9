use embedded_hal::digital::InputPin;
use log::warn;

use crate::types::SampleReading;

/// Temperature/humidity chip driver.
///
/// Both reads return NaN when the chip did not answer or failed its checksum.
pub trait ClimateSensor {
    fn read_temperature(&mut self) -> f32;
    fn read_humidity(&mut self) -> f32;
}

/// Fixed correction applied to raw temperature readings:
/// `temperature = raw + offset_c`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TemperatureCalibration {
    pub offset_c: f32,
}

impl TemperatureCalibration {
    pub const fn new(offset_c: f32) -> Self {
        Self { offset_c }
    }

    #[inline]
    pub fn apply(&self, raw_c: f32) -> f32 {
        raw_c + self.offset_c
    }
}

impl Default for TemperatureCalibration {
    fn default() -> Self {
        Self::new(-3.0)
    }
}

fn valid(value: f32) -> Option<f32> {
    value.is_finite().then_some(value)
}

pub struct Sampler<S, P> {
    sensor: S,
    occupancy: P,
    calibration: TemperatureCalibration,
}

impl<S: ClimateSensor, P: InputPin> Sampler<S, P> {
    pub fn new(sensor: S, occupancy: P, calibration: TemperatureCalibration) -> Self {
        Self {
            sensor,
            occupancy,
            calibration,
        }
    }

    /// Reads the chip and the occupancy input once. Failed fields come back
    /// as `None`; nothing is retried.
    pub fn sample(&mut self) -> SampleReading {
        let calibration = self.calibration;
        let temperature_c =
            valid(self.sensor.read_temperature()).map(|raw| calibration.apply(raw));
        let humidity_pct = valid(self.sensor.read_humidity());

        let occupied = match self.occupancy.is_high() {
            Ok(high) => high,
            Err(err) => {
                warn!("failed to read occupancy input: {err:?}");
                false
            }
        };

        SampleReading {
            temperature_c,
            humidity_pct,
            occupied,
        }
    }
}
