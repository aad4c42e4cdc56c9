use serde::{Deserialize, Serialize};

/// One report tick worth of sensor data.
///
/// `None` marks a field the driver could not read this tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleReading {
    pub temperature_c: Option<f32>,
    pub humidity_pct: Option<f32>,
    pub occupied: bool,
}

impl SampleReading {
    /// Both environmental fields are present, so the climate characteristics
    /// may be published.
    pub fn climate(&self) -> Option<(f32, f32)> {
        match (self.temperature_c, self.humidity_pct) {
            (Some(temperature), Some(humidity)) => Some((temperature, humidity)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SensorModel {
    Dht11,
    Dht22,
}

impl SensorModel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Dht11 => "DHT11",
            Self::Dht22 => "DHT22",
        }
    }

    /// Minimum time between two conversions the chip will accept.
    pub fn min_sampling_period_ms(self) -> u64 {
        match self {
            Self::Dht11 => 1_000,
            Self::Dht22 => 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CharacteristicFormat {
    Bool,
    Float,
    String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CharacteristicValue {
    Bool(bool),
    Float(f32),
    String(String),
}

impl CharacteristicValue {
    pub fn format(&self) -> CharacteristicFormat {
        match self {
            Self::Bool(_) => CharacteristicFormat::Bool,
            Self::Float(_) => CharacteristicFormat::Float,
            Self::String(_) => CharacteristicFormat::String,
        }
    }
}

/// A characteristic change as it is pushed to the bridge transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacteristicEvent {
    pub aid: u64,
    pub iid: u64,
    pub value: CharacteristicValue,
}
