use serde::{Deserialize, Serialize};

use crate::{error::ConfigError, types::SensorModel};

/// Largest interval the wrapping millisecond comparison can tell apart from a
/// deadline in the past.
pub const MAX_INTERVAL_MS: u32 = i32::MAX as u32;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    pub report_interval_ms: u32,
    pub diagnostics_interval_ms: u32,
    pub tick_delay_ms: u32,
    /// Added to every raw temperature reading before it is published.
    pub temperature_offset_c: f32,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            report_interval_ms: 2_000,
            diagnostics_interval_ms: 10_000,
            tick_delay_ms: 10,
            temperature_offset_c: -3.0,
        }
    }
}

impl SamplingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_interval("report_interval_ms", self.report_interval_ms)?;
        check_interval("diagnostics_interval_ms", self.diagnostics_interval_ms)?;
        if !self.temperature_offset_c.is_finite() {
            return Err(ConfigError::NonFiniteOffset(self.temperature_offset_c));
        }
        Ok(())
    }

    pub fn sanitize(&mut self) {
        self.tick_delay_ms = self.tick_delay_ms.clamp(1, 1_000);
    }
}

fn check_interval(name: &'static str, value_ms: u32) -> Result<(), ConfigError> {
    if value_ms == 0 {
        return Err(ConfigError::ZeroInterval { name });
    }
    if value_ms > MAX_INTERVAL_MS {
        return Err(ConfigError::IntervalTooLong {
            name,
            value_ms,
            limit_ms: MAX_INTERVAL_MS,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PinConfig {
    pub dht_pin: i32,
    pub occupancy_pin: i32,
    pub indicator_pin: i32,
    pub sensor_model: SensorModel,
}

impl Default for PinConfig {
    fn default() -> Self {
        Self {
            dht_pin: 0,
            occupancy_pin: 5,
            indicator_pin: 16,
            sensor_model: SensorModel::Dht11,
        }
    }
}

impl PinConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pins = [
            ("dht_pin", self.dht_pin),
            ("occupancy_pin", self.occupancy_pin),
            ("indicator_pin", self.indicator_pin),
        ];

        for (i, (first, pin)) in pins.iter().enumerate() {
            if let Some((second, _)) = pins[i + 1..].iter().find(|(_, other)| other == pin) {
                return Err(ConfigError::PinConflict {
                    pin: *pin,
                    first: *first,
                    second: *second,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccessoryConfig {
    pub bridge_name: String,
    pub manufacturer: String,
    pub serial_number: String,
    pub model: String,
    pub firmware_revision: String,
    pub occupancy_name: String,
    pub climate_name: String,
    pub setup_code: String,
}

impl Default for AccessoryConfig {
    fn default() -> Self {
        Self {
            bridge_name: "Arduino HomeKit bridge".to_string(),
            manufacturer: "Marshall Banana Bros".to_string(),
            serial_number: "0123456".to_string(),
            model: "ESP8266/ESP32".to_string(),
            firmware_revision: "1.0".to_string(),
            occupancy_name: "Occupancy sensor".to_string(),
            climate_name: "Temperature and Humidity sensor".to_string(),
            setup_code: "432-11-234".to_string(),
        }
    }
}

// HAP forbids these setup codes.
const TRIVIAL_SETUP_CODES: [&str; 12] = [
    "000-00-000",
    "111-11-111",
    "222-22-222",
    "333-33-333",
    "444-44-444",
    "555-55-555",
    "666-66-666",
    "777-77-777",
    "888-88-888",
    "999-99-999",
    "123-45-678",
    "876-54-321",
];

impl AccessoryConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_setup_code(&self.setup_code)
    }
}

pub fn validate_setup_code(code: &str) -> Result<(), ConfigError> {
    let well_formed = code.len() == 10
        && code.bytes().enumerate().all(|(i, byte)| match i {
            3 | 6 => byte == b'-',
            _ => byte.is_ascii_digit(),
        });

    if !well_formed {
        return Err(ConfigError::MalformedSetupCode(code.to_string()));
    }
    if TRIVIAL_SETUP_CODES.contains(&code) {
        return Err(ConfigError::TrivialSetupCode(code.to_string()));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub wifi_ssid: String,
    pub wifi_pass: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_user: String,
    pub mqtt_pass: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            wifi_ssid: String::new(),
            wifi_pass: String::new(),
            mqtt_host: "192.168.1.100".to_string(),
            mqtt_port: 1883,
            mqtt_user: String::new(),
            mqtt_pass: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default)]
    pub sampling: SamplingConfig,
    #[serde(default)]
    pub pins: PinConfig,
    #[serde(default)]
    pub accessory: AccessoryConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sampling.validate()?;
        self.pins.validate()?;
        self.accessory.validate()
    }
}
