//! HomeKit accessory database for the sensor bridge.
//!
//! Mirrors the attribute layout a HAP server reports from `/accessories`:
//! accessories hold services, services hold characteristics, and every
//! characteristic is addressed by its `(aid, iid)` pair. Instance ids are
//! assigned sequentially per accessory starting at 1.

use log::info;
use serde::{Serialize, Serializer};

use crate::{
    config::AccessoryConfig,
    error::AccessoryError,
    types::{CharacteristicFormat, CharacteristicValue},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessoryCategory {
    Bridge,
    Sensor,
}

impl AccessoryCategory {
    /// Category identifier advertised over Bonjour (`ci`).
    pub fn code(self) -> u8 {
        match self {
            Self::Bridge => 2,
            Self::Sensor => 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceKind {
    AccessoryInformation,
    OccupancySensor,
    HumiditySensor,
    TemperatureSensor,
}

impl ServiceKind {
    /// Short form of the Apple-defined service UUID.
    pub fn uuid(self) -> &'static str {
        match self {
            Self::AccessoryInformation => "3E",
            Self::OccupancySensor => "86",
            Self::HumiditySensor => "82",
            Self::TemperatureSensor => "8A",
        }
    }
}

impl Serialize for ServiceKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.uuid())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CharacteristicKind {
    Identify,
    Manufacturer,
    Model,
    Name,
    SerialNumber,
    FirmwareRevision,
    CurrentTemperature,
    CurrentRelativeHumidity,
    OccupancyDetected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Permission {
    #[serde(rename = "pr")]
    PairedRead,
    #[serde(rename = "pw")]
    PairedWrite,
    #[serde(rename = "ev")]
    Events,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Unit {
    Celsius,
    Percentage,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Range {
    min: f32,
    max: f32,
    step: f32,
}

const READ_ONLY: &[Permission] = &[Permission::PairedRead];
const READ_NOTIFY: &[Permission] = &[Permission::PairedRead, Permission::Events];
const WRITE_ONLY: &[Permission] = &[Permission::PairedWrite];

impl CharacteristicKind {
    pub fn uuid(self) -> &'static str {
        match self {
            Self::Identify => "14",
            Self::Manufacturer => "20",
            Self::Model => "21",
            Self::Name => "23",
            Self::SerialNumber => "30",
            Self::FirmwareRevision => "52",
            Self::CurrentTemperature => "11",
            Self::CurrentRelativeHumidity => "10",
            Self::OccupancyDetected => "71",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Identify => "identify",
            Self::Manufacturer => "manufacturer",
            Self::Model => "model",
            Self::Name => "name",
            Self::SerialNumber => "serial number",
            Self::FirmwareRevision => "firmware revision",
            Self::CurrentTemperature => "current temperature",
            Self::CurrentRelativeHumidity => "current relative humidity",
            Self::OccupancyDetected => "occupancy detected",
        }
    }

    pub fn format(self) -> CharacteristicFormat {
        match self {
            Self::Identify | Self::OccupancyDetected => CharacteristicFormat::Bool,
            Self::CurrentTemperature | Self::CurrentRelativeHumidity => {
                CharacteristicFormat::Float
            }
            Self::Manufacturer
            | Self::Model
            | Self::Name
            | Self::SerialNumber
            | Self::FirmwareRevision => CharacteristicFormat::String,
        }
    }

    fn perms(self) -> &'static [Permission] {
        match self {
            Self::Identify => WRITE_ONLY,
            Self::CurrentTemperature | Self::CurrentRelativeHumidity | Self::OccupancyDetected => {
                READ_NOTIFY
            }
            _ => READ_ONLY,
        }
    }

    fn unit(self) -> Option<Unit> {
        match self {
            Self::CurrentTemperature => Some(Unit::Celsius),
            Self::CurrentRelativeHumidity => Some(Unit::Percentage),
            _ => None,
        }
    }

    fn range(self) -> Option<Range> {
        match self {
            Self::CurrentTemperature => Some(Range {
                min: 0.0,
                max: 100.0,
                step: 0.1,
            }),
            Self::CurrentRelativeHumidity => Some(Range {
                min: 0.0,
                max: 100.0,
                step: 1.0,
            }),
            _ => None,
        }
    }
}

impl Serialize for CharacteristicKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.uuid())
    }
}

/// Address of one characteristic inside the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CharacteristicHandle {
    pub aid: u64,
    pub iid: u64,
}

/// The three characteristics the sampling loop writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SensorCharacteristics {
    pub temperature: CharacteristicHandle,
    pub humidity: CharacteristicHandle,
    pub occupancy: CharacteristicHandle,
}

#[derive(Debug, Clone, Serialize)]
pub struct Characteristic {
    pub iid: u64,
    #[serde(rename = "type")]
    pub kind: CharacteristicKind,
    pub format: CharacteristicFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<CharacteristicValue>,
    pub perms: &'static [Permission],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<Unit>,
    #[serde(rename = "minValue", skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f32>,
    #[serde(rename = "maxValue", skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f32>,
    #[serde(rename = "minStep", skip_serializing_if = "Option::is_none")]
    pub min_step: Option<f32>,
}

impl Characteristic {
    fn new(iid: u64, kind: CharacteristicKind, value: Option<CharacteristicValue>) -> Self {
        let range = kind.range();
        Self {
            iid,
            kind,
            format: kind.format(),
            value,
            perms: kind.perms(),
            unit: kind.unit(),
            min_value: range.map(|r| r.min),
            max_value: range.map(|r| r.max),
            min_step: range.map(|r| r.step),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Service {
    pub iid: u64,
    #[serde(rename = "type")]
    pub kind: ServiceKind,
    pub primary: bool,
    pub characteristics: Vec<Characteristic>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Accessory {
    pub aid: u64,
    pub category: AccessoryCategory,
    pub services: Vec<Service>,
}

impl Accessory {
    fn characteristics(&self) -> impl Iterator<Item = &Characteristic> {
        self.services
            .iter()
            .flat_map(|service| service.characteristics.iter())
    }
}

struct AccessoryBuilder {
    aid: u64,
    category: AccessoryCategory,
    next_iid: u64,
    services: Vec<Service>,
}

impl AccessoryBuilder {
    fn new(aid: u64, category: AccessoryCategory) -> Self {
        Self {
            aid,
            category,
            next_iid: 1,
            services: Vec::new(),
        }
    }

    fn allocate_iid(&mut self) -> u64 {
        let iid = self.next_iid;
        self.next_iid += 1;
        iid
    }

    fn service(
        mut self,
        kind: ServiceKind,
        primary: bool,
        characteristics: Vec<(CharacteristicKind, Option<CharacteristicValue>)>,
    ) -> Self {
        let iid = self.allocate_iid();
        let characteristics = characteristics
            .into_iter()
            .map(|(kind, value)| Characteristic::new(self.allocate_iid(), kind, value))
            .collect();

        self.services.push(Service {
            iid,
            kind,
            primary,
            characteristics,
        });
        self
    }

    fn information(self, name: &str) -> Self {
        self.service(
            ServiceKind::AccessoryInformation,
            false,
            vec![
                (CharacteristicKind::Name, Some(text(name))),
                (CharacteristicKind::Identify, None),
            ],
        )
    }

    fn build(self) -> Accessory {
        Accessory {
            aid: self.aid,
            category: self.category,
            services: self.services,
        }
    }
}

fn text(value: &str) -> CharacteristicValue {
    CharacteristicValue::String(value.to_string())
}

#[derive(Debug, Clone, Serialize)]
pub struct AccessoryDatabase {
    accessories: Vec<Accessory>,
}

impl AccessoryDatabase {
    pub fn new(accessories: Vec<Accessory>) -> Result<Self, AccessoryError> {
        for (i, accessory) in accessories.iter().enumerate() {
            if accessories[..i].iter().any(|other| other.aid == accessory.aid) {
                return Err(AccessoryError::DuplicateAccessory(accessory.aid));
            }
        }
        Ok(Self { accessories })
    }

    /// Bridge accessory plus one occupancy and one temperature/humidity
    /// accessory.
    pub fn sensor_bridge(config: &AccessoryConfig) -> Result<Self, AccessoryError> {
        let bridge = AccessoryBuilder::new(1, AccessoryCategory::Bridge)
            .service(
                ServiceKind::AccessoryInformation,
                false,
                vec![
                    (CharacteristicKind::Name, Some(text(&config.bridge_name))),
                    (
                        CharacteristicKind::Manufacturer,
                        Some(text(&config.manufacturer)),
                    ),
                    (
                        CharacteristicKind::SerialNumber,
                        Some(text(&config.serial_number)),
                    ),
                    (CharacteristicKind::Model, Some(text(&config.model))),
                    (
                        CharacteristicKind::FirmwareRevision,
                        Some(text(&config.firmware_revision)),
                    ),
                    (CharacteristicKind::Identify, None),
                ],
            )
            .build();

        let occupancy = AccessoryBuilder::new(2, AccessoryCategory::Sensor)
            .information(&config.occupancy_name)
            .service(
                ServiceKind::OccupancySensor,
                true,
                vec![(
                    CharacteristicKind::OccupancyDetected,
                    Some(CharacteristicValue::Bool(false)),
                )],
            )
            .build();

        let climate = AccessoryBuilder::new(3, AccessoryCategory::Sensor)
            .information(&config.climate_name)
            .service(
                ServiceKind::HumiditySensor,
                false,
                vec![
                    (CharacteristicKind::Name, Some(text("Humidity Sensor"))),
                    (
                        CharacteristicKind::CurrentRelativeHumidity,
                        Some(CharacteristicValue::Float(1.0)),
                    ),
                ],
            )
            .service(
                ServiceKind::TemperatureSensor,
                true,
                vec![
                    (CharacteristicKind::Name, Some(text("Temperature Sensor"))),
                    (
                        CharacteristicKind::CurrentTemperature,
                        Some(CharacteristicValue::Float(1.0)),
                    ),
                ],
            )
            .build();

        Self::new(vec![bridge, occupancy, climate])
    }

    pub fn accessories(&self) -> &[Accessory] {
        &self.accessories
    }

    /// First characteristic of `kind` across all accessories.
    pub fn find(&self, kind: CharacteristicKind) -> Option<CharacteristicHandle> {
        self.accessories.iter().find_map(|accessory| {
            accessory
                .characteristics()
                .find(|characteristic| characteristic.kind == kind)
                .map(|characteristic| CharacteristicHandle {
                    aid: accessory.aid,
                    iid: characteristic.iid,
                })
        })
    }

    pub fn sensor_characteristics(&self) -> Result<SensorCharacteristics, AccessoryError> {
        let resolve = |kind: CharacteristicKind| {
            self.find(kind)
                .ok_or(AccessoryError::MissingCharacteristic(kind.as_str()))
        };

        Ok(SensorCharacteristics {
            temperature: resolve(CharacteristicKind::CurrentTemperature)?,
            humidity: resolve(CharacteristicKind::CurrentRelativeHumidity)?,
            occupancy: resolve(CharacteristicKind::OccupancyDetected)?,
        })
    }

    pub fn characteristic(&self, handle: CharacteristicHandle) -> Option<&Characteristic> {
        self.accessories
            .iter()
            .find(|accessory| accessory.aid == handle.aid)?
            .characteristics()
            .find(|characteristic| characteristic.iid == handle.iid)
    }

    fn characteristic_mut(&mut self, handle: CharacteristicHandle) -> Option<&mut Characteristic> {
        self.accessories
            .iter_mut()
            .find(|accessory| accessory.aid == handle.aid)?
            .services
            .iter_mut()
            .flat_map(|service| service.characteristics.iter_mut())
            .find(|characteristic| characteristic.iid == handle.iid)
    }

    pub fn value(&self, handle: CharacteristicHandle) -> Option<&CharacteristicValue> {
        self.characteristic(handle)?.value.as_ref()
    }

    pub fn set_value(
        &mut self,
        handle: CharacteristicHandle,
        value: CharacteristicValue,
    ) -> Result<(), AccessoryError> {
        let characteristic =
            self.characteristic_mut(handle)
                .ok_or(AccessoryError::UnknownCharacteristic {
                    aid: handle.aid,
                    iid: handle.iid,
                })?;

        if characteristic.format != value.format() {
            return Err(AccessoryError::FormatMismatch {
                aid: handle.aid,
                iid: handle.iid,
                expected: characteristic.format,
                actual: value.format(),
            });
        }

        characteristic.value = Some(value);
        Ok(())
    }

    /// Identify routine, run when a controller pairs or taps "Identify".
    pub fn identify(&self, aid: u64) -> Result<(), AccessoryError> {
        if !self.accessories.iter().any(|accessory| accessory.aid == aid) {
            return Err(AccessoryError::UnknownAccessory(aid));
        }
        info!("accessory identify (aid {aid})");
        Ok(())
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
