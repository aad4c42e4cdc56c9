use thiserror::Error;

use crate::types::CharacteristicFormat;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    ZeroInterval { name: &'static str },
    #[error("{name} of {value_ms} ms exceeds the wrap-safe limit of {limit_ms} ms")]
    IntervalTooLong {
        name: &'static str,
        value_ms: u32,
        limit_ms: u32,
    },
    #[error("temperature offset must be finite, got {0}")]
    NonFiniteOffset(f32),
    #[error("setup code `{0}` must have the form DDD-DD-DDD")]
    MalformedSetupCode(String),
    #[error("setup code `{0}` is not allowed by HomeKit")]
    TrivialSetupCode(String),
    #[error("GPIO{pin} is assigned to both {first} and {second}")]
    PinConflict {
        pin: i32,
        first: &'static str,
        second: &'static str,
    },
}

#[derive(Debug, Error, PartialEq)]
pub enum AccessoryError {
    #[error("no characteristic with aid {aid} iid {iid}")]
    UnknownCharacteristic { aid: u64, iid: u64 },
    #[error("no accessory exposes a {0} characteristic")]
    MissingCharacteristic(&'static str),
    #[error("no accessory with aid {0}")]
    UnknownAccessory(u64),
    #[error("characteristic aid {aid} iid {iid} expects {expected:?}, got {actual:?}")]
    FormatMismatch {
        aid: u64,
        iid: u64,
        expected: CharacteristicFormat,
        actual: CharacteristicFormat,
    },
    #[error("duplicate accessory id {0}")]
    DuplicateAccessory(u64),
}

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error(transparent)]
    Accessory(#[from] AccessoryError),
    #[error("failed to encode bridge payload: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("accessory server has not been set up")]
    NotSetUp,
    #[error("bridge transport rejected `{topic}`: {reason}")]
    Transport { topic: String, reason: String },
}
