pub mod accessory;
pub mod bridge;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod publisher;
pub mod sampler;
pub mod sampling_loop;
pub mod schedule;
pub mod topics;
pub mod types;

#[cfg(test)]
mod testing;

pub use accessory::{AccessoryDatabase, CharacteristicHandle, SensorCharacteristics};
pub use bridge::{BridgeCommand, BridgeTransport, MqttBridgeServer};
pub use config::{RuntimeConfig, SamplingConfig};
pub use diagnostics::{DiagnosticReport, DiagnosticReporter, MemoryProbe};
pub use error::{AccessoryError, BridgeError, ConfigError};
pub use publisher::{AccessoryServer, PublishSummary, Publisher};
pub use sampler::{ClimateSensor, Sampler, TemperatureCalibration};
pub use sampling_loop::{SamplingLoop, TickOutcome};
pub use schedule::{Deadline, ScheduleState};
pub use topics::*;
pub use types::{CharacteristicValue, SampleReading, SensorModel};
