use embedded_hal::digital::{OutputPin, PinState};
use log::{info, warn};

use crate::{
    accessory::{AccessoryDatabase, CharacteristicHandle, SensorCharacteristics},
    types::{CharacteristicValue, SampleReading},
};

/// The HomeKit side of the node.
///
/// Implementations own the accessory database and whatever transport
/// delivers characteristic changes to controllers. Delivery failures stay
/// inside the implementation.
pub trait AccessoryServer {
    type Error;

    /// Takes ownership of the database, starts advertising it and hands back
    /// the handles the sampling loop writes to.
    fn setup(&mut self, database: AccessoryDatabase) -> Result<SensorCharacteristics, Self::Error>;

    /// Services pending protocol work. Called once per tick.
    fn poll(&mut self);

    fn connected_client_count(&self) -> usize;

    /// Stores `value` on the characteristic and pushes it to subscribers.
    fn notify(&mut self, characteristic: CharacteristicHandle, value: CharacteristicValue);
}

/// What one report tick pushed to the server.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PublishSummary {
    /// Calibrated temperature and humidity, when both were valid.
    pub climate: Option<(f32, f32)>,
    pub occupied: bool,
}

pub struct Publisher<O> {
    characteristics: SensorCharacteristics,
    indicator: O,
}

impl<O: OutputPin> Publisher<O> {
    pub fn new(characteristics: SensorCharacteristics, indicator: O) -> Self {
        Self {
            characteristics,
            indicator,
        }
    }

    pub fn characteristics(&self) -> SensorCharacteristics {
        self.characteristics
    }

    pub fn publish<A: AccessoryServer>(
        &mut self,
        server: &mut A,
        reading: &SampleReading,
    ) -> PublishSummary {
        let climate = reading.climate();

        match climate {
            Some((temperature, humidity)) => {
                server.notify(
                    self.characteristics.temperature,
                    CharacteristicValue::Float(temperature),
                );
                server.notify(
                    self.characteristics.humidity,
                    CharacteristicValue::Float(humidity),
                );
                info!("Temp (C): {temperature:.1}");
                info!("Hum (percent): {humidity:.0}");
            }
            None => warn!("Failed to read from DHT sensor!"),
        }

        if let Err(err) = self
            .indicator
            .set_state(PinState::from(reading.occupied))
        {
            warn!("failed to drive occupancy indicator: {err:?}");
        }

        server.notify(
            self.characteristics.occupancy,
            CharacteristicValue::Bool(reading.occupied),
        );
        info!(
            "Occupancy sensor is: {}",
            if reading.occupied {
                "active"
            } else {
                "inactive"
            }
        );

        PublishSummary {
            climate,
            occupied: reading.occupied,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::testing::{RecordingPin, RecordingServer};

    fn setup() -> (RecordingServer, Publisher<RecordingPin>, RecordingPin) {
        let mut server = RecordingServer::default();
        let handles = server.setup(RecordingServer::database()).unwrap();
        let pin = RecordingPin::default();
        (server, Publisher::new(handles, pin.clone()), pin)
    }

    #[test]
    fn invalid_temperature_publishes_only_occupancy() {
        let (mut server, mut publisher, pin) = setup();
        let handles = publisher.characteristics();

        let summary = publisher.publish(
            &mut server,
            &SampleReading {
                temperature_c: None,
                humidity_pct: Some(20.0),
                occupied: true,
            },
        );

        assert_eq!(summary.climate, None);
        assert_eq!(
            server.notifications,
            vec![(handles.occupancy, CharacteristicValue::Bool(true))]
        );
        assert_eq!(pin.states(), vec![PinState::High]);
    }

    #[test]
    fn invalid_humidity_publishes_only_occupancy() {
        let (mut server, mut publisher, _pin) = setup();
        let handles = publisher.characteristics();

        publisher.publish(
            &mut server,
            &SampleReading {
                temperature_c: Some(19.0),
                humidity_pct: None,
                occupied: false,
            },
        );

        assert_eq!(
            server.notifications,
            vec![(handles.occupancy, CharacteristicValue::Bool(false))]
        );
    }

    #[test]
    fn valid_reading_publishes_all_three_in_order() {
        let (mut server, mut publisher, pin) = setup();
        let handles = publisher.characteristics();

        let summary = publisher.publish(
            &mut server,
            &SampleReading {
                temperature_c: Some(18.0),
                humidity_pct: Some(40.0),
                occupied: false,
            },
        );

        assert_eq!(summary.climate, Some((18.0, 40.0)));
        assert_eq!(
            server.notifications,
            vec![
                (handles.temperature, CharacteristicValue::Float(18.0)),
                (handles.humidity, CharacteristicValue::Float(40.0)),
                (handles.occupancy, CharacteristicValue::Bool(false)),
            ]
        );
        assert_eq!(pin.states(), vec![PinState::Low]);
        assert_eq!(
            server.value(handles.humidity),
            Some(CharacteristicValue::Float(40.0))
        );
    }
}
