//! Accessory server that mirrors the accessory database onto MQTT topics for
//! an external HomeKit bridge process.

use core::fmt::Debug;

use log::{info, warn};

use crate::{
    accessory::{AccessoryDatabase, CharacteristicHandle, SensorCharacteristics},
    error::BridgeError,
    publisher::AccessoryServer,
    topics::{
        characteristic_topic, parse_identify_topic, TOPIC_BRIDGE_ACCESSORIES,
        TOPIC_BRIDGE_STATUS, TOPIC_IDENTIFY_FILTER,
    },
    types::{CharacteristicEvent, CharacteristicValue},
};

/// Request sent by the bridge process to one of our accessories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeCommand {
    Identify { aid: u64 },
}

impl BridgeCommand {
    /// Decodes an incoming publish. Unrelated topics yield `None`.
    pub fn from_topic(topic: &str) -> Option<Self> {
        parse_identify_topic(topic).map(|aid| Self::Identify { aid })
    }
}

/// Non-blocking side of an MQTT client.
pub trait BridgeTransport {
    type Error: Debug;

    /// Queues a retained-or-not publish without waiting for the broker.
    fn publish(&mut self, topic: &str, retain: bool, payload: &[u8]) -> Result<(), Self::Error>;

    /// Queues a subscription without waiting for the broker.
    fn subscribe(&mut self, filter: &str) -> Result<(), Self::Error>;

    /// Next command forwarded by the client's event loop, if any.
    fn try_next_command(&mut self) -> Option<BridgeCommand>;

    fn is_connected(&self) -> bool;
}

pub struct MqttBridgeServer<T> {
    transport: T,
    database: Option<AccessoryDatabase>,
    was_connected: bool,
}

impl<T: BridgeTransport> MqttBridgeServer<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            database: None,
            was_connected: false,
        }
    }

    pub fn database(&self) -> Option<&AccessoryDatabase> {
        self.database.as_ref()
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    fn send(&mut self, topic: &str, retain: bool, payload: &[u8]) -> Result<(), BridgeError> {
        self.transport
            .publish(topic, retain, payload)
            .map_err(|err| rejected(topic, err))
    }

    /// Runs a command received from the bridge process.
    pub fn handle(&mut self, command: BridgeCommand) -> Result<(), BridgeError> {
        let database = self.database.as_ref().ok_or(BridgeError::NotSetUp)?;
        match command {
            BridgeCommand::Identify { aid } => database.identify(aid)?,
        }
        Ok(())
    }

    /// Subscribes to commands, then publishes the accessory layout, the
    /// online marker and every current characteristic value, all retained.
    fn announce(&mut self) -> Result<(), BridgeError> {
        let Some(database) = self.database.as_ref() else {
            return Ok(());
        };

        let layout = database.to_json()?;
        let mut events = Vec::new();
        for accessory in database.accessories() {
            for service in &accessory.services {
                for characteristic in &service.characteristics {
                    if let Some(value) = &characteristic.value {
                        events.push(CharacteristicEvent {
                            aid: accessory.aid,
                            iid: characteristic.iid,
                            value: value.clone(),
                        });
                    }
                }
            }
        }

        self.transport
            .subscribe(TOPIC_IDENTIFY_FILTER)
            .map_err(|err| rejected(TOPIC_IDENTIFY_FILTER, err))?;
        self.send(TOPIC_BRIDGE_ACCESSORIES, true, layout.as_bytes())?;
        self.send(TOPIC_BRIDGE_STATUS, true, b"online")?;
        for event in events {
            self.send_event(&event)?;
        }
        Ok(())
    }

    fn send_event(&mut self, event: &CharacteristicEvent) -> Result<(), BridgeError> {
        let payload = serde_json::to_vec(event)?;
        self.send(&characteristic_topic(event.aid, event.iid), true, &payload)
    }
}

fn rejected(topic: &str, err: impl Debug) -> BridgeError {
    BridgeError::Transport {
        topic: topic.to_string(),
        reason: format!("{err:?}"),
    }
}

impl<T: BridgeTransport> AccessoryServer for MqttBridgeServer<T> {
    type Error = BridgeError;

    fn setup(&mut self, database: AccessoryDatabase) -> Result<SensorCharacteristics, Self::Error> {
        let handles = database.sensor_characteristics()?;
        for accessory in database.accessories() {
            info!(
                "accessory {} ({:?}, ci={}) with {} service(s)",
                accessory.aid,
                accessory.category,
                accessory.category.code(),
                accessory.services.len()
            );
        }

        self.database = Some(database);
        self.was_connected = self.transport.is_connected();
        self.announce()?;
        Ok(handles)
    }

    fn poll(&mut self) {
        let connected = self.transport.is_connected();
        if connected && !self.was_connected {
            info!("bridge session established; republishing accessories");
            if let Err(err) = self.announce() {
                warn!("failed to republish accessories: {err}");
            }
        }
        self.was_connected = connected;

        while let Some(command) = self.transport.try_next_command() {
            if let Err(err) = self.handle(command) {
                warn!("bridge command {command:?} failed: {err}");
            }
        }
    }

    fn connected_client_count(&self) -> usize {
        usize::from(self.transport.is_connected())
    }

    fn notify(&mut self, characteristic: CharacteristicHandle, value: CharacteristicValue) {
        let Some(database) = self.database.as_mut() else {
            warn!("notify before setup dropped for aid {}", characteristic.aid);
            return;
        };

        if let Err(err) = database.set_value(characteristic, value.clone()) {
            warn!("failed to update characteristic: {err}");
            return;
        }

        let event = CharacteristicEvent {
            aid: characteristic.aid,
            iid: characteristic.iid,
            value,
        };
        if let Err(err) = self.send_event(&event) {
            warn!("failed to notify characteristic: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::Cell, collections::VecDeque, rc::Rc};

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{error::AccessoryError, testing::RecordingServer, topics::identify_topic};

    #[derive(Debug, Default)]
    struct FakeTransport {
        connected: Rc<Cell<bool>>,
        reject: bool,
        sent: Vec<(String, bool, Vec<u8>)>,
        subscriptions: Vec<String>,
        commands: VecDeque<BridgeCommand>,
    }

    impl BridgeTransport for FakeTransport {
        type Error = &'static str;

        fn publish(
            &mut self,
            topic: &str,
            retain: bool,
            payload: &[u8],
        ) -> Result<(), Self::Error> {
            if self.reject {
                return Err("queue full");
            }
            self.sent.push((topic.to_string(), retain, payload.to_vec()));
            Ok(())
        }

        fn subscribe(&mut self, filter: &str) -> Result<(), Self::Error> {
            if self.reject {
                return Err("queue full");
            }
            self.subscriptions.push(filter.to_string());
            Ok(())
        }

        fn try_next_command(&mut self) -> Option<BridgeCommand> {
            self.commands.pop_front()
        }

        fn is_connected(&self) -> bool {
            self.connected.get()
        }
    }

    fn topics(server: &MqttBridgeServer<FakeTransport>) -> Vec<&str> {
        server
            .transport()
            .sent
            .iter()
            .map(|(topic, _, _)| topic.as_str())
            .collect()
    }

    #[test]
    fn setup_announces_layout_and_values() {
        let mut server = MqttBridgeServer::new(FakeTransport::default());

        let handles = server.setup(RecordingServer::database()).unwrap();

        let sent = topics(&server);
        assert_eq!(sent[0], TOPIC_BRIDGE_ACCESSORIES);
        assert_eq!(sent[1], TOPIC_BRIDGE_STATUS);
        assert!(sent.contains(&characteristic_topic(3, 9).as_str()));
        assert_eq!(handles.temperature, CharacteristicHandle { aid: 3, iid: 9 });
        assert!(server.transport().sent.iter().all(|(_, retain, _)| *retain));
    }

    #[test]
    fn notify_updates_database_and_publishes_event() {
        let mut server = MqttBridgeServer::new(FakeTransport::default());
        let handles = server.setup(RecordingServer::database()).unwrap();
        let announced = server.transport().sent.len();

        server.notify(handles.occupancy, CharacteristicValue::Bool(true));

        let (topic, retain, payload) = &server.transport().sent[announced];
        assert_eq!(topic, "homekit/sensor/characteristic/2/5");
        assert!(*retain);
        assert_eq!(
            std::str::from_utf8(payload).unwrap(),
            r#"{"aid":2,"iid":5,"value":true}"#
        );
        assert_eq!(
            server.database().and_then(|db| db.value(handles.occupancy)),
            Some(&CharacteristicValue::Bool(true))
        );
    }

    #[test]
    fn notify_with_wrong_format_is_dropped() {
        let mut server = MqttBridgeServer::new(FakeTransport::default());
        let handles = server.setup(RecordingServer::database()).unwrap();
        let announced = server.transport().sent.len();

        server.notify(handles.occupancy, CharacteristicValue::Float(1.0));

        assert_eq!(server.transport().sent.len(), announced);
    }

    #[test]
    fn transport_failure_is_swallowed_by_notify() {
        let mut server = MqttBridgeServer::new(FakeTransport::default());
        let handles = server.setup(RecordingServer::database()).unwrap();
        server.transport.reject = true;

        server.notify(handles.temperature, CharacteristicValue::Float(20.0));

        assert_eq!(
            server.database().and_then(|db| db.value(handles.temperature)),
            Some(&CharacteristicValue::Float(20.0))
        );
    }

    #[test]
    fn setup_fails_when_transport_rejects() {
        let mut server = MqttBridgeServer::new(FakeTransport {
            reject: true,
            ..FakeTransport::default()
        });

        assert!(matches!(
            server.setup(RecordingServer::database()),
            Err(BridgeError::Transport { .. })
        ));
    }

    #[test]
    fn reconnect_republishes_and_counts_client() {
        let connected = Rc::new(Cell::new(false));
        let mut server = MqttBridgeServer::new(FakeTransport {
            connected: connected.clone(),
            ..FakeTransport::default()
        });
        server.setup(RecordingServer::database()).unwrap();
        let announced = server.transport().sent.len();
        assert_eq!(server.connected_client_count(), 0);

        server.poll();
        assert_eq!(server.transport().sent.len(), announced);

        connected.set(true);
        server.poll();
        assert_eq!(server.transport().sent.len(), 2 * announced);
        assert_eq!(server.transport().subscriptions.len(), 2);
        assert_eq!(server.connected_client_count(), 1);

        server.poll();
        assert_eq!(server.transport().sent.len(), 2 * announced);
    }

    #[test]
    fn setup_subscribes_to_identify_requests() {
        let mut server = MqttBridgeServer::new(FakeTransport::default());

        server.setup(RecordingServer::database()).unwrap();

        assert_eq!(server.transport().subscriptions, vec![TOPIC_IDENTIFY_FILTER]);
    }

    #[test]
    fn identify_known_accessory_succeeds() {
        let mut server = MqttBridgeServer::new(FakeTransport::default());
        server.setup(RecordingServer::database()).unwrap();

        let command = BridgeCommand::from_topic(&identify_topic(2)).unwrap();

        assert_eq!(command, BridgeCommand::Identify { aid: 2 });
        assert!(server.handle(command).is_ok());
    }

    #[test]
    fn identify_unknown_accessory_is_rejected() {
        let mut server = MqttBridgeServer::new(FakeTransport::default());
        server.setup(RecordingServer::database()).unwrap();

        assert!(matches!(
            server.handle(BridgeCommand::Identify { aid: 9 }),
            Err(BridgeError::Accessory(AccessoryError::UnknownAccessory(9)))
        ));
    }

    #[test]
    fn identify_before_setup_is_rejected() {
        let mut server = MqttBridgeServer::new(FakeTransport::default());

        assert!(matches!(
            server.handle(BridgeCommand::Identify { aid: 2 }),
            Err(BridgeError::NotSetUp)
        ));
    }

    #[test]
    fn poll_drains_queued_commands() {
        let mut server = MqttBridgeServer::new(FakeTransport::default());
        server.setup(RecordingServer::database()).unwrap();
        let announced = server.transport().sent.len();
        server.transport.commands.extend([
            BridgeCommand::Identify { aid: 2 },
            BridgeCommand::Identify { aid: 9 },
            BridgeCommand::Identify { aid: 3 },
        ]);

        server.poll();

        assert!(server.transport().commands.is_empty());
        assert_eq!(server.transport().sent.len(), announced);
    }
}
