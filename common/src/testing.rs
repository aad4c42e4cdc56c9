//! Fakes for the hardware and server seams, shared by the unit tests.

use std::{
    cell::{Cell, RefCell},
    collections::VecDeque,
    convert::Infallible,
    rc::Rc,
};

use embedded_hal::digital::{ErrorType, InputPin, OutputPin, PinState};

use crate::{
    accessory::{AccessoryDatabase, CharacteristicHandle, SensorCharacteristics},
    config::AccessoryConfig,
    diagnostics::MemoryProbe,
    error::AccessoryError,
    publisher::AccessoryServer,
    sampler::ClimateSensor,
    types::CharacteristicValue,
};

#[derive(Debug, Default)]
pub struct RecordingServer {
    pub database: Option<AccessoryDatabase>,
    pub notifications: Vec<(CharacteristicHandle, CharacteristicValue)>,
    pub polls: usize,
    pub clients: usize,
}

impl RecordingServer {
    pub fn database() -> AccessoryDatabase {
        AccessoryDatabase::sensor_bridge(&AccessoryConfig::default()).unwrap()
    }

    pub fn value(&self, handle: CharacteristicHandle) -> Option<CharacteristicValue> {
        self.database.as_ref()?.value(handle).cloned()
    }
}

impl AccessoryServer for RecordingServer {
    type Error = AccessoryError;

    fn setup(&mut self, database: AccessoryDatabase) -> Result<SensorCharacteristics, Self::Error> {
        let handles = database.sensor_characteristics()?;
        self.database = Some(database);
        Ok(handles)
    }

    fn poll(&mut self) {
        self.polls += 1;
    }

    fn connected_client_count(&self) -> usize {
        self.clients
    }

    fn notify(&mut self, characteristic: CharacteristicHandle, value: CharacteristicValue) {
        if let Some(database) = self.database.as_mut() {
            database.set_value(characteristic, value.clone()).unwrap();
        }
        self.notifications.push((characteristic, value));
    }
}

/// Output pin that remembers every state it was driven to.
#[derive(Debug, Clone, Default)]
pub struct RecordingPin {
    states: Rc<RefCell<Vec<PinState>>>,
}

impl RecordingPin {
    pub fn states(&self) -> Vec<PinState> {
        self.states.borrow().clone()
    }
}

impl ErrorType for RecordingPin {
    type Error = Infallible;
}

impl OutputPin for RecordingPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.states.borrow_mut().push(PinState::Low);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.states.borrow_mut().push(PinState::High);
        Ok(())
    }
}

/// Input pin whose level the test flips from outside.
#[derive(Debug, Clone, Default)]
pub struct LevelPin {
    high: Rc<Cell<bool>>,
}

impl LevelPin {
    pub fn set(&self, high: bool) {
        self.high.set(high);
    }
}

impl ErrorType for LevelPin {
    type Error = Infallible;
}

impl InputPin for LevelPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(self.high.get())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.high.get())
    }
}

/// Climate sensor replaying scripted readings, then repeating the fallback.
#[derive(Debug, Clone)]
pub struct ScriptedSensor {
    inner: Rc<RefCell<ScriptedState>>,
}

#[derive(Debug)]
struct ScriptedState {
    readings: VecDeque<(f32, f32)>,
    fallback: (f32, f32),
    current: (f32, f32),
    reads: usize,
}

impl ScriptedSensor {
    pub fn steady(temperature: f32, humidity: f32) -> Self {
        Self::scripted(Vec::new(), (temperature, humidity))
    }

    pub fn scripted(readings: Vec<(f32, f32)>, fallback: (f32, f32)) -> Self {
        Self {
            inner: Rc::new(RefCell::new(ScriptedState {
                readings: readings.into(),
                fallback,
                current: fallback,
                reads: 0,
            })),
        }
    }

    /// Number of temperature conversions requested so far.
    pub fn reads(&self) -> usize {
        self.inner.borrow().reads
    }
}

impl ClimateSensor for ScriptedSensor {
    fn read_temperature(&mut self) -> f32 {
        let mut state = self.inner.borrow_mut();
        state.reads += 1;
        let next = state.readings.pop_front().unwrap_or(state.fallback);
        state.current = next;
        next.0
    }

    fn read_humidity(&mut self) -> f32 {
        self.inner.borrow().current.1
    }
}

#[derive(Debug, Clone, Copy)]
pub struct FixedHeap(pub Option<u32>);

impl MemoryProbe for FixedHeap {
    fn free_heap_bytes(&self) -> Option<u32> {
        self.0
    }
}
