use std::{
    convert::Infallible,
    io::ErrorKind,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use anyhow::Context;
use embedded_hal::digital::{ErrorType, InputPin, OutputPin};
use rumqttc::{AsyncClient, ClientError, Event, Incoming, LastWill, MqttOptions, QoS};
use tokio::{
    sync::mpsc::{self, UnboundedReceiver, UnboundedSender},
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use homekit_sensor_common::{
    config::NetworkConfig, AccessoryDatabase, AccessoryServer, BridgeCommand, BridgeTransport,
    ClimateSensor, DiagnosticReporter, MemoryProbe, MqttBridgeServer, Publisher, RuntimeConfig,
    Sampler, SamplingLoop, ScheduleState, TemperatureCalibration, TOPIC_BRIDGE_STATUS,
};

// Every Nth simulated conversion fails the way a DHT checksum error does.
const SIMULATED_FAILURE_EVERY: u32 = 17;
const SIMULATED_OCCUPANCY_PERIOD: u32 = 5;

/// Stand-in for the DHT chip: a slow sawtooth with periodic read failures.
#[derive(Debug, Default)]
struct SimulatedDht {
    conversions: u32,
}

impl SimulatedDht {
    fn failed(&self) -> bool {
        self.conversions % SIMULATED_FAILURE_EVERY == 0
    }
}

impl ClimateSensor for SimulatedDht {
    fn read_temperature(&mut self) -> f32 {
        self.conversions = self.conversions.wrapping_add(1);
        if self.failed() {
            return f32::NAN;
        }
        24.0 + (self.conversions % 8) as f32 * 0.2
    }

    fn read_humidity(&mut self) -> f32 {
        if self.failed() {
            return f32::NAN;
        }
        42.0 + (self.conversions % 6) as f32 * 0.5
    }
}

/// Occupancy input that flips every few reads.
#[derive(Debug, Default)]
struct SimulatedOccupancy {
    reads: u32,
}

impl ErrorType for SimulatedOccupancy {
    type Error = Infallible;
}

impl InputPin for SimulatedOccupancy {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        self.reads = self.reads.wrapping_add(1);
        Ok((self.reads / SIMULATED_OCCUPANCY_PERIOD) % 2 == 1)
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        self.is_high().map(|high| !high)
    }
}

/// Indicator output that only logs level changes.
#[derive(Debug, Default)]
struct LoggingIndicator {
    high: Option<bool>,
}

impl LoggingIndicator {
    fn drive(&mut self, high: bool) {
        if self.high != Some(high) {
            debug!("indicator pin -> {}", if high { "HIGH" } else { "LOW" });
        }
        self.high = Some(high);
    }
}

impl ErrorType for LoggingIndicator {
    type Error = Infallible;
}

impl OutputPin for LoggingIndicator {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.drive(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.drive(true);
        Ok(())
    }
}

struct HostHeap;

impl MemoryProbe for HostHeap {
    fn free_heap_bytes(&self) -> Option<u32> {
        None
    }
}

struct RumqttTransport {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    commands: UnboundedReceiver<BridgeCommand>,
}

impl BridgeTransport for RumqttTransport {
    type Error = ClientError;

    fn publish(&mut self, topic: &str, retain: bool, payload: &[u8]) -> Result<(), Self::Error> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, retain, payload.to_vec())
    }

    fn subscribe(&mut self, filter: &str) -> Result<(), Self::Error> {
        self.client.try_subscribe(filter, QoS::AtLeastOnce)
    }

    fn try_next_command(&mut self) -> Option<BridgeCommand> {
        self.commands.try_recv().ok()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

struct ConfigStore {
    runtime_path: PathBuf,
}

impl ConfigStore {
    fn from_env() -> Self {
        Self::new(std::env::var_os("HOMEKIT_SENSOR_DATA_DIR").map(PathBuf::from))
    }

    fn new(data_dir: Option<PathBuf>) -> Self {
        let data_dir = data_dir.unwrap_or_else(|| PathBuf::from("./.homekit-sensor"));
        Self::in_dir(&data_dir)
    }

    fn in_dir(data_dir: &Path) -> Self {
        Self {
            runtime_path: data_dir.join("runtime.json"),
        }
    }

    async fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        match tokio::fs::read(&self.runtime_path).await {
            Ok(raw) => Ok(serde_json::from_slice::<RuntimeConfig>(&raw)?),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(RuntimeConfig::default()),
            Err(err) => Err(err.into()),
        }
    }
}

/// Broker settings taken from the environment, applied over the config file.
#[derive(Debug, Default)]
struct MqttOverrides {
    host: Option<String>,
    port: Option<String>,
    user: Option<String>,
    pass: Option<String>,
}

impl MqttOverrides {
    fn from_env() -> Self {
        Self {
            host: std::env::var("MQTT_HOST").ok(),
            port: std::env::var("MQTT_PORT").ok(),
            user: std::env::var("MQTT_USER").ok(),
            pass: std::env::var("MQTT_PASS").ok(),
        }
    }

    fn apply(self, network: &mut NetworkConfig) {
        if let Some(host) = self.host {
            network.mqtt_host = host;
        }
        if let Some(port) = self.port {
            match port.parse::<u16>() {
                Ok(port) => network.mqtt_port = port,
                Err(_) => warn!("ignoring malformed MQTT_PORT `{port}`"),
            }
        }
        if let Some(user) = self.user {
            network.mqtt_user = user;
        }
        if let Some(pass) = self.pass {
            network.mqtt_pass = pass;
        }
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = ConfigStore::from_env();
    let mut runtime = store.load_runtime_config().await.unwrap_or_else(|err| {
        warn!(
            "failed to load runtime config from {}: {err:#}",
            store.runtime_path.display()
        );
        RuntimeConfig::default()
    });
    MqttOverrides::from_env().apply(&mut runtime.network);
    runtime.sampling.sanitize();
    runtime.validate().context("invalid runtime config")?;

    let network = &runtime.network;
    let mut mqtt_options = MqttOptions::new(
        "homekit-sensor-rust",
        network.mqtt_host.clone(),
        network.mqtt_port,
    );
    mqtt_options.set_last_will(LastWill::new(
        TOPIC_BRIDGE_STATUS,
        "offline",
        QoS::AtLeastOnce,
        true,
    ));
    if !network.mqtt_user.is_empty() {
        mqtt_options.set_credentials(network.mqtt_user.clone(), network.mqtt_pass.clone());
    }

    let (mqtt, eventloop) = AsyncClient::new(mqtt_options, 64);
    let connected = Arc::new(AtomicBool::new(false));
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    spawn_mqtt_loop(eventloop, connected.clone(), command_tx);

    let mut server = MqttBridgeServer::new(RumqttTransport {
        client: mqtt.clone(),
        connected,
        commands: command_rx,
    });
    let database = AccessoryDatabase::sensor_bridge(&runtime.accessory)
        .context("failed to build accessory database")?;
    let handles = server
        .setup(database)
        .context("failed to set up accessory server")?;
    info!(
        "accessory server ready (setup code {})",
        runtime.accessory.setup_code
    );

    let mut sampling = SamplingLoop::new(
        Sampler::new(
            SimulatedDht::default(),
            SimulatedOccupancy::default(),
            TemperatureCalibration::new(runtime.sampling.temperature_offset_c),
        ),
        Publisher::new(handles, LoggingIndicator::default()),
        DiagnosticReporter::new(HostHeap),
    );
    let mut schedule = ScheduleState::from_config(&runtime.sampling);

    let started = Instant::now();
    let mut interval =
        tokio::time::interval(Duration::from_millis(runtime.sampling.tick_delay_ms.into()));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        "sampling loop started (report every {} ms, diagnostics every {} ms)",
        runtime.sampling.report_interval_ms, runtime.sampling.diagnostics_interval_ms
    );

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                // Truncation is the intended wrap of the 32-bit tick counter.
                let now_ms = started.elapsed().as_millis() as u32;
                sampling.tick(now_ms, &mut schedule, &mut server);
            }
            _ = &mut ctrl_c => {
                info!("shutting down");
                break;
            }
        }
    }

    if let Err(err) = mqtt
        .publish(TOPIC_BRIDGE_STATUS, QoS::AtLeastOnce, true, "offline")
        .await
    {
        warn!("failed to publish offline status: {err}");
    }
    Ok(())
}

fn spawn_mqtt_loop(
    mut eventloop: rumqttc::EventLoop,
    connected: Arc<AtomicBool>,
    commands: UnboundedSender<BridgeCommand>,
) {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::Publish(message))) => {
                    match BridgeCommand::from_topic(&message.topic) {
                        Some(command) => {
                            if commands.send(command).is_err() {
                                return;
                            }
                        }
                        None => debug!("ignoring publish on {}", message.topic),
                    }
                }
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    info!("mqtt connected");
                    connected.store(true, Ordering::Relaxed);
                }
                Ok(_) => {}
                Err(err) => {
                    if connected.swap(false, Ordering::Relaxed) {
                        warn!("mqtt connection lost: {err}");
                    } else {
                        warn!("mqtt poll error: {err}");
                    }
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });
}
