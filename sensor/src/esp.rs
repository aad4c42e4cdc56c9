use core::convert::TryInto;
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{self, Receiver, Sender},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use dht_sensor::{dht11, dht22};
use embedded_svc::{
    mqtt::client::QoS,
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::{Ets, FreeRtos},
    gpio::{AnyIOPin, AnyInputPin, AnyOutputPin, Input, InputOutput, Output, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    log::EspLogger,
    mqtt::client::{
        EspMqttClient, EspMqttConnection, EventPayload, LwtConfiguration, MqttClientConfiguration,
    },
    nvs::{EspDefaultNvsPartition, EspNvs},
    sys::EspError,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};

use homekit_sensor_common::{
    config::{NetworkConfig, PinConfig},
    AccessoryDatabase, AccessoryServer, BridgeCommand, BridgeTransport, ClimateSensor,
    DiagnosticReporter, MemoryProbe, MqttBridgeServer, Publisher, RuntimeConfig, Sampler,
    SamplingLoop, ScheduleState, SensorModel, TemperatureCalibration, TOPIC_BRIDGE_STATUS,
};

const NVS_NAMESPACE: &str = "homekit";
const NVS_RUNTIME_KEY: &str = "runtime_json";

const WATCHDOG_TIMEOUT_SEC: u32 = 30;
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;
const WIFI_RECONNECT_INTERVAL_MS: u64 = 30_000;

/// DHT11/DHT22 on a single open-drain line.
///
/// Temperature and humidity come out of one conversion, so a second read
/// inside the chip's minimum sampling period returns the cached pair.
struct DhtSensor {
    pin: PinDriver<'static, AnyIOPin, InputOutput>,
    delay: Ets,
    model: SensorModel,
    gpio: i32,
    last: Option<(f32, f32)>,
    last_conversion: Option<Instant>,
}

impl DhtSensor {
    fn new(pins: &PinConfig) -> anyhow::Result<Self> {
        let mut pin = PinDriver::input_output_od(unsafe { AnyIOPin::new(pins.dht_pin) })?;
        pin.set_pull(Pull::Up)?;
        pin.set_high()?;

        info!(
            "{} configured on GPIO{}",
            pins.sensor_model.as_str(),
            pins.dht_pin
        );

        Ok(Self {
            pin,
            delay: Ets,
            model: pins.sensor_model,
            gpio: pins.dht_pin,
            last: None,
            last_conversion: None,
        })
    }

    fn convert(&mut self) -> Option<(f32, f32)> {
        if let Some(at) = self.last_conversion {
            if (at.elapsed().as_millis() as u64) < self.model.min_sampling_period_ms() {
                return self.last;
            }
        }
        self.last_conversion = Some(Instant::now());

        if let Err(err) = self.pin.set_high() {
            warn!("failed to release DHT line before read: {err:?}");
            self.last = None;
            return None;
        }

        let result = match self.model {
            SensorModel::Dht11 => dht11::blocking::read(&mut self.delay, &mut self.pin)
                .map(|reading| (reading.temperature as f32, reading.relative_humidity as f32)),
            SensorModel::Dht22 => dht22::blocking::read(&mut self.delay, &mut self.pin)
                .map(|reading| (reading.temperature, reading.relative_humidity)),
        };

        self.last = match result {
            Ok(pair) => Some(pair),
            Err(err) => {
                warn!(
                    "failed to read {} on GPIO{}: {err:?}",
                    self.model.as_str(),
                    self.gpio
                );
                None
            }
        };
        self.last
    }
}

impl ClimateSensor for DhtSensor {
    fn read_temperature(&mut self) -> f32 {
        self.convert().map_or(f32::NAN, |(temperature, _)| temperature)
    }

    fn read_humidity(&mut self) -> f32 {
        self.convert().map_or(f32::NAN, |(_, humidity)| humidity)
    }
}

struct EspHeap;

impl MemoryProbe for EspHeap {
    fn free_heap_bytes(&self) -> Option<u32> {
        Some(unsafe { esp_idf_svc::sys::esp_get_free_heap_size() })
    }
}

struct EspMqttTransport {
    client: EspMqttClient<'static>,
    connected: Arc<AtomicBool>,
    commands: Receiver<BridgeCommand>,
}

impl BridgeTransport for EspMqttTransport {
    type Error = EspError;

    fn publish(&mut self, topic: &str, retain: bool, payload: &[u8]) -> Result<(), Self::Error> {
        self.client
            .enqueue(topic, QoS::AtLeastOnce, retain, payload)
            .map(|_| ())
    }

    fn subscribe(&mut self, filter: &str) -> Result<(), Self::Error> {
        self.client.subscribe(filter, QoS::AtLeastOnce).map(|_| ())
    }

    fn try_next_command(&mut self) -> Option<BridgeCommand> {
        self.commands.try_recv().ok()
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }
}

#[derive(Clone)]
struct NvsStore {
    partition: EspDefaultNvsPartition,
}

impl NvsStore {
    fn load_runtime_config(&self) -> anyhow::Result<RuntimeConfig> {
        let nvs = EspNvs::new(self.partition.clone(), NVS_NAMESPACE, true)?;
        let mut buffer = vec![0_u8; 4096];

        match nvs.get_str(NVS_RUNTIME_KEY, &mut buffer)? {
            Some(value) => Ok(serde_json::from_str::<RuntimeConfig>(value)?),
            None => Ok(RuntimeConfig::default()),
        }
    }
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let nvs_store = NvsStore {
        partition: nvs_partition.clone(),
    };

    let mut runtime = nvs_store.load_runtime_config().unwrap_or_else(|err| {
        warn!("failed to load runtime config from NVS: {err:#}");
        RuntimeConfig::default()
    });
    runtime.sampling.sanitize();
    runtime.validate().context("invalid runtime config")?;

    let Peripherals { modem, .. } = Peripherals::take()?;

    let sensor = DhtSensor::new(&runtime.pins).context("failed to initialize DHT sensor")?;
    let occupancy: PinDriver<'static, AnyInputPin, Input> =
        PinDriver::input(unsafe { AnyInputPin::new(runtime.pins.occupancy_pin) })
            .context("failed to configure occupancy input")?;
    let indicator: PinDriver<'static, AnyOutputPin, Output> =
        PinDriver::output(unsafe { AnyOutputPin::new(runtime.pins.indicator_pin) })
            .context("failed to configure indicator output")?;

    let mut wifi = connect_wifi(modem, sys_loop, nvs_partition, &runtime.network)
        .context("wifi startup failed")?;

    init_watchdog(WATCHDOG_TIMEOUT_SEC)?;
    add_current_task_to_watchdog()?;

    let connected = Arc::new(AtomicBool::new(false));
    let (client, conn) = create_mqtt_client(&runtime.network)?;
    let (command_tx, command_rx) = mpsc::channel();
    spawn_mqtt_poll(conn, connected.clone(), command_tx);

    let mut server = MqttBridgeServer::new(EspMqttTransport {
        client,
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
            sensor,
            occupancy,
            TemperatureCalibration::new(runtime.sampling.temperature_offset_c),
        ),
        Publisher::new(handles, indicator),
        DiagnosticReporter::new(EspHeap),
    );
    let mut schedule = ScheduleState::from_config(&runtime.sampling);
    let mut last_wifi_check = Instant::now();

    loop {
        feed_watchdog();

        if last_wifi_check.elapsed().as_millis() as u64 >= WIFI_RECONNECT_INTERVAL_MS {
            last_wifi_check = Instant::now();
            ensure_wifi_connected(&mut wifi);
        }

        sampling.tick(millis(), &mut schedule, &mut server);
        FreeRtos::delay_ms(runtime.sampling.tick_delay_ms);
    }
}

/// Milliseconds since boot on the wrapping 32-bit counter.
fn millis() -> u32 {
    let micros = unsafe { esp_idf_svc::sys::esp_timer_get_time() };
    (micros / 1_000) as u32
}

fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
    network: &NetworkConfig,
) -> anyhow::Result<BlockingWifi<EspWifi<'static>>> {
    if network.wifi_ssid.is_empty() {
        return Err(anyhow!("wifi credentials missing from runtime config"));
    }

    let esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(esp_wifi, sys_loop)?;

    let auth_method = if network.wifi_pass.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: network
            .wifi_ssid
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: network
            .wifi_pass
            .as_str()
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{}`", network.wifi_ssid);

    let mut last_err = None;
    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected on attempt {attempt}");
                return Ok(wifi);
            }
            Err(err) => {
                warn!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS} failed: {err:#}");
                last_err = Some(err);
            }
        }

        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    Err(anyhow!(
        "all {WIFI_CONNECT_ATTEMPTS} wifi connect attempts failed: {:?}",
        last_err
    ))
}

fn ensure_wifi_connected(wifi: &mut BlockingWifi<EspWifi<'static>>) {
    match wifi.is_connected() {
        Ok(true) => {}
        Ok(false) => {
            warn!("wifi disconnected; reconnecting");
            if let Err(err) = wifi.connect().and_then(|()| wifi.wait_netif_up()) {
                warn!("wifi reconnect failed: {err:#}");
            }
        }
        Err(err) => warn!("failed to query wifi state: {err:?}"),
    }
}

fn create_mqtt_client(
    network: &NetworkConfig,
) -> anyhow::Result<(EspMqttClient<'static>, EspMqttConnection)> {
    let url = format!("mqtt://{}:{}", network.mqtt_host, network.mqtt_port);

    let conf = MqttClientConfiguration {
        client_id: Some("homekit-sensor"),
        username: if network.mqtt_user.is_empty() {
            None
        } else {
            Some(network.mqtt_user.as_str())
        },
        password: if network.mqtt_pass.is_empty() {
            None
        } else {
            Some(network.mqtt_pass.as_str())
        },
        lwt: Some(LwtConfiguration {
            topic: TOPIC_BRIDGE_STATUS,
            payload: b"offline",
            qos: QoS::AtLeastOnce,
            retain: true,
        }),
        ..Default::default()
    };

    Ok(EspMqttClient::new(&url, &conf)?)
}

fn spawn_mqtt_poll(
    mut conn: EspMqttConnection,
    connected: Arc<AtomicBool>,
    commands: Sender<BridgeCommand>,
) {
    thread::Builder::new()
        .name("mqtt-poll".to_string())
        .stack_size(8192)
        .spawn(move || loop {
            match conn.next() {
                Ok(event) => match event.payload() {
                    EventPayload::Connected(_) => {
                        info!("mqtt connected");
                        connected.store(true, Ordering::Relaxed);
                    }
                    EventPayload::Disconnected => {
                        warn!("mqtt disconnected");
                        connected.store(false, Ordering::Relaxed);
                    }
                    EventPayload::Received { topic: Some(topic), .. } => {
                        if let Some(command) = BridgeCommand::from_topic(topic) {
                            if commands.send(command).is_err() {
                                warn!("bridge command dropped; sampling loop is gone");
                            }
                        }
                    }
                    _ => {}
                },
                Err(err) => {
                    warn!("mqtt poll error: {err:?}");
                    connected.store(false, Ordering::Relaxed);
                    thread::sleep(Duration::from_secs(2));
                }
            }
        })
        .expect("failed to spawn mqtt thread");
}

fn init_watchdog(timeout_sec: u32) -> anyhow::Result<()> {
    let config = esp_idf_svc::sys::esp_task_wdt_config_t {
        timeout_ms: timeout_sec.saturating_mul(1000),
        idle_core_mask: 0,
        trigger_panic: true,
    };
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_init(&config) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_init failed with code {}", rc))
}

fn add_current_task_to_watchdog() -> anyhow::Result<()> {
    let rc = unsafe { esp_idf_svc::sys::esp_task_wdt_add(core::ptr::null_mut()) };
    if rc == esp_idf_svc::sys::ESP_OK || rc == esp_idf_svc::sys::ESP_ERR_INVALID_STATE {
        return Ok(());
    }
    Err(anyhow!("esp_task_wdt_add failed with code {}", rc))
}

fn feed_watchdog() {
    let _ = unsafe { esp_idf_svc::sys::esp_task_wdt_reset() };
}
