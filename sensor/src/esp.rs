use core::convert::TryInto;
use std::{cell::RefCell, net::Ipv4Addr, sync::mpsc, thread, time::Duration};

use anyhow::{anyhow, Context};
use dht_sensor::{dht22, DhtError};
use embedded_svc::{
    http::{client::Client as HttpClient, Method, Status},
    io::Write,
    mqtt::client::{EventPayload, QoS},
    wifi::{AuthMethod, ClientConfiguration, Configuration},
};
use esp_idf_hal::{
    delay::Ets,
    gpio::{AnyIOPin, AnyOutputPin, IOPin, InputOutput, Output, OutputPin, PinDriver, Pull},
};
use esp_idf_svc::{
    eventloop::EspSystemEventLoop,
    hal::{modem::Modem, prelude::Peripherals},
    http::client::{Configuration as HttpClientConfiguration, EspHttpConnection},
    log::EspLogger,
    mqtt::client::{EspMqttClient, MqttClientConfiguration},
    nvs::EspDefaultNvsPartition,
    sntp::EspSntp,
    sys::EspError,
    wifi::{BlockingWifi, EspWifi},
};
use log::{info, warn};

use indoor_common::{
    name_channel, Board, Clock, ConnectionLoop, FormPost, Indicator, LinkMonitor, MqttConfig,
    NameAnnouncer, NameBroker, NameSubscription, NetworkInfo, NodeConfig, Reading, Registrar,
    RegistrationError, SensorError, SensorReader,
};

use crate::net::NodeListener;

const DHT22_PIN: i32 = 16;
const READ_LED_PIN: i32 = 2;

const WIFI_SSID: &str = match option_env!("WIFI_SSID") {
    Some(ssid) => ssid,
    None => "",
};
const WIFI_PASS: &str = match option_env!("WIFI_PASS") {
    Some(pass) => pass,
    None => "",
};
const WIFI_CONNECT_ATTEMPTS: u32 = 5;
const WIFI_RETRY_DELAY_MS: u64 = 3_000;

/// Build-time settings; the board has no environment to read at runtime.
fn build_setting(key: &str) -> Option<String> {
    let value = match key {
        "AGGREGATOR_HOST" => option_env!("AGGREGATOR_HOST"),
        "AGGREGATOR_PORT" => option_env!("AGGREGATOR_PORT"),
        "NODE_PORT" => option_env!("NODE_PORT"),
        "NODE_GATING" => option_env!("NODE_GATING"),
        "MQTT_HOST" => option_env!("MQTT_HOST"),
        "MQTT_PORT" => option_env!("MQTT_PORT"),
        "MQTT_USER" => option_env!("MQTT_USER"),
        "MQTT_PASS" => option_env!("MQTT_PASS"),
        "MQTT_CLIENT_ID" => option_env!("MQTT_CLIENT_ID"),
        _ => None,
    };
    value.map(str::to_string)
}

struct Dht22Sensor {
    pin: PinDriver<'static, AnyIOPin, InputOutput>,
    delay: Ets,
}

impl Dht22Sensor {
    fn new(pin: AnyIOPin) -> anyhow::Result<Self> {
        let mut pin = PinDriver::input_output_od(pin)?;
        pin.set_pull(Pull::Up)?;
        pin.set_high()?;
        Ok(Self { pin, delay: Ets })
    }
}

impl SensorReader for Dht22Sensor {
    fn read(&mut self) -> Result<Reading, SensorError> {
        self.pin
            .set_high()
            .map_err(|err| SensorError::Driver(format!("GPIO{DHT22_PIN}: {err:?}")))?;

        match dht22::blocking::read(&mut self.delay, &mut self.pin) {
            Ok(reading) => Reading::new(reading.temperature, reading.relative_humidity),
            Err(DhtError::Timeout) => Err(SensorError::Timeout),
            Err(DhtError::ChecksumMismatch) => Err(SensorError::Checksum),
            Err(err) => Err(SensorError::Driver(format!("GPIO{DHT22_PIN}: {err:?}"))),
        }
    }
}

struct LedIndicator {
    pin: PinDriver<'static, AnyOutputPin, Output>,
}

impl Indicator for LedIndicator {
    fn set(&mut self, on: bool) {
        let result = if on {
            self.pin.set_high()
        } else {
            self.pin.set_low()
        };
        if let Err(err) = result {
            warn!("failed to drive READ LED on GPIO{READ_LED_PIN}: {err:?}");
        }
    }
}

struct EspClock;

impl Clock for EspClock {
    fn now_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn delay_ms(&self, ms: u32) {
        thread::sleep(Duration::from_millis(ms.into()));
    }
}

struct WifiNetwork {
    wifi: RefCell<EspWifi<'static>>,
    link: RefCell<LinkMonitor>,
}

impl WifiNetwork {
    fn new(wifi: EspWifi<'static>) -> Self {
        Self {
            wifi: RefCell::new(wifi),
            link: RefCell::new(LinkMonitor::default()),
        }
    }
}

impl NetworkInfo for WifiNetwork {
    fn local_address(&self) -> Option<Ipv4Addr> {
        let mut wifi = self.wifi.borrow_mut();
        let link_up = wifi.is_connected().unwrap_or(false);

        if self.link.borrow_mut().observe(EspClock.now_secs(), link_up) {
            info!("wifi link down, asking the station to rejoin");
            // Returns at once; the driver finishes the join in the background.
            if let Err(err) = wifi.connect() {
                warn!("wifi rejoin request failed: {err:?}");
            }
        }
        if !link_up {
            return None;
        }

        let info = wifi.sta_netif().get_ip_info().ok()?;
        (!info.ip.is_unspecified()).then_some(info.ip)
    }
}

struct EspRegistrar {
    timeout: Duration,
}

impl Registrar for EspRegistrar {
    fn post_form(&mut self, request: &FormPost) -> Result<u16, RegistrationError> {
        let conf = HttpClientConfiguration {
            timeout: Some(self.timeout),
            ..Default::default()
        };
        let connection = EspHttpConnection::new(&conf).map_err(client_error)?;
        let mut client = HttpClient::wrap(connection);

        let headers = request.headers();
        let headers: Vec<(&str, &str)> = headers
            .iter()
            .map(|(name, value)| (*name, value.as_str()))
            .collect();
        let url = request.url();

        let mut req = client
            .request(Method::Post, &url, &headers)
            .map_err(client_error)?;
        req.write_all(request.body.as_bytes())
            .map_err(client_error)?;
        req.flush().map_err(client_error)?;
        let response = req.submit().map_err(client_error)?;

        Ok(response.status())
    }
}

fn client_error(err: impl core::fmt::Debug) -> RegistrationError {
    RegistrationError::Client(format!("{err:?}"))
}

pub fn run() -> anyhow::Result<()> {
    esp_idf_svc::sys::link_patches();
    EspLogger::initialize_default();

    let mut config = NodeConfig::default();
    config.apply_overrides(build_setting);
    let mut mqtt_config = MqttConfig::default();
    mqtt_config.apply_overrides(build_setting);
    info!("node config: {}", config.to_json());

    let sys_loop = EspSystemEventLoop::take()?;
    let nvs_partition = EspDefaultNvsPartition::take()?;
    let Peripherals { modem, pins, .. } = Peripherals::take()?;

    let sensor =
        Dht22Sensor::new(pins.gpio16.downgrade()).context("failed to initialize DHT22")?;
    let mut led = PinDriver::output(pins.gpio2.downgrade_output())
        .context("failed to initialize READ LED")?;
    led.set_low()?;

    let wifi = connect_wifi(modem, sys_loop, nvs_partition).context("wifi startup failed")?;
    let _sntp = EspSntp::new_default().context("failed to start SNTP")?;

    let (announcer, inbox) = name_channel();
    info!("Getting device name...");
    if let Err(err) = start_name_subscription(&mqtt_config, announcer) {
        warn!("device name subscription unavailable: {err:#}");
    }

    info!("Starting server...");
    let listener = NodeListener::bind(config.server_port)
        .with_context(|| format!("failed to listen on port {}", config.server_port))?;

    let board = Board {
        clock: Box::new(EspClock),
        sensor: Box::new(sensor),
        indicator: Box::new(LedIndicator { pin: led }),
        network: Box::new(WifiNetwork::new(wifi)),
        registrar: Box::new(EspRegistrar {
            timeout: Duration::from_millis(config.http_timeout_ms.into()),
        }),
    };

    ConnectionLoop::new(&config, listener, board, inbox).run()
}

/// Brings the station up. A failed join is logged and the node carries on;
/// `WifiNetwork` keeps asking the station to rejoin while the link is down.
fn connect_wifi(
    modem: Modem,
    sys_loop: EspSystemEventLoop,
    nvs_partition: EspDefaultNvsPartition,
) -> anyhow::Result<EspWifi<'static>> {
    let mut esp_wifi = EspWifi::new(modem, sys_loop.clone(), Some(nvs_partition))?;
    let mut wifi = BlockingWifi::wrap(&mut esp_wifi, sys_loop)?;

    let auth_method = if WIFI_PASS.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPAWPA2Personal
    };

    wifi.set_configuration(&Configuration::Client(ClientConfiguration {
        ssid: WIFI_SSID
            .try_into()
            .map_err(|_| anyhow!("wifi ssid too long"))?,
        password: WIFI_PASS
            .try_into()
            .map_err(|_| anyhow!("wifi password too long"))?,
        auth_method,
        ..Default::default()
    }))?;

    wifi.start()?;
    info!("wifi started, connecting to `{WIFI_SSID}`");

    for attempt in 1..=WIFI_CONNECT_ATTEMPTS {
        match wifi.connect().and_then(|()| wifi.wait_netif_up()) {
            Ok(()) => {
                info!("wifi connected on attempt {attempt}");
                return Ok(esp_wifi);
            }
            Err(err) => warn!("wifi connect attempt {attempt}/{WIFI_CONNECT_ATTEMPTS} failed: {err:#}"),
        }
        if attempt < WIFI_CONNECT_ATTEMPTS {
            let _ = wifi.disconnect();
            thread::sleep(Duration::from_millis(WIFI_RETRY_DELAY_MS));
        }
    }

    warn!("wifi unavailable after {WIFI_CONNECT_ATTEMPTS} attempts; continuing offline");
    Ok(esp_wifi)
}

fn start_name_subscription(config: &MqttConfig, announcer: NameAnnouncer) -> anyhow::Result<()> {
    let url = format!("mqtt://{}:{}", config.host, config.port);
    let conf = MqttClientConfiguration {
        client_id: Some(config.client_id.as_str()),
        username: config.has_credentials().then_some(config.user.as_str()),
        password: config.has_credentials().then_some(config.pass.as_str()),
        ..Default::default()
    };

    let (mqtt, mut conn) = EspMqttClient::new(&url, &conf)?;
    let subscription = NameSubscription::new(announcer, config.client_id.clone());
    let receiver = subscription.clone();
    let (connected_tx, connected_rx) = mpsc::channel::<()>();

    thread::Builder::new()
        .name("mqtt-name".to_string())
        .stack_size(6144)
        .spawn(move || loop {
            match conn.next() {
                Ok(event) => match event.payload() {
                    EventPayload::Connected(_) => {
                        let _ = connected_tx.send(());
                    }
                    EventPayload::Received {
                        topic: Some(topic),
                        data,
                        ..
                    } => {
                        if !receiver.on_message(topic, data) {
                            break;
                        }
                    }
                    _ => {}
                },
                Err(err) => {
                    warn!("name subscription mqtt error: {err:?}");
                    thread::sleep(Duration::from_secs(2));
                }
            }
        })
        .context("failed to spawn mqtt thread")?;

    // The client blocks while the receive thread holds an event, so broker
    // calls happen on their own thread.
    thread::Builder::new()
        .name("mqtt-sub".to_string())
        .stack_size(4096)
        .spawn(move || {
            let mut broker = EspBroker(mqtt);
            for () in connected_rx {
                subscription.on_connect(&mut broker);
            }
        })
        .context("failed to spawn mqtt subscribe thread")?;

    Ok(())
}

struct EspBroker(EspMqttClient<'static>);

impl NameBroker for EspBroker {
    type Error = EspError;

    fn subscribe(&mut self, topic: &str) -> Result<(), EspError> {
        self.0.subscribe(topic, QoS::AtLeastOnce).map(|_| ())
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), EspError> {
        self.0
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .map(|_| ())
    }
}
