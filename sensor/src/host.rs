use std::{
    fmt::{self, Write as _},
    io::{BufRead, BufReader, Write as _},
    net::{IpAddr, Ipv4Addr, TcpStream, ToSocketAddrs, UdpSocket},
    thread,
    time::Duration,
};

use anyhow::Context;
use rumqttc::{AsyncClient, ClientError, Event, Incoming, MqttOptions, QoS};
use tracing::{debug, info, warn};
use tracing_subscriber::{
    fmt::{format::Writer, time::FormatTime},
    EnvFilter,
};

use indoor_common::{
    http::parse_status_line, name_channel, Board, Clock, ConnectionLoop, FormPost, Indicator,
    MqttConfig, NameAnnouncer, NameBroker, NameSubscription, NetworkInfo, NodeConfig, Reading,
    Registrar, RegistrationError, SensorError, SensorReader,
};

use crate::net::NodeListener;

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_timer(UnixSeconds)
        .with_level(false)
        .with_target(false)
        .init();

    let lookup = |key: &str| std::env::var(key).ok();
    let mut config = NodeConfig::default();
    config.apply_overrides(lookup);
    let mut mqtt_config = MqttConfig::default();
    mqtt_config.apply_overrides(lookup);
    info!("node config: {}", config.to_json());

    let (announcer, inbox) = name_channel();
    if let Ok(name) = std::env::var("DEVICE_NAME") {
        announcer.announce(name);
    }

    info!("Getting device name...");
    let _mqtt = start_name_subscription(&mqtt_config, announcer);

    info!("Starting server...");
    // Board collaborators are not Send; the loop owns a dedicated thread.
    let node = tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        let listener = NodeListener::bind(config.server_port)
            .with_context(|| format!("failed to listen on port {}", config.server_port))?;
        info!("listening on {}", listener.local_addr()?);

        let board = Board {
            clock: Box::new(SystemClock),
            sensor: Box::new(SimulatedSensor::default()),
            indicator: Box::new(LogIndicator),
            network: Box::new(HostNetwork::new(
                &config.aggregator_host,
                config.aggregator_port,
            )),
            registrar: Box::new(HttpRegistrar::new(Duration::from_millis(
                config.http_timeout_ms.into(),
            ))),
        };

        ConnectionLoop::new(&config, listener, board, inbox).run()
    });

    node.await.context("scheduler thread panicked")?
}

struct UnixSeconds;

impl FormatTime for UnixSeconds {
    fn format_time(&self, w: &mut Writer<'_>) -> fmt::Result {
        write!(w, "[{}]", chrono::Utc::now().timestamp())
    }
}

fn start_name_subscription(config: &MqttConfig, announcer: NameAnnouncer) -> AsyncClient {
    let mut options = MqttOptions::new(config.client_id.clone(), config.host.clone(), config.port);
    options.set_keep_alive(Duration::from_secs(30));
    if config.has_credentials() {
        options.set_credentials(config.user.clone(), config.pass.clone());
    }

    let (mqtt, mut eventloop) = AsyncClient::new(options, 16);
    let mut broker = HostBroker(mqtt.clone());
    let subscription = NameSubscription::new(announcer, config.client_id.clone());

    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => subscription.on_connect(&mut broker),
                Ok(Event::Incoming(Incoming::Publish(publish))) => {
                    if !subscription.on_message(&publish.topic, &publish.payload) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!("name subscription mqtt poll error: {err}");
                    tokio::time::sleep(Duration::from_secs(2)).await;
                }
            }
        }
    });

    mqtt
}

struct HostBroker(AsyncClient);

impl NameBroker for HostBroker {
    type Error = ClientError;

    fn subscribe(&mut self, topic: &str) -> Result<(), ClientError> {
        self.0.try_subscribe(topic, QoS::AtLeastOnce)
    }

    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), ClientError> {
        self.0.try_publish(topic, QoS::AtLeastOnce, false, payload.to_vec())
    }
}

struct SystemClock;

impl Clock for SystemClock {
    fn now_secs(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn delay_ms(&self, ms: u32) {
        thread::sleep(Duration::from_millis(ms.into()));
    }
}

/// Stand-in for the DHT22 when running on a workstation.
#[derive(Default)]
struct SimulatedSensor {
    samples: u64,
}

impl SensorReader for SimulatedSensor {
    fn read(&mut self) -> Result<Reading, SensorError> {
        self.samples = self.samples.wrapping_add(1);
        let temperature_c = 21.0 + ((self.samples % 8) as f32 * 0.2);
        let humidity = 42.0 + ((self.samples % 6) as f32 * 0.5);
        Reading::new(temperature_c, humidity)
    }
}

struct LogIndicator;

impl Indicator for LogIndicator {
    fn set(&mut self, on: bool) {
        debug!("READ LED {}", if on { "on" } else { "off" });
    }
}

/// Finds the address other hosts would reach us on by routing a UDP socket
/// toward the aggregator. No packet is sent.
struct HostNetwork {
    probe_host: String,
    probe_port: u16,
}

impl HostNetwork {
    fn new(probe_host: &str, probe_port: u16) -> Self {
        Self {
            probe_host: probe_host.to_string(),
            probe_port,
        }
    }
}

impl NetworkInfo for HostNetwork {
    fn local_address(&self) -> Option<Ipv4Addr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
        socket
            .connect((self.probe_host.as_str(), self.probe_port))
            .ok()?;
        match socket.local_addr().ok()?.ip() {
            IpAddr::V4(ip) if !ip.is_unspecified() => Some(ip),
            _ => None,
        }
    }
}

struct HttpRegistrar {
    timeout: Duration,
}

impl HttpRegistrar {
    fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Registrar for HttpRegistrar {
    fn post_form(&mut self, request: &FormPost) -> Result<u16, RegistrationError> {
        let address = (request.host.as_str(), request.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| RegistrationError::Client(format!("{} did not resolve", request.host)))?;

        let mut stream = TcpStream::connect_timeout(&address, self.timeout)?;
        stream.set_read_timeout(Some(self.timeout))?;
        stream.set_write_timeout(Some(self.timeout))?;

        let mut text = String::new();
        request
            .write_request(&mut text)
            .map_err(|_| RegistrationError::Client("failed to format request".to_string()))?;
        stream.write_all(text.as_bytes())?;
        stream.flush()?;

        let mut status_line = String::new();
        BufReader::new(stream).read_line(&mut status_line)?;
        parse_status_line(&status_line)
            .ok_or_else(|| RegistrationError::MalformedResponse(status_line.trim_end().to_string()))
    }
}
