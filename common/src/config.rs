use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::periodic::{GateMode, ASSUMED_TICK_RATE_HZ};

pub const DEFAULT_AGGREGATOR_HOST: &str = "192.168.1.11";
pub const DEFAULT_AGGREGATOR_PORT: u16 = 8000;
pub const REGISTRATION_PATH: &str = "/api/devices";
pub const DEFAULT_SERVER_PORT: u16 = 5000;
pub const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub aggregator_host: String,
    pub aggregator_port: u16,
    pub registration_path: String,
    pub server_port: u16,
    pub firmware_version: String,
    pub status_interval_secs: u32,
    pub ping_interval_secs: u32,
    pub register_interval_secs: u32,
    pub indicator_settle_ms: u32,
    pub tick_interval_ms: u32,
    pub http_timeout_ms: u32,
    pub gating: GateMode,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            aggregator_host: DEFAULT_AGGREGATOR_HOST.to_string(),
            aggregator_port: DEFAULT_AGGREGATOR_PORT,
            registration_path: REGISTRATION_PATH.to_string(),
            server_port: DEFAULT_SERVER_PORT,
            firmware_version: FIRMWARE_VERSION.to_string(),
            status_interval_secs: 5,
            ping_interval_secs: 10,
            register_interval_secs: 30,
            indicator_settle_ms: 100,
            tick_interval_ms: 1_000 / ASSUMED_TICK_RATE_HZ,
            http_timeout_ms: 5_000,
            gating: GateMode::Clock,
        }
    }
}

impl NodeConfig {
    pub fn sanitize(&mut self) {
        self.status_interval_secs = self.status_interval_secs.max(1);
        self.ping_interval_secs = self.ping_interval_secs.max(1);
        self.register_interval_secs = self.register_interval_secs.max(1);
        self.tick_interval_ms = self.tick_interval_ms.clamp(1, 1_000);
        self.http_timeout_ms = self.http_timeout_ms.max(100);
        if let GateMode::Ticks { tick_rate_hz } = &mut self.gating {
            *tick_rate_hz = (*tick_rate_hz).max(1);
        }
        if !self.registration_path.starts_with('/') {
            self.registration_path.insert(0, '/');
        }
    }

    /// Layer `KEY=value` overrides (usually the process environment) on top
    /// of the compiled-in values. Unparsable values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("AGGREGATOR_HOST").filter(|value| !value.trim().is_empty()) {
            self.aggregator_host = host.trim().to_string();
        }
        override_parsed(&lookup, "AGGREGATOR_PORT", &mut self.aggregator_port);
        override_parsed(&lookup, "NODE_PORT", &mut self.server_port);
        override_parsed(&lookup, "STATUS_INTERVAL_SECS", &mut self.status_interval_secs);
        override_parsed(&lookup, "PING_INTERVAL_SECS", &mut self.ping_interval_secs);
        override_parsed(&lookup, "REGISTER_INTERVAL_SECS", &mut self.register_interval_secs);
        override_parsed(&lookup, "TICK_INTERVAL_MS", &mut self.tick_interval_ms);
        override_parsed(&lookup, "HTTP_TIMEOUT_MS", &mut self.http_timeout_ms);
        if let Some(mode) = lookup("NODE_GATING").as_deref().and_then(GateMode::parse) {
            self.gating = mode;
        }
        self.sanitize();
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub pass: String,
    pub client_id: String,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            user: String::new(),
            pass: String::new(),
            client_id: "indoor-sensor".to_string(),
        }
    }
}

impl MqttConfig {
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(host) = lookup("MQTT_HOST").filter(|value| !value.trim().is_empty()) {
            self.host = host.trim().to_string();
        }
        override_parsed(&lookup, "MQTT_PORT", &mut self.port);
        if let Some(user) = lookup("MQTT_USER") {
            self.user = user;
            self.pass = lookup("MQTT_PASS").unwrap_or_default();
        }
        if let Some(client_id) = lookup("MQTT_CLIENT_ID").filter(|value| !value.is_empty()) {
            self.client_id = client_id;
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.user.is_empty()
    }
}

fn override_parsed<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    if let Some(value) = lookup(key).and_then(|raw| raw.trim().parse::<T>().ok()) {
        *slot = value;
    }
}
