use std::{fmt, net::Ipv4Addr};

use log::info;

use crate::{
    identity::DeviceIdentity,
    periodic::{GateMode, PeriodicTask},
    ports::NetworkInfo,
    types::ip_label,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingReport {
    pub device: String,
    pub version: String,
    pub ip: Option<Ipv4Addr>,
    pub port: u16,
    pub client_connected: bool,
}

impl PingReport {
    pub fn ip_label(&self) -> String {
        ip_label(self.ip)
    }
}

impl fmt::Display for PingReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PING: DEVICE: {}; VERSION: {}; IP: {}; PORT: {}; CLIENT: {}",
            self.device,
            self.version,
            self.ip_label(),
            self.port,
            self.client_connected
        )
    }
}

#[derive(Debug, Clone)]
pub struct LivenessTask {
    schedule: PeriodicTask,
    version: String,
    port: u16,
}

impl LivenessTask {
    pub fn new(interval_secs: u32, mode: GateMode, version: &str, port: u16) -> Self {
        Self {
            schedule: PeriodicTask::new(interval_secs, mode),
            version: version.to_string(),
            port,
        }
    }

    pub fn schedule(&self) -> &PeriodicTask {
        &self.schedule
    }

    pub fn run(
        &mut self,
        now: i64,
        identity: &DeviceIdentity,
        network: &dyn NetworkInfo,
        client_connected: bool,
    ) -> Option<PingReport> {
        if !self.schedule.poll(now) {
            return None;
        }

        let report = PingReport {
            device: identity.name().unwrap_or_default().to_string(),
            version: self.version.clone(),
            ip: network.local_address(),
            port: self.port,
            client_connected,
        };
        info!("{report}");

        self.schedule.mark_fired(now);
        Some(report)
    }
}
