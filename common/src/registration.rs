use log::{info, warn};

use crate::{
    config::NodeConfig,
    http::FormPost,
    identity::DeviceIdentity,
    periodic::PeriodicTask,
    ports::{NetworkInfo, Registrar},
    types::NetworkAddress,
};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RegistrationOutcome {
    /// No device name yet; the schedule has not started.
    #[default]
    AwaitingName,
    NotDue,
    NetworkDown,
    Registered { status: u16 },
    Rejected { status: u16 },
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct RegistrationTask {
    schedule: PeriodicTask,
    host: String,
    port: u16,
    path: String,
    server_port: u16,
}

impl RegistrationTask {
    pub fn new(config: &NodeConfig) -> Self {
        Self {
            schedule: PeriodicTask::new(config.register_interval_secs, config.gating),
            host: config.aggregator_host.clone(),
            port: config.aggregator_port,
            path: config.registration_path.clone(),
            server_port: config.server_port,
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
        registrar: &mut dyn Registrar,
    ) -> RegistrationOutcome {
        let Some(name) = identity.name() else {
            return RegistrationOutcome::AwaitingName;
        };

        if !self.schedule.poll(now) {
            return RegistrationOutcome::NotDue;
        }
        // Success or not, the next attempt waits a full interval.
        self.schedule.mark_fired(now);

        let Some(ip) = network.local_address() else {
            warn!("skipping registration of {name}: network not ready");
            return RegistrationOutcome::NetworkDown;
        };

        let request = FormPost::registration(
            &self.host,
            self.port,
            &self.path,
            name,
            NetworkAddress::new(ip, self.server_port),
        );

        info!("Registering device: {name}");
        match registrar.post_form(&request) {
            Ok(status) if (200..300).contains(&status) => {
                info!("Registered device with status: {status}");
                RegistrationOutcome::Registered { status }
            }
            Ok(status) => {
                warn!("Registered device with status: {status}");
                RegistrationOutcome::Rejected { status }
            }
            Err(err) => {
                warn!("registration POST to {} failed: {err}", request.url());
                RegistrationOutcome::Failed(err.to_string())
            }
        }
    }
}
