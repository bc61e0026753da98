pub mod config;
pub mod http;
pub mod identity;
pub mod link;
pub mod liveness;
pub mod periodic;
pub mod ports;
pub mod registration;
pub mod scheduler;
pub mod status;
pub mod topics;
pub mod types;

#[cfg(test)]
mod testing;

pub use config::{MqttConfig, NodeConfig};
pub use http::{FormPost, RegistrationError};
pub use identity::{
    name_channel, DeviceIdentity, NameAnnouncer, NameBroker, NameInbox, NameSubscription,
};
pub use link::{LinkMonitor, RECONNECT_GRACE_SECS};
pub use liveness::{LivenessTask, PingReport};
pub use periodic::{GateMode, PeriodicTask, ASSUMED_TICK_RATE_HZ};
pub use ports::{Board, Clock, Connection, Indicator, Listener, NetworkInfo, Registrar, SensorReader};
pub use registration::{RegistrationOutcome, RegistrationTask};
pub use scheduler::{ConnectionLoop, LoopState, TickReport, Transition};
pub use status::{StatusOutcome, StatusTask};
pub use topics::*;
pub use types::{NetworkAddress, Reading, SensorError};
