use std::{
    fmt,
    sync::mpsc::{self, Receiver, Sender, TryRecvError},
};

use log::{info, warn};

use crate::topics::{TOPIC_DEVICE_NAME, TOPIC_DEVICE_NAME_REQUEST};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceIdentity {
    name: String,
}

impl DeviceIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> Option<&str> {
        if self.name.is_empty() {
            None
        } else {
            Some(&self.name)
        }
    }

    /// Last write wins. Blank names are ignored so a stray empty message
    /// cannot stall registration again.
    pub fn set(&mut self, name: &str) -> bool {
        let name = name.trim();
        if name.is_empty() {
            return false;
        }
        if self.name != name {
            self.name = name.to_string();
        }
        true
    }
}

#[derive(Debug, Clone)]
pub struct NameAnnouncer {
    tx: Sender<String>,
}

#[derive(Debug)]
pub struct NameInbox {
    rx: Receiver<String>,
}

pub fn name_channel() -> (NameAnnouncer, NameInbox) {
    let (tx, rx) = mpsc::channel();
    (NameAnnouncer { tx }, NameInbox { rx })
}

impl NameAnnouncer {
    /// Returns `false` once the scheduler is gone.
    pub fn announce(&self, name: impl Into<String>) -> bool {
        self.tx.send(name.into()).is_ok()
    }
}

impl NameInbox {
    /// Apply every pending announcement in arrival order. Returns how many
    /// were accepted.
    pub fn apply_to(&self, identity: &mut DeviceIdentity) -> usize {
        let mut applied = 0;
        loop {
            match self.rx.try_recv() {
                Ok(name) => {
                    if identity.set(&name) {
                        info!("Got device name: {}", name.trim());
                        applied += 1;
                    } else {
                        warn!("ignoring blank device name announcement");
                    }
                }
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => return applied,
            }
        }
    }
}

/// The two broker calls name acquisition needs.
pub trait NameBroker {
    type Error: fmt::Debug;

    fn subscribe(&mut self, topic: &str) -> Result<(), Self::Error>;
    fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone)]
pub struct NameSubscription {
    announcer: NameAnnouncer,
    client_id: String,
}

impl NameSubscription {
    pub fn new(announcer: NameAnnouncer, client_id: impl Into<String>) -> Self {
        Self {
            announcer,
            client_id: client_id.into(),
        }
    }

    /// Call on every broker connect. Clean sessions forget subscriptions,
    /// and a name published while we were away has to be asked for again.
    pub fn on_connect<B: NameBroker>(&self, broker: &mut B) {
        if let Err(err) = broker.subscribe(TOPIC_DEVICE_NAME) {
            warn!("failed to subscribe to {TOPIC_DEVICE_NAME}: {err:?}");
        }
        if let Err(err) = broker.publish(TOPIC_DEVICE_NAME_REQUEST, self.client_id.as_bytes()) {
            warn!("failed to request device name: {err:?}");
        }
    }

    /// Returns `false` once the scheduler is gone.
    pub fn on_message(&self, topic: &str, payload: &[u8]) -> bool {
        if topic != TOPIC_DEVICE_NAME {
            return true;
        }
        match std::str::from_utf8(payload) {
            Ok(name) => self.announcer.announce(name),
            Err(err) => {
                warn!("device name payload is not utf-8: {err}");
                true
            }
        }
    }
}
