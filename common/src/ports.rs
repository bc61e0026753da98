use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
};

use crate::{
    http::{FormPost, RegistrationError},
    types::{Reading, SensorError},
};

pub trait Clock {
    /// Wall-clock seconds since the Unix epoch.
    fn now_secs(&self) -> i64;

    fn delay_ms(&self, ms: u32);
}

pub trait SensorReader {
    fn read(&mut self) -> Result<Reading, SensorError>;
}

pub trait Indicator {
    fn set(&mut self, on: bool);
}

pub trait NetworkInfo {
    /// The node's current IPv4 address, or `None` while the link is down.
    fn local_address(&self) -> Option<Ipv4Addr>;
}

pub trait Registrar {
    fn post_form(&mut self, request: &FormPost) -> Result<u16, RegistrationError>;
}

pub trait Listener {
    type Connection: Connection;

    /// Non-blocking accept. `Ok(None)` when nobody is waiting.
    fn accept(&mut self) -> io::Result<Option<Self::Connection>>;
}

pub trait Connection {
    /// Probe whether the peer is still there. May discard unsolicited input.
    fn is_connected(&mut self) -> bool;

    fn write_line(&mut self, line: &str) -> io::Result<()>;

    fn peer(&self) -> Option<SocketAddr> {
        None
    }
}

pub struct Board {
    pub clock: Box<dyn Clock>,
    pub sensor: Box<dyn SensorReader>,
    pub indicator: Box<dyn Indicator>,
    pub network: Box<dyn NetworkInfo>,
    pub registrar: Box<dyn Registrar>,
}
