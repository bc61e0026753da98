use std::{fmt, net::Ipv4Addr};

use thiserror::Error;

/// Printed in place of an address while the network is not ready.
pub const NO_ADDRESS: &str = "<none>";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SensorError {
    #[error("sensor did not answer in time")]
    Timeout,
    #[error("sensor frame failed its checksum")]
    Checksum,
    #[error("sensor returned non-finite values (temperature {temperature}, humidity {humidity})")]
    InvalidValue { temperature: f32, humidity: f32 },
    #[error("sensor driver error: {0}")]
    Driver(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub temperature_c: f32,
    pub humidity: f32,
}

impl Reading {
    pub fn new(temperature_c: f32, humidity: f32) -> Result<Self, SensorError> {
        if !temperature_c.is_finite() || !humidity.is_finite() {
            return Err(SensorError::InvalidValue {
                temperature: temperature_c,
                humidity,
            });
        }
        Ok(Self {
            temperature_c,
            humidity,
        })
    }
}

impl fmt::Display for Reading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "temp:{:.2}\thumidity:{:.2}",
            self.temperature_c, self.humidity
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkAddress {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl NetworkAddress {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn form_encoded(&self) -> String {
        format!("{}%3A{}", self.ip, self.port)
    }
}

impl fmt::Display for NetworkAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}

pub fn ip_label(address: Option<Ipv4Addr>) -> String {
    match address {
        Some(ip) => ip.to_string(),
        None => NO_ADDRESS.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_line_uses_tab_separated_pairs() {
        let reading = Reading::new(21.5, 40.25).unwrap();
        assert_eq!(reading.to_string(), "temp:21.50\thumidity:40.25");
    }

    #[test]
    fn non_finite_values_are_rejected() {
        assert!(matches!(
            Reading::new(f32::NAN, 40.0),
            Err(SensorError::InvalidValue { .. })
        ));
        assert!(matches!(
            Reading::new(20.0, f32::INFINITY),
            Err(SensorError::InvalidValue { .. })
        ));
    }

    #[test]
    fn address_encodes_colon_for_forms() {
        let address = NetworkAddress::new(Ipv4Addr::new(192, 168, 1, 42), 5000);
        assert_eq!(address.to_string(), "192.168.1.42:5000");
        assert_eq!(address.form_encoded(), "192.168.1.42%3A5000");
    }

    #[test]
    fn missing_address_uses_sentinel() {
        assert_eq!(ip_label(None), "<none>");
        assert_eq!(ip_label(Some(Ipv4Addr::new(10, 0, 0, 7))), "10.0.0.7");
    }
}
