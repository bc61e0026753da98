use std::fmt::{self, Write};

use thiserror::Error;

use crate::types::NetworkAddress;

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("http transport error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed http response: {0}")]
    MalformedResponse(String),
    #[error("http client error: {0}")]
    Client(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormPost {
    pub host: String,
    pub port: u16,
    pub path: String,
    pub body: String,
}

impl FormPost {
    /// The device announcement: `name=<device>&address=<ip>%3A<port>`.
    pub fn registration(
        host: &str,
        port: u16,
        path: &str,
        device_name: &str,
        address: NetworkAddress,
    ) -> Self {
        Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
            body: format!(
                "name={}&address={}",
                form_encode(device_name),
                address.form_encoded()
            ),
        }
    }

    pub fn url(&self) -> String {
        format!("http://{}:{}{}", self.host, self.port, self.path)
    }

    pub fn content_length(&self) -> usize {
        self.body.len()
    }

    pub fn headers(&self) -> [(&'static str, String); 3] {
        [
            ("Content-Type", FORM_CONTENT_TYPE.to_string()),
            ("Accept", "*/*".to_string()),
            ("Content-Length", self.content_length().to_string()),
        ]
    }

    pub fn write_request(&self, writer: &mut impl Write) -> fmt::Result {
        write!(writer, "POST {} HTTP/1.1\r\n", self.path)?;
        write!(writer, "Host: {}:{}\r\n", self.host, self.port)?;
        for (name, value) in self.headers() {
            write!(writer, "{name}: {value}\r\n")?;
        }
        write!(writer, "Connection: close\r\n\r\n")?;
        writer.write_str(&self.body)
    }
}

pub fn form_encode(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'*' => {
                encoded.push(byte as char)
            }
            b' ' => encoded.push('+'),
            _ => {
                let _ = write!(&mut encoded, "%{byte:02X}");
            }
        }
    }
    encoded
}

pub fn parse_status_line(line: &str) -> Option<u16> {
    let mut parts = line.trim_end().splitn(3, ' ');
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    let code = parts.next()?;
    if code.len() != 3 {
        return None;
    }
    code.parse().ok()
}
