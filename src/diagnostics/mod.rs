// Diagnostics module - request model, validation and dispatch

pub mod dispatcher;
pub mod validate;

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::DiagError;

pub use dispatcher::Dispatcher;
pub use validate::RequestValidator;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Ping,
    Traceroute,
    Dns,
    Scan,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Ping => "ping",
            Method::Traceroute => "traceroute",
            Method::Dns => "dns",
            Method::Scan => "scan",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown names are an error; there is no fallback method
impl FromStr for Method {
    type Err = DiagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "ping" => Ok(Method::Ping),
            "traceroute" => Ok(Method::Traceroute),
            "dns" => Ok(Method::Dns),
            "scan" => Ok(Method::Scan),
            other => Err(DiagError::UnsupportedMethod(other.to_string())),
        }
    }
}

/// A request that passed validation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagnosticRequest {
    pub method: Method,
    pub target: String,
    /// Set for ping only
    pub count: Option<u8>,
    /// Set for scan only
    pub port_start: Option<u16>,
    /// Set for scan only
    pub port_end: Option<u16>,
}

/// Successful response body: `{"output": ...}` or `{"open_ports": [...]}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ProbeOutcome {
    Text { output: String },
    PortList { open_ports: Vec<u16> },
}
