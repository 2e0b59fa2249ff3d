//! Proxy data models

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Scheme prefix every Shadowsocks entry starts with
pub const SS_SCHEME: &str = "ss://";

/// A parsed Shadowsocks endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowsocksUri {
    /// Cipher name, lowercased
    pub method: String,
    pub password: String,
    /// Host name or IP; IPv6 addresses are stored without brackets
    pub host: String,
    pub port: u16,
    /// Decoded `plugin` query parameter, e.g. `obfs-local;obfs=http`
    pub plugin: Option<String>,
    /// Decoded `#remark`, not part of the identity
    pub tag: Option<String>,
}

impl ShadowsocksUri {
    pub fn new(method: String, password: String, host: String, port: u16) -> Self {
        Self {
            method,
            password,
            host,
            port,
            plugin: None,
            tag: None,
        }
    }

    pub fn with_plugin(mut self, plugin: String) -> Self {
        self.plugin = Some(plugin);
        self
    }

    pub fn with_tag(mut self, tag: String) -> Self {
        self.tag = Some(tag);
        self
    }

    /// `method:password` encoded the way the canonical string carries it
    pub fn userinfo(&self) -> String {
        STANDARD.encode(format!("{}:{}", self.method, self.password))
    }

    /// Host and port, with IPv6 hosts bracketed
    pub fn to_simple_string(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Normalized connection string used as the proxy identity
    pub fn connection_string(&self) -> String {
        let mut url = format!("{}{}@{}", SS_SCHEME, self.userinfo(), self.to_simple_string());
        if let Some(plugin) = &self.plugin {
            url.push_str("/?plugin=");
            url.push_str(&urlencoding::encode(plugin));
        }
        url
    }
}

impl fmt::Display for ShadowsocksUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.connection_string())
    }
}

/// Normalized answer of the validation oracle for a reachable proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OracleReport {
    /// Egress IP the oracle saw when connecting through the proxy
    pub ip_address: String,
    /// Human readable location label
    pub location: String,
    /// ISO 3166-1 alpha-2 code
    pub country_code: String,
}

/// Why the oracle could not confirm a proxy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Unreachable {
    /// Oracle answered with a non-200 status
    Status(u16),
    /// Body parsed but carried no location
    MissingLocation,
    /// Oracle could not place the egress IP
    UnknownLocation,
    /// Body was not the expected JSON object
    InvalidBody(String),
    Timeout,
    Transport(String),
}

impl fmt::Display for Unreachable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unreachable::Status(status) => write!(f, "oracle returned HTTP {}", status),
            Unreachable::MissingLocation => write!(f, "oracle response has no location"),
            Unreachable::UnknownLocation => write!(f, "oracle reported an unknown location"),
            Unreachable::InvalidBody(e) => write!(f, "invalid oracle response: {}", e),
            Unreachable::Timeout => write!(f, "oracle request timed out"),
            Unreachable::Transport(e) => write!(f, "oracle request failed: {}", e),
        }
    }
}

/// Result of one oracle call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OracleOutcome {
    Reachable(OracleReport),
    Unreachable(Unreachable),
}

impl OracleOutcome {
    pub fn is_reachable(&self) -> bool {
        matches!(self, OracleOutcome::Reachable(_))
    }

    pub fn report(&self) -> Option<&OracleReport> {
        match self {
            OracleOutcome::Reachable(report) => Some(report),
            OracleOutcome::Unreachable(_) => None,
        }
    }
}
