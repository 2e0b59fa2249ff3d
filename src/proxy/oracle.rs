//! Client for the validation oracle
//!
//! The oracle connects through a proxy and reports the egress IP and where it
//! is located. Every failure mode maps to [`OracleOutcome::Unreachable`].

use crate::models::UNKNOWN_LOCATION;
use crate::proxy::geo::{CountryResolver, DEFAULT_COUNTRY_API_URL};
use crate::proxy::models::{OracleOutcome, OracleReport, Unreachable};
use crate::Result;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;

/// Default oracle endpoint
pub const DEFAULT_ORACLE_URL: &str = "https://shadowtest.akiel.dev/v1/test";

/// Default timeout for one oracle call in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default timeout for a country lookup in seconds
const DEFAULT_LOOKUP_TIMEOUT_SECS: u64 = 10;

/// Wire format of the oracle. Field names are fixed by the service.
#[derive(Debug, Deserialize)]
struct OracleResponse {
    #[serde(rename = "YourFuckingIPAddress")]
    ip_address: Option<String>,
    #[serde(rename = "YourFuckingLocation")]
    location: Option<String>,
    #[serde(rename = "YourFuckingCountryCode")]
    country_code: Option<String>,
}

impl OracleResponse {
    fn into_outcome(self) -> OracleOutcome {
        let Some(location) = self.location else {
            return OracleOutcome::Unreachable(Unreachable::MissingLocation);
        };
        let location = location.trim();
        if location.is_empty() || location.eq_ignore_ascii_case(UNKNOWN_LOCATION) {
            return OracleOutcome::Unreachable(Unreachable::UnknownLocation);
        }

        OracleOutcome::Reachable(OracleReport {
            ip_address: self.ip_address.unwrap_or_default(),
            location: location.to_string(),
            country_code: self.country_code.unwrap_or_default(),
        })
    }
}

/// Configuration for the oracle client
#[derive(Debug, Clone)]
pub struct OracleConfig {
    /// Oracle endpoint receiving `address=<proxy url>`
    pub url: String,
    /// Timeout for each oracle call
    pub timeout: Duration,
    /// Base URL of the country lookup service
    pub country_api_url: String,
    /// Timeout for each country lookup
    pub lookup_timeout: Duration,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_ORACLE_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            country_api_url: DEFAULT_COUNTRY_API_URL.to_string(),
            lookup_timeout: Duration::from_secs(DEFAULT_LOOKUP_TIMEOUT_SECS),
        }
    }
}

impl OracleConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(mut self, url: String) -> Self {
        self.url = url;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_country_api_url(mut self, url: String) -> Self {
        self.country_api_url = url;
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Duration) -> Self {
        self.lookup_timeout = timeout;
        self
    }
}

/// Validation oracle client
#[derive(Debug, Clone)]
pub struct OracleClient {
    config: OracleConfig,
    client: Client,
    countries: CountryResolver,
}

impl OracleClient {
    pub fn with_config(config: OracleConfig) -> Result<Self> {
        let client = Client::builder().timeout(config.timeout).build()?;
        let countries = CountryResolver::new(&config.country_api_url, config.lookup_timeout)?;

        Ok(Self {
            config,
            client,
            countries,
        })
    }

    /// Ask the oracle about one proxy
    pub async fn check(&self, proxy_url: &str) -> OracleOutcome {
        let response = match self
            .client
            .post(&self.config.url)
            .form(&[("address", proxy_url)])
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => return OracleOutcome::Unreachable(transport_reason(&e)),
        };

        if response.status() != StatusCode::OK {
            return OracleOutcome::Unreachable(Unreachable::Status(response.status().as_u16()));
        }

        match response.json::<OracleResponse>().await {
            Ok(body) => body.into_outcome(),
            Err(e) if e.is_timeout() => OracleOutcome::Unreachable(Unreachable::Timeout),
            Err(e) => OracleOutcome::Unreachable(Unreachable::InvalidBody(e.to_string())),
        }
    }

    /// Display name of a country, empty on any failure
    pub async fn country_name(&self, country_code: &str) -> String {
        self.countries.country_name(country_code).await
    }
}

fn transport_reason(err: &reqwest::Error) -> Unreachable {
    if err.is_timeout() {
        Unreachable::Timeout
    } else {
        Unreachable::Transport(err.to_string())
    }
}
