//! Country name lookup by ISO code

use crate::Result;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Default country lookup service
pub const DEFAULT_COUNTRY_API_URL: &str = "https://restcountries.com/v3.1/alpha";

#[derive(Debug, Deserialize)]
struct CountryEntry {
    name: CountryName,
}

#[derive(Debug, Deserialize)]
struct CountryName {
    common: String,
}

/// Resolves ISO 3166-1 codes to display names
#[derive(Debug, Clone)]
pub struct CountryResolver {
    base_url: String,
    client: Client,
}

impl CountryResolver {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Common name for `country_code`, or an empty string on any failure
    pub async fn country_name(&self, country_code: &str) -> String {
        let code = country_code.trim().to_lowercase();
        if code.is_empty() {
            return String::new();
        }

        match self.lookup(&code).await {
            Ok(name) => name,
            Err(e) => {
                debug!(country_code = %code, error = %e, "Country lookup failed");
                String::new()
            }
        }
    }

    async fn lookup(&self, code: &str) -> Result<String> {
        let url = format!("{}/{}", self.base_url, code);
        let response = self.client.get(&url).send().await?;
        if response.status() != StatusCode::OK {
            return Ok(String::new());
        }

        let entries: Vec<CountryEntry> = response.json().await?;
        Ok(entries
            .into_iter()
            .next()
            .map(|entry| entry.name.common)
            .unwrap_or_default())
    }
}
