//! Proxy Harvest - Shadowsocks proxy harvester and validator
//!
//! Polls subscription feeds for Shadowsocks proxies, validates every known
//! proxy against a connectivity oracle, and keeps the results in a SQLite store.

pub mod cycle;
pub mod database;
pub mod error;
pub mod models;
pub mod proxy;
pub mod reconciler;

pub use models::*;
pub use proxy::*;

use proxy::oracle::DEFAULT_ORACLE_URL;
use proxy::geo::DEFAULT_COUNTRY_API_URL;
use proxy::pool::DEFAULT_WORKERS;
use std::time::Duration;

/// Application result type
pub type Result<T> = anyhow::Result<T>;

/// Default connectivity self-check endpoint; must answer 204
pub const DEFAULT_CONNECTIVITY_URL: &str = "https://clients3.google.com/generate_204";

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Database connection string
    pub database_url: String,
    /// Validation oracle endpoint
    pub oracle_url: String,
    /// Country lookup base URL
    pub country_api_url: String,
    /// Self-check endpoint gating the refresh cycle
    pub connectivity_url: String,
    /// Ceiling on concurrent network calls within one cycle
    pub workers: usize,
    pub feed_timeout: Duration,
    pub oracle_timeout: Duration,
    pub lookup_timeout: Duration,
    pub connectivity_timeout: Duration,
    pub refresh_interval: Duration,
    pub poll_interval: Duration,
    /// User agent for feed requests
    pub user_agent: String,
}

impl Default for Config {
    fn default() -> Self {
        let oracle = OracleConfig::default();
        let crawler = CrawlerConfig::default();
        Self {
            database_url: "sqlite://proxies.db".to_string(),
            oracle_url: DEFAULT_ORACLE_URL.to_string(),
            country_api_url: DEFAULT_COUNTRY_API_URL.to_string(),
            connectivity_url: DEFAULT_CONNECTIVITY_URL.to_string(),
            workers: DEFAULT_WORKERS,
            feed_timeout: crawler.timeout,
            oracle_timeout: oracle.timeout,
            lookup_timeout: oracle.lookup_timeout,
            connectivity_timeout: Duration::from_secs(10),
            refresh_interval: Duration::from_secs(20 * 60),
            poll_interval: Duration::from_secs(6 * 60 * 60),
            user_agent: crawler.user_agent,
        }
    }
}

impl Config {
    pub fn oracle_config(&self) -> OracleConfig {
        OracleConfig::new()
            .with_url(self.oracle_url.clone())
            .with_timeout(self.oracle_timeout)
            .with_country_api_url(self.country_api_url.clone())
            .with_lookup_timeout(self.lookup_timeout)
    }

    pub fn crawler_config(&self) -> CrawlerConfig {
        CrawlerConfig::new()
            .with_timeout(self.feed_timeout)
            .with_user_agent(self.user_agent.clone())
    }
}
