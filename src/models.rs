//! Stored entities: proxies and the subscriptions they are harvested from

use crate::proxy::models::OracleReport;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

/// Location label stored for proxies that failed their last check
pub const UNKNOWN_LOCATION: &str = "unknown";

/// Maximum number of characters kept in `Subscription::error_message`
pub const ERROR_MESSAGE_LIMIT: usize = 10_000;

/// A proxy endpoint known to the store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ProxyRecord {
    pub id: String,
    /// Canonical connection string, unique across the store
    pub url: String,
    pub is_active: bool,
    /// Egress IP observed by the oracle on the last successful check
    pub ip_address: String,
    pub location: String,
    pub location_country: String,
    pub location_country_code: String,
    pub times_checked: i64,
    pub times_check_succeeded: i64,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_active: Option<DateTime<Utc>>,
}

impl ProxyRecord {
    /// Create an unchecked proxy record
    pub fn new(url: String) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url,
            is_active: false,
            ip_address: String::new(),
            location: UNKNOWN_LOCATION.to_string(),
            location_country: String::new(),
            location_country_code: String::new(),
            times_checked: 0,
            times_check_succeeded: 0,
            last_checked: None,
            last_active: None,
        }
    }

    /// Create a record from the probe that discovered it.
    ///
    /// The discovery probe counts as the first successful check. The country
    /// name is left empty so the next refresh resolves it.
    pub fn discovered(url: String, report: &OracleReport, now: DateTime<Utc>) -> Self {
        let mut proxy = Self::new(url);
        proxy.location = report.location.clone();
        proxy.location_country_code = report.country_code.clone();
        proxy.record_success(report, None, now);
        proxy
    }

    /// Whether a successful check with `report` must re-resolve the country name
    pub fn needs_country_lookup(&self, report: &OracleReport) -> bool {
        self.location != report.location || self.location_country.is_empty()
    }

    /// Apply a successful check.
    ///
    /// `country` is `Some` only when the location was re-resolved; the
    /// location label and country code are replaced together with it.
    pub fn record_success(
        &mut self,
        report: &OracleReport,
        country: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.is_active = true;
        self.ip_address = report.ip_address.clone();
        self.last_active = Some(now);
        self.times_check_succeeded += 1;

        if let Some(country) = country {
            self.location = report.location.clone();
            self.location_country_code = report.country_code.clone();
            self.location_country = country;
        }

        self.mark_checked(now);
    }

    /// Apply a failed check
    pub fn record_failure(&mut self, now: DateTime<Utc>) {
        self.is_active = false;
        self.location = UNKNOWN_LOCATION.to_string();
        self.mark_checked(now);
    }

    fn mark_checked(&mut self, now: DateTime<Utc>) {
        self.times_checked += 1;
        self.last_checked = Some(now);
    }

    /// Percentage of checks that succeeded, 0 when never checked
    pub fn quality(&self) -> f64 {
        if self.times_checked > 0 {
            self.times_check_succeeded as f64 * 100.0 / self.times_checked as f64
        } else {
            0.0
        }
    }
}

impl fmt::Display for ProxyRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// Encoding used by a subscription feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SubscriptionKind {
    /// One entry per line
    #[default]
    Plain,
    /// Every line is a base64 block of newline separated entries
    Base64,
}

impl fmt::Display for SubscriptionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionKind::Plain => write!(f, "plain"),
            SubscriptionKind::Base64 => write!(f, "base64"),
        }
    }
}

#[derive(Error, Debug)]
#[error("unknown subscription kind: {0}")]
pub struct UnknownKind(pub String);

impl FromStr for SubscriptionKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "plain" | "1" => Ok(SubscriptionKind::Plain),
            "base64" | "2" => Ok(SubscriptionKind::Base64),
            _ => Err(UnknownKind(s.to_string())),
        }
    }
}

/// A feed that proxies are harvested from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub url: String,
    pub kind: SubscriptionKind,
    pub enabled: bool,
    pub alive: bool,
    pub error_message: String,
    pub alive_timestamp: Option<DateTime<Utc>>,
}

impl Subscription {
    /// Create an enabled, never polled subscription
    pub fn new(url: String, kind: SubscriptionKind) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            url,
            kind,
            enabled: true,
            alive: true,
            error_message: String::new(),
            alive_timestamp: None,
        }
    }

    /// Record a successful fetch and decode
    pub fn mark_alive(&mut self, now: DateTime<Utc>) {
        self.alive = true;
        self.error_message.clear();
        self.alive_timestamp = Some(now);
    }

    /// Record a failed fetch; the message is truncated and never left empty
    pub fn mark_dead(&mut self, message: &str) {
        self.alive = false;
        self.error_message = if message.is_empty() {
            "unknown error".to_string()
        } else {
            message.chars().take(ERROR_MESSAGE_LIMIT).collect()
        };
    }
}

impl<'r> FromRow<'r, SqliteRow> for Subscription {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("kind")?;
        let kind: SubscriptionKind = kind.parse().map_err(|e: UnknownKind| sqlx::Error::ColumnDecode {
            index: "kind".to_string(),
            source: Box::new(e),
        })?;

        Ok(Self {
            id: row.try_get("id")?,
            url: row.try_get("url")?,
            kind,
            enabled: row.try_get("enabled")?,
            alive: row.try_get("alive")?,
            error_message: row.try_get("error_message")?,
            alive_timestamp: row.try_get("alive_timestamp")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(location: &str) -> OracleReport {
        OracleReport {
            ip_address: "203.0.113.7".to_string(),
            location: location.to_string(),
            country_code: "NL".to_string(),
        }
    }

    #[test]
    fn test_new_proxy_is_inactive_and_unknown() {
        let proxy = ProxyRecord::new("ss://abc@1.2.3.4:8388".to_string());
        assert!(!proxy.is_active);
        assert_eq!(proxy.location, UNKNOWN_LOCATION);
        assert_eq!(proxy.times_checked, 0);
        assert_eq!(proxy.quality(), 0.0);
    }

    #[test]
    fn test_success_updates_counters_and_location() {
        let now = Utc::now();
        let mut proxy = ProxyRecord::new("ss://abc@1.2.3.4:8388".to_string());
        let report = report("Amsterdam, NL");

        assert!(proxy.needs_country_lookup(&report));
        proxy.record_success(&report, Some("Netherlands".to_string()), now);

        assert!(proxy.is_active);
        assert_eq!(proxy.ip_address, "203.0.113.7");
        assert_eq!(proxy.location, "Amsterdam, NL");
        assert_eq!(proxy.location_country, "Netherlands");
        assert_eq!(proxy.location_country_code, "NL");
        assert_eq!(proxy.times_checked, 1);
        assert_eq!(proxy.times_check_succeeded, 1);
        assert_eq!(proxy.last_active, Some(now));
        assert_eq!(proxy.last_checked, Some(now));
        assert!(!proxy.needs_country_lookup(&report));
    }

    #[test]
    fn test_failure_keeps_success_counter() {
        let now = Utc::now();
        let mut proxy = ProxyRecord::discovered("ss://abc@1.2.3.4:8388".to_string(), &report("Paris"), now);
        proxy.record_failure(now);

        assert!(!proxy.is_active);
        assert_eq!(proxy.location, UNKNOWN_LOCATION);
        assert_eq!(proxy.times_checked, 2);
        assert_eq!(proxy.times_check_succeeded, 1);
        assert_eq!(proxy.quality(), 50.0);
        assert!(proxy.needs_country_lookup(&report("Paris")));
    }

    #[test]
    fn test_discovered_proxy_is_active_without_country_name() {
        let proxy = ProxyRecord::discovered("ss://abc@1.2.3.4:8388".to_string(), &report("Paris"), Utc::now());
        assert!(proxy.is_active);
        assert_eq!(proxy.location, "Paris");
        assert_eq!(proxy.location_country_code, "NL");
        assert!(proxy.location_country.is_empty());
        assert_eq!(proxy.times_checked, 1);
        assert_eq!(proxy.times_check_succeeded, 1);
    }

    #[test]
    fn test_subscription_kind_round_trip() {
        assert_eq!("BASE64".parse::<SubscriptionKind>().unwrap(), SubscriptionKind::Base64);
        assert_eq!(SubscriptionKind::Plain.to_string(), "plain");
        assert!("yaml".parse::<SubscriptionKind>().is_err());
    }

    #[test]
    fn test_subscription_dead_then_alive() {
        let mut sub = Subscription::new("https://feeds.example/a".to_string(), SubscriptionKind::Plain);
        sub.mark_dead(&"x".repeat(ERROR_MESSAGE_LIMIT + 50));
        assert!(!sub.alive);
        assert_eq!(sub.error_message.chars().count(), ERROR_MESSAGE_LIMIT);

        sub.mark_dead("");
        assert!(!sub.error_message.is_empty());

        let now = Utc::now();
        sub.mark_alive(now);
        assert!(sub.alive);
        assert!(sub.error_message.is_empty());
        assert_eq!(sub.alive_timestamp, Some(now));
    }
}
