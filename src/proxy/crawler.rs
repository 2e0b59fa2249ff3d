//! Subscription poller harvesting new proxies from feeds
//!
//! This module provides functionality for:
//! - Fetching every enabled subscription feed
//! - Decoding feed bodies and parsing their Shadowsocks entries
//! - Probing entries that are not yet stored and keeping the reachable ones

use crate::database::ProxyDatabase;
use crate::error::FeedError;
use crate::models::{ProxyRecord, Subscription};
use crate::proxy::decoder::LineDecoder;
use crate::proxy::models::OracleOutcome;
use crate::proxy::oracle::OracleClient;
use crate::proxy::parser::ProxyParser;
use crate::proxy::pool::WorkerPool;
use crate::Result;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Default timeout for feed requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default user agent for feed requests
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

/// Result of polling a single subscription
#[derive(Debug, Clone)]
pub struct FeedResult {
    /// The subscription with its updated health state
    pub subscription: Subscription,
    /// New, reachable proxies found in the feed
    pub candidates: Vec<ProxyRecord>,
    /// Error message if polling failed
    pub error: Option<String>,
}

impl FeedResult {
    pub fn success(subscription: Subscription, candidates: Vec<ProxyRecord>) -> Self {
        Self {
            subscription,
            candidates,
            error: None,
        }
    }

    pub fn failure(subscription: Subscription, error: String) -> Self {
        Self {
            subscription,
            candidates: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Outcome of polling every subscription
#[derive(Debug, Clone, Default)]
pub struct PollReport {
    pub feeds_alive: usize,
    pub feeds_failed: usize,
    /// Candidates from all feeds; may hold duplicates across feeds
    pub candidates: Vec<ProxyRecord>,
}

impl FromIterator<FeedResult> for PollReport {
    fn from_iter<I: IntoIterator<Item = FeedResult>>(results: I) -> Self {
        let mut report = PollReport::default();
        for result in results {
            if result.is_success() {
                report.feeds_alive += 1;
            } else {
                report.feeds_failed += 1;
            }
            report.candidates.extend(result.candidates);
        }
        report
    }
}

/// Configuration for the subscription poller
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Timeout for each feed request
    pub timeout: Duration,
    /// User agent for feed requests
    pub user_agent: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl CrawlerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_user_agent(mut self, user_agent: String) -> Self {
        self.user_agent = user_agent;
        self
    }
}

/// Polls subscription feeds for proxies not yet in the store
#[derive(Debug, Clone)]
pub struct SubscriptionPoller {
    client: Client,
    oracle: OracleClient,
}

impl SubscriptionPoller {
    pub fn with_config(config: CrawlerConfig, oracle: OracleClient) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()?;

        Ok(Self { client, oracle })
    }

    /// Fetch a feed body; anything but 200 is an error
    pub async fn fetch(&self, url: &str) -> std::result::Result<Vec<u8>, FeedError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(FeedError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.bytes().await?.to_vec())
    }

    /// Poll one subscription and update its health state.
    ///
    /// Never fails: feed errors end up in the returned subscription's
    /// `alive` and `error_message`.
    pub async fn poll_subscription(
        &self,
        mut subscription: Subscription,
        known_urls: &HashSet<String>,
        pool: &WorkerPool,
    ) -> FeedResult {
        info!(url = %subscription.url, kind = %subscription.kind, "Testing subscription");

        match self.harvest(&subscription, known_urls, pool).await {
            Ok(candidates) => {
                subscription.mark_alive(Utc::now());
                info!(url = %subscription.url, found = candidates.len(), "Subscription polled");
                FeedResult::success(subscription, candidates)
            }
            Err(e) => {
                let message = e.to_string();
                warn!(url = %subscription.url, error = %message, "Failed to poll subscription");
                subscription.mark_dead(&message);
                let message = subscription.error_message.clone();
                FeedResult::failure(subscription, message)
            }
        }
    }

    async fn harvest(
        &self,
        subscription: &Subscription,
        known_urls: &HashSet<String>,
        pool: &WorkerPool,
    ) -> std::result::Result<Vec<ProxyRecord>, FeedError> {
        let body = pool.run(self.fetch(&subscription.url)).await?;
        let entries = LineDecoder::decode(&body, subscription.kind).map_err(|source| FeedError::Decode {
            url: subscription.url.clone(),
            source,
        })?;

        // Parsed in feed order; probing below completes in any order
        let new_urls: Vec<String> = entries
            .filter_map(|entry| ProxyParser::canonical_url(&entry))
            .filter(|url| !known_urls.contains(url))
            .collect();

        let candidates = pool
            .map(new_urls, |url| self.probe(url, pool))
            .await
            .into_iter()
            .flatten()
            .collect();

        Ok(candidates)
    }

    /// Keep `url` only if the oracle places it somewhere
    async fn probe(&self, url: String, pool: &WorkerPool) -> Option<ProxyRecord> {
        match pool.run(self.oracle.check(&url)).await {
            OracleOutcome::Reachable(report) => Some(ProxyRecord::discovered(url, &report, Utc::now())),
            OracleOutcome::Unreachable(reason) => {
                debug!(%url, %reason, "Discarding unreachable entry");
                None
            }
        }
    }

    /// Poll every subscription, persisting each one as soon as it finishes.
    ///
    /// Returns after all feeds and all of their probes have completed.
    pub async fn poll_all(
        &self,
        subscriptions: Vec<Subscription>,
        known_urls: &HashSet<String>,
        db: &ProxyDatabase,
        pool: &WorkerPool,
    ) -> PollReport {
        pool.map(subscriptions, |subscription| async move {
            let result = self.poll_subscription(subscription, known_urls, pool).await;
            if let Err(e) = db.update_subscription(&result.subscription).await {
                error!(url = %result.subscription.url, error = %e, "Failed to save subscription");
            }
            result
        })
        .await
        .into_iter()
        .collect()
    }
}
