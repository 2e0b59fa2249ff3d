//! Cycle orchestrators
//!
//! [`Harvester`] owns the store handle, the HTTP clients and the worker pool,
//! and exposes the two periodic entry points: the status refresh cycle and
//! the subscription poll cycle. Neither returns an error; every failure is
//! logged and reflected in the stored records.

use crate::database::ProxyDatabase;
use crate::models::ProxyRecord;
use crate::proxy::checker::{ProxyValidator, ValidationSummary};
use crate::proxy::crawler::{PollReport, SubscriptionPoller};
use crate::proxy::oracle::OracleClient;
use crate::proxy::pool::WorkerPool;
use crate::reconciler::{ReconcileReport, Reconciler};
use crate::{Config, Result};
use reqwest::{Client, StatusCode};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::interval;
use tracing::{debug, error, info, instrument, warn};

/// Shortest interval the scheduler accepts
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);

/// Result of one status refresh cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The self-check failed; nothing was validated or written
    Skipped,
    /// The stored proxies could not be loaded
    Aborted,
    Completed {
        summary: ValidationSummary,
        persisted: ReconcileReport,
    },
}

/// Result of one subscription poll cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Known proxies or subscriptions could not be loaded
    Aborted,
    Completed {
        feeds_alive: usize,
        feeds_failed: usize,
        discovered: usize,
        persisted: ReconcileReport,
    },
}

/// Returns true only if `url` answers 204 within `timeout`
pub async fn connectivity_check(client: &Client, url: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, client.get(url).send()).await {
        Ok(Ok(response)) => response.status() == StatusCode::NO_CONTENT,
        Ok(Err(e)) => {
            warn!(%url, error = %e, "Connectivity check failed");
            false
        }
        Err(_) => {
            warn!(%url, "Connectivity check timed out");
            false
        }
    }
}

/// The harvesting pipeline with its injected dependencies
pub struct Harvester {
    config: Config,
    db: ProxyDatabase,
    client: Client,
    validator: ProxyValidator,
    poller: SubscriptionPoller,
    reconciler: Reconciler,
}

impl Harvester {
    pub fn new(config: Config, db: ProxyDatabase) -> Result<Self> {
        let oracle = OracleClient::with_config(config.oracle_config())?;
        let poller = SubscriptionPoller::with_config(config.crawler_config(), oracle.clone())?;
        let client = Client::builder().timeout(config.connectivity_timeout).build()?;

        Ok(Self {
            validator: ProxyValidator::new(oracle),
            reconciler: Reconciler::new(db.clone()),
            config,
            db,
            client,
            poller,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Each cycle gets its own pool
    fn pool(&self) -> WorkerPool {
        WorkerPool::new(self.config.workers)
    }

    /// Gate on the self-check, then validate and write back every stored proxy
    #[instrument(skip(self))]
    pub async fn run_status_refresh(&self) -> RefreshOutcome {
        if !connectivity_check(
            &self.client,
            &self.config.connectivity_url,
            self.config.connectivity_timeout,
        )
        .await
        {
            error!("connection issues, skipping");
            return RefreshOutcome::Skipped;
        }

        let proxies = match self.db.get_all_proxies().await {
            Ok(proxies) => proxies,
            Err(e) => {
                error!(error = %e, "Failed to load proxies");
                return RefreshOutcome::Aborted;
            }
        };

        let (summary, persisted) = self.validate_and_persist(proxies).await;
        info!(
            checked = summary.checked,
            active = summary.active,
            inactive = summary.inactive,
            "Status refresh finished"
        );
        RefreshOutcome::Completed { summary, persisted }
    }

    /// Validate the stored proxies with the given URLs, outside the schedule.
    ///
    /// URLs that are not stored are ignored; repeated URLs are checked once.
    #[instrument(skip(self))]
    pub async fn refresh_selected(&self, urls: &[String]) -> Result<ValidationSummary> {
        let mut seen = HashSet::new();
        let mut proxies = Vec::with_capacity(urls.len());
        for url in urls.iter().filter(|url| seen.insert(url.as_str())) {
            match self.db.get_proxy_by_url(url).await? {
                Some(proxy) => proxies.push(proxy),
                None => warn!(%url, "Proxy is not stored"),
            }
        }

        let (summary, _) = self.validate_and_persist(proxies).await;
        Ok(summary)
    }

    async fn validate_and_persist(&self, proxies: Vec<ProxyRecord>) -> (ValidationSummary, ReconcileReport) {
        let (proxies, summary) = self.validator.validate_batch(proxies, &self.pool()).await;
        let persisted = self.reconciler.persist_validated(proxies).await;
        (summary, persisted)
    }

    /// Poll every enabled subscription and persist the newly found proxies
    #[instrument(skip(self))]
    pub async fn run_subscription_poll(&self) -> PollOutcome {
        let known_urls: HashSet<String> = match self.db.get_proxy_urls().await {
            Ok(urls) => urls.into_iter().collect(),
            Err(e) => {
                error!(error = %e, "Failed to load known proxy urls");
                return PollOutcome::Aborted;
            }
        };
        let subscriptions = match self.db.get_subscriptions_by_enabled(true).await {
            Ok(subscriptions) => subscriptions,
            Err(e) => {
                error!(error = %e, "Failed to load subscriptions");
                return PollOutcome::Aborted;
            }
        };

        let PollReport {
            feeds_alive,
            feeds_failed,
            candidates,
        } = self
            .poller
            .poll_all(subscriptions, &known_urls, &self.db, &self.pool())
            .await;

        let discovered = candidates.len();
        let persisted = self.reconciler.persist_discovered(candidates).await;
        info!(feeds_alive, feeds_failed, discovered, saved = persisted.saved, "Subscription poll finished");

        PollOutcome::Completed {
            feeds_alive,
            feeds_failed,
            discovered,
            persisted,
        }
    }
}

/// Run both cycles on their own intervals until Ctrl-C.
///
/// Each cycle runs once at startup. Intervals below [`MIN_INTERVAL`] are
/// raised to it.
pub async fn run_scheduler(harvester: Arc<Harvester>) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let refresh = {
        let harvester = Arc::clone(&harvester);
        let every = harvester.config().refresh_interval;
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            run_every(every, shutdown, move || {
                let harvester = Arc::clone(&harvester);
                async move {
                    harvester.run_status_refresh().await;
                }
            })
            .await
        })
    };

    let poll = {
        let harvester = Arc::clone(&harvester);
        let every = harvester.config().poll_interval;
        tokio::spawn(async move {
            run_every(every, shutdown_rx, move || {
                let harvester = Arc::clone(&harvester);
                async move {
                    harvester.run_subscription_poll().await;
                }
            })
            .await
        })
    };

    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, shutting down");
    if shutdown_tx.send(true).is_err() {
        debug!("Cycle tasks already stopped");
    }

    refresh.await?;
    poll.await?;
    Ok(())
}

async fn run_every<F, Fut>(every: Duration, mut shutdown: watch::Receiver<bool>, mut job: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    let mut ticker = interval(every.max(MIN_INTERVAL));
    loop {
        tokio::select! {
            _ = ticker.tick() => job().await,
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
