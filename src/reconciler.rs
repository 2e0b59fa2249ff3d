//! Writes batch results back to the store, resolving URL conflicts
//!
//! Duplicates are only detected when the store rejects a write. A rejected
//! write is never escalated: one of the two records is dropped instead.

use crate::database::ProxyDatabase;
use crate::error::StoreError;
use crate::models::ProxyRecord;
use tracing::{debug, info, warn};

/// What happened to one record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    /// Written to the store
    Saved,
    /// Another record already held the URL and this one was dropped
    Discarded,
    /// Another record already held the URL and lost to this one
    Replaced,
    /// The row was deleted while the batch ran
    Missing,
    /// The store failed for another reason
    Failed,
}

/// Counts of one persisted batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub saved: usize,
    pub discarded: usize,
    pub replaced: usize,
    pub missing: usize,
    pub failed: usize,
}

impl ReconcileReport {
    fn record(&mut self, outcome: PersistOutcome) {
        match outcome {
            PersistOutcome::Saved => self.saved += 1,
            PersistOutcome::Discarded => self.discarded += 1,
            PersistOutcome::Replaced => self.replaced += 1,
            PersistOutcome::Missing => self.missing += 1,
            PersistOutcome::Failed => self.failed += 1,
        }
    }
}

pub struct Reconciler {
    db: ProxyDatabase,
}

impl Reconciler {
    pub fn new(db: ProxyDatabase) -> Self {
        Self { db }
    }

    /// Insert newly discovered proxies. A URL that is already stored keeps
    /// the stored record and the candidate is dropped.
    pub async fn persist_discovered(&self, candidates: Vec<ProxyRecord>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for candidate in candidates {
            report.record(self.insert(&candidate).await);
        }
        info!(
            saved = report.saved,
            discarded = report.discarded,
            failed = report.failed,
            "Persisted discovered proxies"
        );
        report
    }

    /// Write back validated proxies
    pub async fn persist_validated(&self, proxies: Vec<ProxyRecord>) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for proxy in proxies {
            report.record(self.update(&proxy).await);
        }
        info!(
            saved = report.saved,
            discarded = report.discarded,
            replaced = report.replaced,
            missing = report.missing,
            failed = report.failed,
            "Persisted validated proxies"
        );
        report
    }

    async fn insert(&self, candidate: &ProxyRecord) -> PersistOutcome {
        match self.db.insert_proxy(candidate).await {
            Ok(()) => PersistOutcome::Saved,
            Err(StoreError::Conflict { url }) => {
                debug!(%url, "Proxy already stored, discarding candidate");
                PersistOutcome::Discarded
            }
            Err(e) => {
                warn!(url = %candidate.url, error = %e, "Failed to save proxy");
                PersistOutcome::Failed
            }
        }
    }

    async fn update(&self, proxy: &ProxyRecord) -> PersistOutcome {
        match self.db.update_proxy(proxy).await {
            Ok(true) => PersistOutcome::Saved,
            Ok(false) => {
                debug!(url = %proxy.url, "Proxy was removed during validation");
                PersistOutcome::Missing
            }
            Err(e) if e.is_conflict() => self.resolve_conflict(proxy).await,
            Err(e) => {
                warn!(url = %proxy.url, error = %e, "Failed to save proxy");
                PersistOutcome::Failed
            }
        }
    }

    async fn resolve_conflict(&self, proxy: &ProxyRecord) -> PersistOutcome {
        self.keep_stronger(proxy).await.unwrap_or_else(|e| {
            warn!(url = %proxy.url, error = %e, "Failed to resolve duplicate proxy");
            PersistOutcome::Failed
        })
    }

    /// Keep whichever of `proxy` and the stored holder of its URL has more
    /// successful checks; ties keep the stored record.
    async fn keep_stronger(&self, proxy: &ProxyRecord) -> Result<PersistOutcome, StoreError> {
        let Some(stored) = self.db.get_proxy_by_url(&proxy.url).await? else {
            // The holder vanished; the URL is free again
            return Ok(if self.db.update_proxy(proxy).await? {
                PersistOutcome::Saved
            } else {
                PersistOutcome::Missing
            });
        };

        if proxy.times_check_succeeded > stored.times_check_succeeded {
            self.db.delete_proxy(&stored.id).await?;
            self.db.update_proxy(proxy).await?;
            info!(url = %proxy.url, dropped = %stored.id, "Replaced duplicate proxy");
            Ok(PersistOutcome::Replaced)
        } else {
            self.db.delete_proxy(&proxy.id).await?;
            info!(url = %proxy.url, dropped = %proxy.id, "Discarded duplicate proxy");
            Ok(PersistOutcome::Discarded)
        }
    }
}
