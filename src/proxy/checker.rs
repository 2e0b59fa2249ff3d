//! Proxy validator keeping stored proxies' health up to date

use crate::models::ProxyRecord;
use crate::proxy::models::OracleOutcome;
use crate::proxy::oracle::OracleClient;
use crate::proxy::pool::WorkerPool;
use chrono::Utc;
use tracing::debug;

/// Counts of one validation batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationSummary {
    pub checked: usize,
    pub active: usize,
    pub inactive: usize,
}

/// Validates proxies against the oracle and updates them in place
#[derive(Debug, Clone)]
pub struct ProxyValidator {
    oracle: OracleClient,
}

impl ProxyValidator {
    pub fn new(oracle: OracleClient) -> Self {
        Self { oracle }
    }

    /// Validate one proxy, returning whether it is active
    pub async fn validate(&self, proxy: &mut ProxyRecord, pool: &WorkerPool) -> bool {
        let outcome = pool.run(self.oracle.check(&proxy.url)).await;

        match outcome {
            OracleOutcome::Reachable(report) => {
                let country = if proxy.needs_country_lookup(&report) {
                    Some(pool.run(self.oracle.country_name(&report.country_code)).await)
                } else {
                    None
                };
                proxy.record_success(&report, country, Utc::now());
                debug!(url = %proxy.url, location = %proxy.location, "Proxy is active");
                true
            }
            OracleOutcome::Unreachable(reason) => {
                proxy.record_failure(Utc::now());
                debug!(url = %proxy.url, %reason, "Proxy is unreachable");
                false
            }
        }
    }

    /// Validate every proxy with bounded parallelism.
    ///
    /// Returns only after each proxy has been attempted. The updated records
    /// come back in completion order.
    pub async fn validate_batch(
        &self,
        proxies: Vec<ProxyRecord>,
        pool: &WorkerPool,
    ) -> (Vec<ProxyRecord>, ValidationSummary) {
        let results = pool
            .map(proxies, |mut proxy| async move {
                let active = self.validate(&mut proxy, pool).await;
                (proxy, active)
            })
            .await;

        let active = results.iter().filter(|(_, active)| *active).count();
        let summary = ValidationSummary {
            checked: results.len(),
            active,
            inactive: results.len() - active,
        };
        (results.into_iter().map(|(proxy, _)| proxy).collect(), summary)
    }
}
