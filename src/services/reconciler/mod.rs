//! Reconciliation loop.
//!
//! Periodically diffs the pods the store knows about against the pods the
//! cluster says are scrapeable:
//!
//! - live but unknown: scrape and upsert
//! - known but no longer live: delete and collect orphans
//! - both: left alone (a pod's topology is fixed for its lifetime)
//!
//! Passes never overlap. The timer is re-armed only after a pass finishes.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DiscoveryConfig;
use crate::discovery::{PodInfo, Scraper};
use crate::storage::{TopologyError, TopologyStore};

/// Errors that stop the reconciliation loop.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("topology store error: {0}")]
    Store(#[from] TopologyError),
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// New pods scraped and stored.
    pub added: usize,
    /// New pods whose scrape failed or ran past the deadline.
    pub failed: usize,
    /// Known pods no longer live, removed from the store.
    pub removed: usize,
    /// Pods both known and live.
    pub unchanged: usize,
    /// The pod listing failed; nothing was changed.
    pub listing_failed: bool,
}

/// Drives the scraper and the topology store.
pub struct Reconciler {
    store: Arc<dyn TopologyStore>,
    scraper: Arc<Scraper>,
    interval: Duration,
    scrape_deadline: Duration,
    concurrency: usize,
}

impl Reconciler {
    pub fn new(store: Arc<dyn TopologyStore>, scraper: Scraper, config: &DiscoveryConfig) -> Self {
        Self {
            store,
            scraper: Arc::new(scraper),
            interval: config.interval(),
            scrape_deadline: config.scrape_deadline(),
            concurrency: config.scrape_concurrency.max(1),
        }
    }

    /// Run passes until `cancel` fires. The first pass starts immediately.
    ///
    /// Returns `Ok` when cancelled; a store error ends the loop with `Err`.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), ReconcileError> {
        info!(
            interval = ?self.interval,
            scrape_deadline = ?self.scrape_deadline,
            concurrency = self.concurrency,
            "Starting reconciler"
        );

        while !cancel.is_cancelled() {
            self.reconcile_once(&cancel).await?;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.interval) => {}
            }
        }

        info!("Reconciler stopped");
        Ok(())
    }

    /// Run a single pass.
    pub async fn reconcile_once(
        &self,
        cancel: &CancellationToken,
    ) -> Result<PassReport, ReconcileError> {
        let mut report = PassReport::default();
        let known = self.store.list_known_pod_names().await?;
        let deadline = Instant::now() + self.scrape_deadline;

        // An unknown live set must never be read as "nothing is running".
        let listing = tokio::select! {
            _ = cancel.cancelled() => return Ok(report),
            listing = tokio::time::timeout_at(deadline, self.scraper.list_candidates()) => listing,
        };
        let live = match listing {
            Ok(Ok(pods)) => pods,
            Ok(Err(e)) => {
                warn!(error = %e, "Pod listing failed, skipping pass");
                report.listing_failed = true;
                return Ok(report);
            }
            Err(_) => {
                warn!(deadline = ?self.scrape_deadline, "Pod listing timed out, skipping pass");
                report.listing_failed = true;
                return Ok(report);
            }
        };

        // Pods are stored under `namespace/name`; bare names repeat across namespaces.
        let live_names: BTreeSet<String> = live.iter().map(PodInfo::qualified_name).collect();
        report.unchanged = live_names.intersection(&known).count();
        let new_pods: Vec<(String, PodInfo)> = live
            .into_iter()
            .map(|p| (p.qualified_name(), p))
            .filter(|(name, _)| !known.contains(name))
            .collect();

        let pending = new_pods.len();
        let mut fetches = futures::stream::iter(new_pods)
            .map(|(name, pod)| {
                let scraper = Arc::clone(&self.scraper);
                async move {
                    let result = scraper.fetch_topology(&pod).await;
                    (name, result)
                }
            })
            .buffer_unordered(self.concurrency);

        loop {
            let next = tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Pass cancelled while scraping");
                    return Ok(report);
                }
                next = tokio::time::timeout_at(deadline, fetches.next()) => next,
            };

            match next {
                Ok(Some((pod, Ok(service)))) => {
                    self.store.upsert(&pod, &service).await?;
                    info!(pod = %pod, service = %service.name, "Pod added to topology");
                    report.added += 1;
                }
                Ok(Some((pod, Err(e)))) => {
                    warn!(pod = %pod, error = %e, "Scrape failed, will retry next pass");
                    report.failed += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    let abandoned = pending - report.added - report.failed;
                    warn!(abandoned, deadline = ?self.scrape_deadline, "Scrape deadline exceeded");
                    report.failed += abandoned;
                    break;
                }
            }
        }
        drop(fetches);

        for pod in known.difference(&live_names) {
            if cancel.is_cancelled() {
                return Ok(report);
            }
            self.store.delete(pod).await?;
            info!(pod = %pod, "Pod removed from topology");
            report.removed += 1;
        }

        info!(
            added = report.added,
            failed = report.failed,
            removed = report.removed,
            unchanged = report.unchanged,
            "Reconciliation pass complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests;
