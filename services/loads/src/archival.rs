use crate::activity_log::ActivityLog;
use crate::config::ArchivalConfig;
use crate::model::LoadRecord;
use crate::store::LoadStore;
use chrono::{DateTime, Duration, Utc};
use futures::stream::{self, StreamExt};
use mockable::Clock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

/// Decision on whether to archive a load
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveDecision {
    /// Archive the load with given reason
    Archive { reason: String },
    /// Leave the load as-is with given reason
    Skip { reason: String },
}

impl ArchiveDecision {
    pub fn is_archive(&self) -> bool {
        matches!(self, ArchiveDecision::Archive { .. })
    }
}

/// Counts from an archive sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub scanned: usize,
    pub archived: usize,
}

/// Counts from a purge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    pub scanned: usize,
    pub deleted: usize,
}

/// Status + time-window archival policy.
///
/// A load is archived once its status is in the eligible set and more than
/// the window has passed since its delivery date. Already-archived records
/// are left alone, so a second sweep archives nothing. `expiresAtMs` plays
/// no part in the decision.
#[derive(Debug, Clone)]
pub struct ArchivalEngine {
    window: Duration,
    eligible_statuses: Vec<String>,
}

impl ArchivalEngine {
    pub fn new(config: &ArchivalConfig) -> Self {
        Self {
            window: config.window(),
            eligible_statuses: config
                .eligible_statuses
                .iter()
                .map(|s| s.to_lowercase())
                .collect(),
        }
    }

    pub fn eligible_statuses(&self) -> &[String] {
        &self.eligible_statuses
    }

    /// Decide whether `record` should be archived at `now`
    pub fn evaluate(&self, record: &LoadRecord, now: DateTime<Utc>) -> ArchiveDecision {
        if record.is_archived {
            return ArchiveDecision::Skip {
                reason: "Already archived".to_string(),
            };
        }

        let status = record.status.as_str();
        if !self.eligible_statuses.iter().any(|s| s.eq_ignore_ascii_case(status)) {
            return ArchiveDecision::Skip {
                reason: format!("Status '{status}' is not eligible"),
            };
        }

        let Some(delivered) = record.delivery_date else {
            return ArchiveDecision::Skip {
                reason: "No delivery date".to_string(),
            };
        };

        let elapsed = now.signed_duration_since(delivered);
        if elapsed <= self.window {
            return ArchiveDecision::Skip {
                reason: format!(
                    "Delivered {}h ago, window is {}h",
                    elapsed.num_hours(),
                    self.window.num_hours()
                ),
            };
        }

        ArchiveDecision::Archive {
            reason: format!("Status '{status}' delivered {} days ago", elapsed.num_days()),
        }
    }

    /// Archive every eligible record in place
    pub fn sweep(&self, candidates: &mut [LoadRecord], now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for record in candidates.iter_mut() {
            report.scanned += 1;
            match self.evaluate(record, now) {
                ArchiveDecision::Archive { reason } => {
                    trace!(load_id = %record.id, reason = %reason, "Archiving load");
                    record.mark_archived(now);
                    report.archived += 1;
                }
                ArchiveDecision::Skip { reason } => {
                    trace!(load_id = %record.id, reason = %reason, "Skipping load");
                }
            }
        }

        report
    }

    /// Archived records whose `archived_at` is more than `older_than_days` before `now`
    pub fn select_for_purge<'a>(
        &self,
        candidates: &'a [LoadRecord],
        older_than_days: u32,
        now: DateTime<Utc>,
    ) -> Vec<&'a LoadRecord> {
        let cutoff = now - Duration::days(i64::from(older_than_days));

        candidates
            .iter()
            .filter(|r| r.is_archived)
            .filter(|r| matches!(r.archived_at, Some(at) if at < cutoff))
            .collect()
    }
}

/// Runs the engine against a store.
///
/// Sweeps are not coordinated across processes; only one should run against
/// a store at a time.
pub struct ArchivalService {
    engine: ArchivalEngine,
    store: Arc<dyn LoadStore>,
    clock: Arc<dyn Clock>,
    activity: Arc<ActivityLog>,
    write_concurrency: usize,
}

impl ArchivalService {
    pub fn new(
        config: &ArchivalConfig,
        store: Arc<dyn LoadStore>,
        clock: Arc<dyn Clock>,
        activity: Arc<ActivityLog>,
    ) -> Self {
        Self {
            engine: ArchivalEngine::new(config),
            store,
            clock,
            activity,
            write_concurrency: config.write_concurrency.max(1),
        }
    }

    pub fn engine(&self) -> &ArchivalEngine {
        &self.engine
    }

    /// Archive every eligible load in the store.
    ///
    /// `archived` counts successful write-backs only; a failed write shows
    /// up as an undercount rather than an error.
    #[instrument(skip(self))]
    pub async fn archive_now(&self) -> anyhow::Result<SweepReport> {
        let now = self.clock.utc();
        let mut candidates = self
            .store
            .fetch_archive_candidates(self.engine.eligible_statuses())
            .await?;

        let decided = self.engine.sweep(&mut candidates, now);
        let to_write: Vec<LoadRecord> = candidates
            .into_iter()
            .filter(|r| r.is_archived && r.archived_at == Some(now))
            .collect();

        let store = self.store.clone();
        let archived = stream::iter(to_write)
            .map(|record| {
                let store = store.clone();
                async move {
                    match store.save(&record).await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(load_id = %record.id, error = %e, "Failed to write archived load");
                            metrics::counter!("loads.archival.write_failures").increment(1);
                            false
                        }
                    }
                }
            })
            .buffer_unordered(self.write_concurrency)
            .filter(|ok| futures::future::ready(*ok))
            .count()
            .await;

        let report = SweepReport {
            scanned: decided.scanned,
            archived,
        };

        metrics::counter!("loads.archival.scanned").increment(report.scanned as u64);
        metrics::counter!("loads.archival.archived").increment(report.archived as u64);
        info!(scanned = report.scanned, archived = report.archived, "Archive sweep finished");
        self.activity.append(format!(
            "archive sweep: scanned={} archived={}",
            report.scanned, report.archived
        )).await;

        Ok(report)
    }

    /// Delete archived loads older than `older_than_days`
    #[instrument(skip(self))]
    pub async fn purge_now(&self, older_than_days: u32) -> anyhow::Result<PurgeReport> {
        let now = self.clock.utc();
        let archived = self.store.fetch_archived().await?;
        let ids: Vec<String> = self
            .engine
            .select_for_purge(&archived, older_than_days, now)
            .into_iter()
            .map(|r| r.id.clone())
            .collect();

        let store = self.store.clone();
        let deleted = stream::iter(ids)
            .map(|id| {
                let store = store.clone();
                async move {
                    match store.delete(&id).await {
                        Ok(existed) => existed,
                        Err(e) => {
                            warn!(load_id = %id, error = %e, "Failed to purge load");
                            false
                        }
                    }
                }
            })
            .buffer_unordered(self.write_concurrency)
            .filter(|ok| futures::future::ready(*ok))
            .count()
            .await;

        let report = PurgeReport {
            scanned: archived.len(),
            deleted,
        };

        metrics::counter!("loads.purge.deleted").increment(report.deleted as u64);
        info!(
            scanned = report.scanned,
            deleted = report.deleted,
            older_than_days,
            "Purge finished"
        );
        self.activity.append(format!(
            "purge older than {older_than_days}d: scanned={} deleted={}",
            report.scanned, report.deleted
        )).await;

        Ok(report)
    }

    /// Run `archive_now` every `interval` until `shutdown` fires.
    ///
    /// Sweeps run back to back on one task, so they never overlap.
    pub async fn run_scheduled(self: Arc<Self>, interval: StdDuration, shutdown: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        info!(interval_secs = interval.as_secs(), "Archive scheduler started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Archive scheduler stopped");
                    return;
                }
                _ = ticker.tick() => {
                    debug!("Scheduled archive sweep");
                    if let Err(e) = self.archive_now().await {
                        error!(error = %e, "Scheduled archive sweep failed");
                    }
                }
            }
        }
    }
}
