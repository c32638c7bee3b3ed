//! Sync pass for one entity type: query sources → normalize → merge → commit.
//!
//! [`SyncOrchestrator::refresh`] drives the per-type state machine
//! (fresh → stale → syncing → fresh | failed) around a single pass.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SubsecRound, Utc};
use serde::Serialize;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use kbsync_adapters::{AdapterRegistry, Normalized};
use kbsync_endpoint::{Binding, SparqlClient};
use kbsync_reconcile::{MergeOptions, MergeReport, Reliability, link_provinces, merge};
use kbsync_shared::{
    EndpointSettings, EntityType, Field, FieldStats, KbSyncError, Result, SourceKind,
};
use kbsync_storage::{CommitBatch, CommitReport, Storage};

use crate::freshness::FreshnessTracker;

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for sync passes.
pub trait SyncProgress: Send + Sync {
    /// Called when a pass enters a new phase.
    fn phase(&self, entity_type: EntityType, name: &str);
    /// Called once per relevant source, after its response was normalized.
    fn source_finished(&self, entity_type: EntityType, report: &SourceReport);
    /// Called when a refresh attempt settles.
    fn done(&self, entity_type: EntityType, outcome: &RefreshOutcome);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl SyncProgress for SilentProgress {
    fn phase(&self, _entity_type: EntityType, _name: &str) {}
    fn source_finished(&self, _entity_type: EntityType, _report: &SourceReport) {}
    fn done(&self, _entity_type: EntityType, _outcome: &RefreshOutcome) {}
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What one source contributed to a pass.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source: SourceKind,
    pub rows: usize,
    pub rows_skipped: usize,
    pub dtos: usize,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

impl SourceReport {
    /// Usable data: answered without error and produced at least one DTO.
    pub fn usable(&self) -> bool {
        self.error.is_none() && self.dtos > 0
    }
}

/// Statistics of one committed sync pass.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStats {
    pub entity_type: EntityType,
    pub synced_at: DateTime<Utc>,
    pub sources: Vec<SourceReport>,
    pub merge: MergeReport,
    pub commit: CommitReport,
    pub records: usize,
    /// Parks whose province reference resolved to a stored province.
    pub provinces_linked: usize,
    pub duration_ms: u64,
}

impl SyncStats {
    /// Some relevant source failed, so the pass ran in carry-forward mode.
    pub fn partial(&self) -> bool {
        self.sources.iter().any(|s| !s.usable())
    }
}

/// How a refresh attempt settled.
#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    /// Within TTL; nothing was done.
    AlreadyFresh,
    /// This caller ran a pass and committed it.
    Refreshed(SyncStats),
    /// This caller ran a pass and it failed; the store is untouched.
    Failed(String),
    /// Another caller's pass finished while this one waited.
    Waited,
    /// Another caller's pass was still running when the wait budget ran out.
    InProgress,
    /// A recent failure blocks automatic retries.
    CoolingDown,
}

/// A source's response, before normalization.
struct Fetched {
    source: SourceKind,
    result: Result<Vec<Binding>>,
    elapsed: Duration,
}

/// A source's contribution, after normalization.
struct SourceResult {
    report: SourceReport,
    normalized: Option<Normalized>,
}

impl SourceResult {
    fn failed(source: SourceKind, elapsed_ms: u64, error: String) -> Self {
        Self {
            report: SourceReport {
                source,
                rows: 0,
                rows_skipped: 0,
                dtos: 0,
                elapsed_ms,
                error: Some(error),
            },
            normalized: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct SyncOrchestrator {
    client: Arc<SparqlClient>,
    registry: Arc<AdapterRegistry>,
    endpoints: Vec<EndpointSettings>,
    store: Arc<Storage>,
    tracker: Arc<FreshnessTracker>,
    progress: Arc<dyn SyncProgress>,
}

impl SyncOrchestrator {
    pub fn new(
        client: Arc<SparqlClient>,
        registry: Arc<AdapterRegistry>,
        endpoints: Vec<EndpointSettings>,
        store: Arc<Storage>,
        tracker: Arc<FreshnessTracker>,
    ) -> Self {
        Self {
            client,
            registry,
            endpoints,
            store,
            tracker,
            progress: Arc::new(SilentProgress),
        }
    }

    pub fn with_progress(mut self, progress: Arc<dyn SyncProgress>) -> Self {
        self.progress = progress;
        self
    }

    pub fn tracker(&self) -> &FreshnessTracker {
        &self.tracker
    }

    /// Bring `entity_type` up to date.
    ///
    /// Without `force`, a fresh type or one in its failure cooldown is left
    /// alone. A caller that loses the race for the refresh lock waits up to
    /// the lock-wait budget for the winner and never queries remotes itself.
    #[instrument(skip_all, fields(%entity_type, force))]
    pub async fn refresh(&self, entity_type: EntityType, force: bool) -> RefreshOutcome {
        let outcome = self.refresh_inner(entity_type, force).await;
        self.progress.done(entity_type, &outcome);
        outcome
    }

    async fn refresh_inner(&self, entity_type: EntityType, force: bool) -> RefreshOutcome {
        let tracker = &self.tracker;

        if !force {
            if !tracker.is_stale(entity_type, Utc::now()) {
                return RefreshOutcome::AlreadyFresh;
            }
            if tracker.in_cooldown(entity_type, Utc::now()) {
                debug!("failure cooldown active, serving stored records");
                return RefreshOutcome::CoolingDown;
            }
        }

        let Some(guard) = tracker.try_acquire_refresh_lock(entity_type) else {
            debug!("refresh already in flight, waiting");
            let budget = tracker.settings().lock_wait;
            return if tracker.wait_for_refresh(entity_type, budget).await {
                RefreshOutcome::Waited
            } else {
                RefreshOutcome::InProgress
            };
        };

        // Somebody may have finished a pass between the check and the lock.
        if !force && !tracker.is_stale(entity_type, Utc::now()) {
            return RefreshOutcome::AlreadyFresh;
        }

        let run_id = match self.store.insert_sync_run(entity_type).await {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(error = %e, "failed to record sync run start");
                None
            }
        };

        let result = self.run_sync(entity_type).await;

        if let Some(id) = run_id {
            let (outcome, stats_json) = match &result {
                Ok(stats) => (
                    "fresh",
                    serde_json::to_string(stats).unwrap_or_else(|_| "{}".into()),
                ),
                Err(e) => (
                    "failed",
                    serde_json::json!({ "error": e.to_string() }).to_string(),
                ),
            };
            if let Err(e) = self.store.finish_sync_run(&id, outcome, &stats_json).await {
                warn!(error = %e, "failed to record sync run finish");
            }
        }

        let outcome = match result {
            Ok(stats) => {
                tracker.mark_refreshed(entity_type, stats.synced_at);
                info!(
                    records = stats.records,
                    partial = stats.partial(),
                    duration_ms = stats.duration_ms,
                    "sync pass committed"
                );
                RefreshOutcome::Refreshed(stats)
            }
            Err(e) => {
                tracker.record_failure(entity_type, Utc::now());
                warn!(error = %e, "sync pass failed, keeping stored records");
                RefreshOutcome::Failed(e.to_string())
            }
        };
        drop(guard);
        outcome
    }

    /// One full pass. Touches the store only in the final commit.
    async fn run_sync(&self, entity_type: EntityType) -> Result<SyncStats> {
        let started = Instant::now();

        self.progress.phase(entity_type, "querying sources");
        let results = self.fetch_all(entity_type).await;
        for result in &results {
            self.progress.source_finished(entity_type, &result.report);
        }

        if results.is_empty() {
            return Err(KbSyncError::config(format!(
                "no enabled source describes {entity_type}"
            )));
        }
        if !results.iter().any(|r| r.report.usable()) {
            let reason = results
                .iter()
                .filter_map(|r| {
                    r.report
                        .error
                        .as_ref()
                        .map(|e| format!("{}: {e}", r.report.source))
                })
                .collect::<Vec<_>>();
            return Err(if reason.is_empty() {
                KbSyncError::parse(format!("no source returned usable {entity_type} data"))
            } else {
                KbSyncError::parse(format!("all sources failed ({})", reason.join("; ")))
            });
        }
        let any_failed = results.iter().any(|r| !r.report.usable());

        self.progress.phase(entity_type, "merging");
        let mut reliability = Reliability::new();
        for (source, field, stats) in self.store.load_field_stats(entity_type).await? {
            reliability.add(source, field, stats);
        }

        let mut batch_stats: Vec<(SourceKind, Field, FieldStats)> = Vec::new();
        let mut dtos = Vec::new();
        let mut reports = Vec::with_capacity(results.len());
        for SourceResult { report, normalized } in results {
            if let Some(normalized) = normalized {
                for (field, stats) in &normalized.report.field_stats {
                    reliability.add(report.source, *field, *stats);
                    batch_stats.push((report.source, *field, *stats));
                }
                dtos.extend(normalized.dtos);
            }
            reports.push(report);
        }

        let existing = self.store.list_entities(entity_type).await?;
        let synced_at = Utc::now().trunc_subsecs(6);
        let outcome = merge(
            entity_type,
            dtos,
            &existing,
            &reliability,
            &MergeOptions {
                carry_forward: any_failed,
                synced_at,
            },
        );
        let mut records = outcome.records;

        let provinces_linked = if entity_type == EntityType::NationalPark {
            let provinces = self.store.list_entities(EntityType::Province).await?;
            link_provinces(&mut records, &provinces)
        } else {
            0
        };

        self.progress.phase(entity_type, "committing");
        let commit = self
            .store
            .commit_batch(&CommitBatch {
                entity_type,
                records: &records,
                synced_at,
                field_stats: &batch_stats,
            })
            .await?;

        Ok(SyncStats {
            entity_type,
            synced_at,
            sources: reports,
            merge: outcome.report,
            commit,
            records: records.len(),
            provinces_linked,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Query every enabled, relevant source concurrently. Sources still
    /// outstanding at the overall deadline are aborted and reported failed.
    async fn fetch_all(&self, entity_type: EntityType) -> Vec<SourceResult> {
        let deadline = Instant::now() + self.tracker.settings().overall_timeout;
        let mut tasks = JoinSet::new();
        let mut pending = Vec::new();

        for adapter in self.registry.relevant(entity_type) {
            let source = adapter.source();
            let Some(endpoint) = self.endpoints.iter().find(|e| e.source == source) else {
                continue;
            };
            if !endpoint.enabled {
                debug!(%source, "endpoint disabled, skipping");
                continue;
            }
            let Some(query) = adapter.query_for(entity_type) else {
                continue;
            };

            let client = Arc::clone(&self.client);
            let url = endpoint.url.clone();
            let timeout = endpoint.timeout;
            pending.push(source);
            tasks.spawn(async move {
                let started = Instant::now();
                let result = client.execute(query, &url, timeout).await;
                Fetched {
                    source,
                    result,
                    elapsed: started.elapsed(),
                }
            });
        }

        let mut fetched = Vec::with_capacity(pending.len());
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok(item))) => fetched.push(item),
                Ok(Some(Err(e))) => warn!(error = %e, "source task aborted"),
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        outstanding = tasks.len(),
                        "overall sync timeout reached, aborting remaining sources"
                    );
                    tasks.abort_all();
                    break;
                }
            }
        }

        pending
            .into_iter()
            .map(|source| {
                match fetched.iter().position(|f| f.source == source) {
                    Some(i) => self.normalize(entity_type, fetched.swap_remove(i)),
                    None => SourceResult::failed(
                        source,
                        0,
                        "no response before the overall timeout".into(),
                    ),
                }
            })
            .collect()
    }

    fn normalize(&self, entity_type: EntityType, fetched: Fetched) -> SourceResult {
        let Fetched {
            source,
            result,
            elapsed,
        } = fetched;
        let elapsed_ms = elapsed.as_millis() as u64;

        let rows = match result {
            Ok(rows) => rows,
            Err(e) => {
                if e.is_source_failure() {
                    warn!(%source, error = %e, "source query failed");
                } else {
                    error!(%source, error = %e, "source query could not be issued");
                }
                return SourceResult::failed(source, elapsed_ms, e.to_string());
            }
        };

        let Some(adapter) = self.registry.get(source) else {
            return SourceResult::failed(
                source,
                elapsed_ms,
                format!("no adapter registered for {source}"),
            );
        };

        let normalized = adapter.normalize(entity_type, &rows);
        debug!(
            %source,
            rows = normalized.report.rows_seen,
            skipped = normalized.report.rows_skipped,
            dtos = normalized.dtos.len(),
            "normalized source response"
        );
        SourceResult {
            report: SourceReport {
                source,
                rows: normalized.report.rows_seen,
                rows_skipped: normalized.report.rows_skipped,
                dtos: normalized.dtos.len(),
                elapsed_ms,
                error: None,
            },
            normalized: Some(normalized),
        }
    }
}
