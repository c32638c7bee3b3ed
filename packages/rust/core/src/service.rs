//! Consumer-facing API: a read-through cache over the local store.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, instrument};

use kbsync_adapters::AdapterRegistry;
use kbsync_endpoint::SparqlClient;
use kbsync_shared::{
    AppConfig, CanonicalRecord, EndpointSettings, EntityType, KbSyncError, RegionConfig, Result,
    SyncSettings, database_path,
};
use kbsync_storage::{CleanReport, SearchHit, Storage, SyncRun};

use crate::freshness::{FreshnessTracker, SyncState};
use crate::orchestrator::{RefreshOutcome, SyncOrchestrator, SyncProgress, SyncStats};

/// Shortest search query accepted, in characters.
pub const MIN_SEARCH_CHARS: usize = 2;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// How the records in a snapshot relate to the remote sources.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum SnapshotStatus {
    /// Within TTL (or just refreshed by a concurrent caller).
    Fresh,
    /// Refreshed by this call.
    Refreshed(SyncStats),
    /// A refresh was attempted and failed; records are the previous ones.
    RefreshFailed(String),
    /// Another caller's refresh outlasted the wait budget.
    RefreshInProgress,
    /// Stale, but a recent failure blocks automatic retries.
    CoolingDown,
}

/// Records of one entity type plus their freshness.
#[derive(Debug, Clone, Serialize)]
pub struct EntitySnapshot {
    pub entity_type: EntityType,
    pub records: Vec<CanonicalRecord>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub status: SnapshotStatus,
}

/// One row of `kbsync status`.
#[derive(Debug, Clone, Serialize)]
pub struct TypeStatus {
    pub entity_type: EntityType,
    pub state: SyncState,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub records: u64,
    pub ttl_secs: u64,
    pub in_cooldown: bool,
}

/// What `clean` removes.
#[derive(Debug, Clone, Default)]
pub struct CleanOptions {
    /// Types to clean; empty means all.
    pub types: Vec<EntityType>,
    /// Also remove records not synced within this long.
    pub not_synced_for: Option<Duration>,
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

/// Entry point for everything that reads entity data.
///
/// `Send + Sync`; share it behind an `Arc` between concurrent callers.
pub struct KnowledgeService {
    store: Arc<Storage>,
    orchestrator: SyncOrchestrator,
    region: RegionConfig,
}

impl KnowledgeService {
    /// Open the configured database and build the service around it.
    pub async fn open(config: &AppConfig) -> Result<Self> {
        let path = database_path(config)?;
        let store = Storage::open(&path).await?;
        Self::with_store(config, Arc::new(store)).await
    }

    /// Build the service over an already-open store. The freshness tracker
    /// is seeded from the store's persisted sync timestamps.
    pub async fn with_store(config: &AppConfig, store: Arc<Storage>) -> Result<Self> {
        let endpoints = EndpointSettings::all(config)?;
        let client = Arc::new(SparqlClient::from_settings(&endpoints)?);

        let tracker = FreshnessTracker::new(SyncSettings::from(config));
        tracker.seed(&store.load_sync_state().await?);

        let orchestrator = SyncOrchestrator::new(
            client,
            Arc::new(AdapterRegistry::new()),
            endpoints,
            Arc::clone(&store),
            Arc::new(tracker),
        );

        Ok(Self {
            store,
            orchestrator,
            region: config.region,
        })
    }

    pub fn with_progress(mut self, progress: Arc<dyn SyncProgress>) -> Self {
        self.orchestrator = self.orchestrator.with_progress(progress);
        self
    }

    /// Current records for `entity_type`, refreshed first when stale.
    #[instrument(skip_all, fields(%entity_type))]
    pub async fn get_entities(&self, entity_type: EntityType) -> Result<EntitySnapshot> {
        let outcome = self.orchestrator.refresh(entity_type, false).await;
        self.snapshot(entity_type, outcome).await
    }

    /// Records after a synchronous refresh attempt, regardless of TTL.
    #[instrument(skip_all, fields(%entity_type))]
    pub async fn force_refresh(&self, entity_type: EntityType) -> Result<EntitySnapshot> {
        let outcome = self.orchestrator.refresh(entity_type, true).await;
        self.snapshot(entity_type, outcome).await
    }

    /// Refresh every type in dependency order (provinces before parks).
    pub async fn refresh_all(&self, force: bool) -> Result<Vec<EntitySnapshot>> {
        let mut snapshots = Vec::with_capacity(EntityType::ALL.len());
        for entity_type in EntityType::ALL {
            let snapshot = if force {
                self.force_refresh(entity_type).await?
            } else {
                self.get_entities(entity_type).await?
            };
            snapshots.push(snapshot);
        }
        Ok(snapshots)
    }

    async fn snapshot(
        &self,
        entity_type: EntityType,
        outcome: RefreshOutcome,
    ) -> Result<EntitySnapshot> {
        let tracker = self.orchestrator.tracker();
        let status = match outcome {
            RefreshOutcome::AlreadyFresh => SnapshotStatus::Fresh,
            RefreshOutcome::Refreshed(stats) => SnapshotStatus::Refreshed(stats),
            RefreshOutcome::Failed(reason) => SnapshotStatus::RefreshFailed(reason),
            RefreshOutcome::InProgress => SnapshotStatus::RefreshInProgress,
            RefreshOutcome::CoolingDown => SnapshotStatus::CoolingDown,
            RefreshOutcome::Waited if tracker.is_stale(entity_type, Utc::now()) => {
                SnapshotStatus::RefreshFailed("concurrent refresh did not succeed".into())
            }
            RefreshOutcome::Waited => SnapshotStatus::Fresh,
        };

        let records = self.store.list_entities(entity_type).await?;
        Ok(EntitySnapshot {
            entity_type,
            records,
            last_synced_at: tracker.last_synced(entity_type),
            status,
        })
    }

    /// Freshness and size of every entity type.
    pub async fn status(&self) -> Result<Vec<TypeStatus>> {
        let tracker = self.orchestrator.tracker();
        let now = Utc::now();
        let mut rows = Vec::with_capacity(EntityType::ALL.len());
        for entity_type in EntityType::ALL {
            rows.push(TypeStatus {
                entity_type,
                state: tracker.state(entity_type, now),
                last_synced_at: tracker.last_synced(entity_type),
                records: self.store.count_entities(entity_type).await?,
                ttl_secs: tracker.settings().ttl_for(entity_type).as_secs(),
                in_cooldown: tracker.in_cooldown(entity_type, now),
            });
        }
        Ok(rows)
    }

    /// Most recent sync passes, newest first.
    pub async fn recent_runs(&self, limit: u32) -> Result<Vec<SyncRun>> {
        self.store.recent_sync_runs(limit).await
    }

    /// Name search across every type, at most `limit` hits per type.
    /// Never triggers a refresh.
    pub async fn search(&self, query: &str, limit: u32) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        if query.chars().count() < MIN_SEARCH_CHARS {
            return Err(KbSyncError::validation(format!(
                "search query must be at least {MIN_SEARCH_CHARS} characters"
            )));
        }

        let mut hits = Vec::new();
        for entity_type in EntityType::ALL {
            hits.extend(self.store.search(entity_type, query, limit).await?);
        }
        Ok(hits)
    }

    /// Remove records outside the configured region and, optionally, records
    /// not synced recently. Never part of a sync pass.
    #[instrument(skip_all)]
    pub async fn clean(&self, options: &CleanOptions) -> Result<Vec<(EntityType, CleanReport)>> {
        let cutoff = match options.not_synced_for {
            Some(age) => {
                let age = chrono::Duration::from_std(age)
                    .map_err(|e| KbSyncError::validation(format!("invalid age: {e}")))?;
                Some(Utc::now() - age)
            }
            None => None,
        };
        let types: Vec<EntityType> = if options.types.is_empty() {
            EntityType::ALL.to_vec()
        } else {
            options.types.clone()
        };

        let mut reports = Vec::with_capacity(types.len());
        for entity_type in types {
            let report = self
                .store
                .clean_entities(entity_type, &self.region, cutoff)
                .await?;
            info!(
                %entity_type,
                outside_region = report.outside_region,
                not_synced = report.not_synced,
                "cleaned"
            );
            reports.push((entity_type, report));
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;
    use kbsync_shared::{EntityAttributes, ProvinceAttrs, SourceKind};
    use wiremock::MockServer;

    async fn service(server: &MockServer) -> KnowledgeService {
        KnowledgeService::open(&test_config(server)).await.unwrap()
    }

    fn province<'a>(snapshot: &'a EntitySnapshot, key: &str) -> &'a ProvinceAttrs {
        let record = snapshot
            .records
            .iter()
            .find(|r| r.key == key)
            .unwrap_or_else(|| panic!("no record {key}"));
        match &record.attributes {
            EntityAttributes::Province(attrs) => attrs,
            other => panic!("expected province, got {other:?}"),
        }
    }

    fn content(snapshot: &EntitySnapshot) -> Vec<String> {
        snapshot
            .records
            .iter()
            .map(|r| r.content_json().unwrap())
            .collect()
    }

    #[tokio::test]
    async fn stale_read_refreshes_and_merges() {
        let server = MockServer::start().await;
        mount_type(&server, EntityType::Province).await;
        let svc = service(&server).await;

        let snapshot = svc.get_entities(EntityType::Province).await.unwrap();
        assert!(matches!(snapshot.status, SnapshotStatus::Refreshed(_)));
        assert!(snapshot.last_synced_at.is_some());

        let keys: Vec<_> = snapshot.records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "wikidata:Q220451",
                "wikidata:Q238492",
                "wikidata:Q241140",
                "wikidata:Q321729",
            ]
        );

        let pichincha = province(&snapshot, "wikidata:Q220451");
        assert_eq!(pichincha.population, Some(2_800_000));
        assert_eq!(pichincha.cantons.len(), 3);
    }

    #[tokio::test]
    async fn fresh_read_does_not_query_again() {
        let server = MockServer::start().await;
        mount_type_expect(&server, EntityType::Province, 1).await;
        let svc = service(&server).await;

        let first = svc.get_entities(EntityType::Province).await.unwrap();
        let second = svc.get_entities(EntityType::Province).await.unwrap();
        assert!(matches!(second.status, SnapshotStatus::Fresh));
        assert_eq!(content(&first), content(&second));
        assert_eq!(first.last_synced_at, second.last_synced_at);
    }

    #[tokio::test]
    async fn identical_responses_give_identical_records() {
        let server = MockServer::start().await;
        mount_type(&server, EntityType::Province).await;
        let svc = service(&server).await;

        let first = svc.force_refresh(EntityType::Province).await.unwrap();
        let second = svc.force_refresh(EntityType::Province).await.unwrap();
        assert_eq!(content(&first), content(&second));

        let SnapshotStatus::Refreshed(stats) = &second.status else {
            panic!("expected refresh");
        };
        assert_eq!(stats.commit.unchanged, 4);
        assert_eq!(stats.merge.rematched, 4);
        assert!(second.last_synced_at >= first.last_synced_at);
    }

    #[tokio::test]
    async fn concurrent_reads_share_one_pass() {
        let server = MockServer::start().await;
        for source in SourceKind::ALL {
            mount_slow_source(
                &server,
                source,
                EntityType::Province,
                Duration::from_millis(300),
            )
            .await;
        }
        let svc = Arc::new(service(&server).await);

        let mut tasks = tokio::task::JoinSet::new();
        for _ in 0..8 {
            let svc = Arc::clone(&svc);
            tasks.spawn(async move { svc.get_entities(EntityType::Province).await.unwrap() });
        }

        let mut refreshed = 0;
        let mut seen = Vec::new();
        while let Some(snapshot) = tasks.join_next().await {
            let snapshot = snapshot.unwrap();
            match snapshot.status {
                SnapshotStatus::Refreshed(_) => refreshed += 1,
                SnapshotStatus::Fresh => {}
                ref other => panic!("unexpected status {other:?}"),
            }
            seen.push(content(&snapshot));
        }

        assert_eq!(refreshed, 1);
        assert!(seen.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(seen[0].len(), 4);

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 2);
    }

    #[tokio::test]
    async fn one_source_down_is_still_fresh() {
        let server = MockServer::start().await;
        fail_source(&server, SourceKind::Wikidata, 500).await;
        mount_source(&server, SourceKind::Dbpedia, EntityType::Province, None).await;
        let svc = service(&server).await;

        let snapshot = svc.get_entities(EntityType::Province).await.unwrap();
        let SnapshotStatus::Refreshed(stats) = &snapshot.status else {
            panic!("expected partial refresh, got {:?}", snapshot.status);
        };
        assert!(stats.partial());

        let keys: Vec<_> = snapshot.records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "dbpedia:Azuay_Province",
                "dbpedia:Guayas_Province",
                "dbpedia:Pichincha_Province",
            ]
        );
        let pichincha = province(&snapshot, "dbpedia:Pichincha_Province");
        assert_eq!(pichincha.population, Some(2_576_287));

        let status = svc.status().await.unwrap();
        assert_eq!(status[0].state, SyncState::Fresh);
    }

    #[tokio::test]
    async fn partial_pass_carries_fields_forward() {
        let server = MockServer::start().await;
        mount_type(&server, EntityType::Province).await;
        let svc = service(&server).await;
        svc.get_entities(EntityType::Province).await.unwrap();

        server.reset().await;
        mount_source(&server, SourceKind::Wikidata, EntityType::Province, None).await;
        fail_source(&server, SourceKind::Dbpedia, 503).await;

        let snapshot = svc.force_refresh(EntityType::Province).await.unwrap();
        let SnapshotStatus::Refreshed(stats) = &snapshot.status else {
            panic!("expected partial refresh, got {:?}", snapshot.status);
        };
        assert!(stats.merge.fields_carried_forward > 0);

        // Cantons only come from DBpedia.
        let pichincha = province(&snapshot, "wikidata:Q220451");
        assert_eq!(pichincha.cantons.len(), 3);
        assert_eq!(pichincha.population, Some(2_800_000));
    }

    #[tokio::test]
    async fn total_failure_keeps_previous_records() {
        let server = MockServer::start().await;
        mount_type(&server, EntityType::Province).await;
        let svc = service(&server).await;
        let before = svc.get_entities(EntityType::Province).await.unwrap();

        server.reset().await;
        fail_source(&server, SourceKind::Wikidata, 500).await;
        fail_source(&server, SourceKind::Dbpedia, 500).await;

        let after = svc.force_refresh(EntityType::Province).await.unwrap();
        assert!(matches!(after.status, SnapshotStatus::RefreshFailed(_)));
        assert_eq!(content(&before), content(&after));
        assert_eq!(before.last_synced_at, after.last_synced_at);

        // Still inside TTL, so a plain read is served from the store.
        let read = svc.get_entities(EntityType::Province).await.unwrap();
        assert!(matches!(read.status, SnapshotStatus::Fresh));
    }

    #[tokio::test]
    async fn failed_first_sync_cools_down() {
        let server = MockServer::start().await;
        fail_source(&server, SourceKind::Wikidata, 500).await;
        fail_source(&server, SourceKind::Dbpedia, 500).await;
        let svc = service(&server).await;

        let first = svc.get_entities(EntityType::Province).await.unwrap();
        assert!(matches!(first.status, SnapshotStatus::RefreshFailed(_)));
        assert!(first.records.is_empty());
        assert!(first.last_synced_at.is_none());

        let second = svc.get_entities(EntityType::Province).await.unwrap();
        assert!(matches!(second.status, SnapshotStatus::CoolingDown));

        let status = svc.status().await.unwrap();
        assert_eq!(status[0].state, SyncState::SyncingFailed);
        assert!(status[0].in_cooldown);
    }

    #[tokio::test]
    async fn restart_seeds_freshness_from_store() {
        let server = MockServer::start().await;
        mount_type_expect(&server, EntityType::Province, 1).await;
        let config = test_config(&server);

        let svc = KnowledgeService::open(&config).await.unwrap();
        svc.get_entities(EntityType::Province).await.unwrap();
        drop(svc);

        let reopened = KnowledgeService::open(&config).await.unwrap();
        let snapshot = reopened.get_entities(EntityType::Province).await.unwrap();
        assert!(matches!(snapshot.status, SnapshotStatus::Fresh));
        assert_eq!(snapshot.records.len(), 4);
    }

    #[tokio::test]
    async fn refresh_all_links_parks_to_provinces() {
        let server = MockServer::start().await;
        for entity_type in EntityType::ALL {
            mount_type(&server, entity_type).await;
        }
        let svc = service(&server).await;

        let snapshots = svc.refresh_all(false).await.unwrap();
        assert_eq!(snapshots.len(), 4);
        assert!(
            snapshots
                .iter()
                .all(|s| matches!(s.status, SnapshotStatus::Refreshed(_)))
        );

        let parks = &snapshots[1];
        assert_eq!(parks.entity_type, EntityType::NationalPark);
        let galapagos = parks
            .records
            .iter()
            .find(|r| r.key == "wikidata:Q1066997")
            .unwrap();
        let EntityAttributes::NationalPark(attrs) = &galapagos.attributes else {
            panic!("expected park");
        };
        let province = attrs.province.as_ref().unwrap();
        assert_eq!(province.key.as_deref(), Some("wikidata:Q241140"));
    }

    #[tokio::test]
    async fn search_folds_accents_and_rejects_short_queries() {
        let server = MockServer::start().await;
        mount_type(&server, EntityType::Province).await;
        let svc = service(&server).await;
        svc.get_entities(EntityType::Province).await.unwrap();

        let hits = svc.search("galapagos", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "wikidata:Q241140");

        let err = svc.search(" g ", 10).await.unwrap_err();
        assert!(matches!(err, KbSyncError::Validation { .. }));
    }

    #[tokio::test]
    async fn clean_removes_records_outside_region() {
        let server = MockServer::start().await;
        mount_type(&server, EntityType::Province).await;
        let mut config = test_config(&server);
        // Pichincha (-78.5) and Azuay (-79.0) fall east of the box, Guayas
        // (-79.97) stays, Galápagos has no usable centroid and is kept.
        config.region.max_lon = -79.5;
        let svc = KnowledgeService::open(&config).await.unwrap();
        svc.get_entities(EntityType::Province).await.unwrap();

        let reports = svc
            .clean(&CleanOptions {
                types: vec![EntityType::Province],
                not_synced_for: None,
            })
            .await
            .unwrap();
        assert_eq!(
            reports,
            vec![(
                EntityType::Province,
                CleanReport {
                    outside_region: 2,
                    not_synced: 0
                }
            )]
        );

        let remaining = svc.get_entities(EntityType::Province).await.unwrap();
        let keys: Vec<_> = remaining.records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["wikidata:Q238492", "wikidata:Q241140"]);
    }
}
