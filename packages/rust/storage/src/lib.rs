//! libSQL storage layer (local mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding canonical records,
//! per-type sync state, sync run history, field parse statistics and a
//! full-text index over entity names.
//!
//! **Consistency rules:**
//! - A sync batch for one entity type is written in a single transaction
//!   ([`Storage::commit_batch`]); readers never observe half of it.
//! - `last_synced_at` values only move forward (`MAX(old, new)` in SQL).
//!   Timestamps are stored as RFC 3339 with fixed microsecond precision so
//!   string comparison is chronological.

mod migrations;

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use kbsync_shared::{
    CanonicalRecord, EntityType, Field, FieldStats, KbSyncError, RegionConfig, Result,
    SourceKind,
};
use libsql::{Connection, Database, params};
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    /// Owns the database that `conn` was opened from; never read.
    _db: Database,
    conn: Connection,
    readonly: bool,
    /// Held for writing while a transaction is open on `conn`, so readers
    /// sharing the connection wait for it to finish.
    gate: RwLock<()>,
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Everything one successful sync pass writes for an entity type.
#[derive(Debug, Clone)]
pub struct CommitBatch<'a> {
    pub entity_type: EntityType,
    pub records: &'a [CanonicalRecord],
    /// Recorded as the type's last successful sync (never moved backwards).
    pub synced_at: DateTime<Utc>,
    /// Parse statistics from this pass, added to the cumulative totals.
    pub field_stats: &'a [(SourceKind, Field, FieldStats)],
}

/// What a commit did to the entity table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CommitReport {
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
}

/// Rows removed by a cleanup pass for one entity type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct CleanReport {
    pub outside_region: u64,
    pub not_synced: u64,
}

/// A search result from FTS5.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub entity_type: EntityType,
    pub key: String,
    pub name: String,
    /// FTS5 rank score (lower is better).
    pub score: f64,
}

/// One row of sync history.
#[derive(Debug, Clone)]
pub struct SyncRun {
    pub id: String,
    pub entity_type: EntityType,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub outcome: Option<String>,
    pub stats_json: Option<String>,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn storage_err(e: libsql::Error) -> KbSyncError {
    KbSyncError::Storage(e.to_string())
}

fn commit_err(e: libsql::Error) -> KbSyncError {
    KbSyncError::Commit(e.to_string())
}

/// Fixed-width RFC 3339 (`2026-01-02T03:04:05.000006Z`).
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn parse_timestamp(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| KbSyncError::Storage(format!("invalid timestamp '{s}': {e}")))
}

/// SHA-256 of a record's content JSON.
fn content_hash(json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(json.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Turn free text into an FTS5 prefix query: every word quoted and
/// prefix-matched, all words required.
fn fts_query(query: &str) -> Option<String> {
    let terms: Vec<String> = query
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{t}\"*"))
        .collect();
    (!terms.is_empty()).then(|| terms.join(" "))
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| KbSyncError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let storage = Self {
            _db: db,
            conn,
            readonly: false,
            gate: RwLock::new(()),
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        Ok(Self {
            _db: db,
            conn,
            readonly: true,
            gate: RwLock::new(()),
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    KbSyncError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(KbSyncError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Entity operations
    // -----------------------------------------------------------------------

    /// Write a sync batch atomically: upsert every record, advance the type's
    /// sync timestamp and add the parse statistics. On any failure nothing
    /// is written and a [`KbSyncError::Commit`] is returned.
    #[instrument(skip_all, fields(entity_type = %batch.entity_type, records = batch.records.len()))]
    pub async fn commit_batch(&self, batch: &CommitBatch<'_>) -> Result<CommitReport> {
        self.check_writable()?;
        let _gate = self.gate.write().await;

        let tx = self.conn.transaction().await.map_err(commit_err)?;
        match write_batch(&tx, batch).await {
            Ok(report) => {
                tx.commit().await.map_err(commit_err)?;
                info!(
                    inserted = report.inserted,
                    updated = report.updated,
                    unchanged = report.unchanged,
                    "batch committed"
                );
                Ok(report)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    /// All records of one type, ordered by key.
    pub async fn list_entities(&self, entity_type: EntityType) -> Result<Vec<CanonicalRecord>> {
        let _gate = self.gate.read().await;
        let mut rows = self
            .conn
            .query(
                "SELECT key, record_json, last_synced_at FROM entities
                 WHERE entity_type = ?1 ORDER BY key",
                params![entity_type.as_str()],
            )
            .await
            .map_err(storage_err)?;

        let mut records = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let key: String = row.get(0).map_err(storage_err)?;
            let json: String = row.get(1).map_err(storage_err)?;
            let synced: String = row.get(2).map_err(storage_err)?;
            let record = CanonicalRecord::from_content_json(&json, parse_timestamp(&synced)?)
                .map_err(|e| KbSyncError::Storage(format!("corrupt record {key}: {e}")))?;
            records.push(record);
        }
        Ok(records)
    }

    pub async fn count_entities(&self, entity_type: EntityType) -> Result<u64> {
        let _gate = self.gate.read().await;
        let mut rows = self
            .conn
            .query(
                "SELECT COUNT(*) FROM entities WHERE entity_type = ?1",
                params![entity_type.as_str()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => Ok(row.get::<i64>(0).map_err(storage_err)?.max(0) as u64),
            None => Ok(0),
        }
    }

    // -----------------------------------------------------------------------
    // Sync state and statistics
    // -----------------------------------------------------------------------

    /// Last successful sync per entity type.
    pub async fn load_sync_state(&self) -> Result<BTreeMap<EntityType, DateTime<Utc>>> {
        let _gate = self.gate.read().await;
        let mut rows = self
            .conn
            .query("SELECT entity_type, last_synced_at FROM sync_state", params![])
            .await
            .map_err(storage_err)?;

        let mut state = BTreeMap::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let name: String = row.get(0).map_err(storage_err)?;
            let ts: String = row.get(1).map_err(storage_err)?;
            match name.parse::<EntityType>() {
                Ok(entity_type) => {
                    state.insert(entity_type, parse_timestamp(&ts)?);
                }
                Err(_) => warn!(%name, "ignoring sync state for unknown entity type"),
            }
        }
        Ok(state)
    }

    /// Cumulative parse statistics for one entity type.
    pub async fn load_field_stats(
        &self,
        entity_type: EntityType,
    ) -> Result<Vec<(SourceKind, Field, FieldStats)>> {
        let _gate = self.gate.read().await;
        let mut rows = self
            .conn
            .query(
                "SELECT source, field, attempts, failures FROM field_stats
                 WHERE entity_type = ?1 ORDER BY source, field",
                params![entity_type.as_str()],
            )
            .await
            .map_err(storage_err)?;

        let mut stats = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let source: String = row.get(0).map_err(storage_err)?;
            let field: String = row.get(1).map_err(storage_err)?;
            let attempts: i64 = row.get(2).map_err(storage_err)?;
            let failures: i64 = row.get(3).map_err(storage_err)?;

            let (Ok(source), Ok(field)) = (source.parse::<SourceKind>(), field.parse::<Field>())
            else {
                debug!(%source, %field, "skipping unknown field stats row");
                continue;
            };
            stats.push((
                source,
                field,
                FieldStats {
                    attempts: attempts.max(0) as u64,
                    failures: failures.max(0) as u64,
                },
            ));
        }
        Ok(stats)
    }

    // -----------------------------------------------------------------------
    // Sync run history
    // -----------------------------------------------------------------------

    /// Insert a new sync run. Returns the generated run ID.
    pub async fn insert_sync_run(&self, entity_type: EntityType) -> Result<String> {
        self.check_writable()?;
        let _gate = self.gate.read().await;
        let id = Uuid::now_v7().to_string();
        let now = format_timestamp(&Utc::now());
        self.conn
            .execute(
                "INSERT INTO sync_runs (id, entity_type, started_at) VALUES (?1, ?2, ?3)",
                params![id.as_str(), entity_type.as_str(), now.as_str()],
            )
            .await
            .map_err(storage_err)?;
        Ok(id)
    }

    /// Close a sync run with its outcome and stats.
    pub async fn finish_sync_run(
        &self,
        run_id: &str,
        outcome: &str,
        stats_json: &str,
    ) -> Result<()> {
        self.check_writable()?;
        let _gate = self.gate.read().await;
        let now = format_timestamp(&Utc::now());
        self.conn
            .execute(
                "UPDATE sync_runs SET finished_at = ?1, outcome = ?2, stats_json = ?3 WHERE id = ?4",
                params![now.as_str(), outcome, stats_json, run_id],
            )
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    /// Most recent sync runs, newest first.
    pub async fn recent_sync_runs(&self, limit: u32) -> Result<Vec<SyncRun>> {
        let _gate = self.gate.read().await;
        let mut rows = self
            .conn
            .query(
                "SELECT id, entity_type, started_at, finished_at, outcome, stats_json
                 FROM sync_runs ORDER BY id DESC LIMIT ?1",
                params![limit],
            )
            .await
            .map_err(storage_err)?;

        let mut runs = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            let entity_type: String = row.get(1).map_err(storage_err)?;
            let started_at: String = row.get(2).map_err(storage_err)?;
            let finished_at = match row.get::<String>(3).ok() {
                Some(s) => Some(parse_timestamp(&s)?),
                None => None,
            };
            runs.push(SyncRun {
                id: row.get(0).map_err(storage_err)?,
                entity_type: entity_type.parse()?,
                started_at: parse_timestamp(&started_at)?,
                finished_at,
                outcome: row.get::<String>(4).ok(),
                stats_json: row.get::<String>(5).ok(),
            });
        }
        Ok(runs)
    }

    // -----------------------------------------------------------------------
    // Cleanup
    // -----------------------------------------------------------------------

    /// Remove records of one type whose centroid lies outside `region`
    /// (records without a centroid are kept) and, when `not_synced_since` is
    /// given, records last synced before it. One transaction.
    #[instrument(skip_all, fields(%entity_type))]
    pub async fn clean_entities(
        &self,
        entity_type: EntityType,
        region: &RegionConfig,
        not_synced_since: Option<DateTime<Utc>>,
    ) -> Result<CleanReport> {
        self.check_writable()?;
        let _gate = self.gate.write().await;

        let tx = self.conn.transaction().await.map_err(commit_err)?;
        let result = async {
            let outside_region = tx
                .execute(
                    "DELETE FROM entities
                     WHERE entity_type = ?1 AND lat IS NOT NULL AND lon IS NOT NULL
                       AND (lat < ?2 OR lat > ?3 OR lon < ?4 OR lon > ?5)",
                    params![
                        entity_type.as_str(),
                        region.min_lat,
                        region.max_lat,
                        region.min_lon,
                        region.max_lon
                    ],
                )
                .await
                .map_err(commit_err)?;

            let not_synced = match not_synced_since {
                Some(cutoff) => tx
                    .execute(
                        "DELETE FROM entities WHERE entity_type = ?1 AND last_synced_at < ?2",
                        params![entity_type.as_str(), format_timestamp(&cutoff)],
                    )
                    .await
                    .map_err(commit_err)?,
                None => 0,
            };

            Ok::<_, KbSyncError>(CleanReport {
                outside_region,
                not_synced,
            })
        }
        .await;

        match result {
            Ok(report) => {
                tx.commit().await.map_err(commit_err)?;
                info!(
                    outside_region = report.outside_region,
                    not_synced = report.not_synced,
                    "cleanup committed"
                );
                Ok(report)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // FTS search
    // -----------------------------------------------------------------------

    /// Prefix search over entity names of one type. Accents and case are
    /// ignored.
    pub async fn search(
        &self,
        entity_type: EntityType,
        query: &str,
        limit: u32,
    ) -> Result<Vec<SearchHit>> {
        let Some(fts) = fts_query(query) else {
            return Ok(Vec::new());
        };

        let _gate = self.gate.read().await;
        let mut rows = self
            .conn
            .query(
                "SELECT e.key, e.name, rank
                 FROM entities_fts fts
                 JOIN entities e ON e.rowid = fts.rowid
                 WHERE entities_fts MATCH ?1 AND e.entity_type = ?2
                 ORDER BY rank, e.key
                 LIMIT ?3",
                params![fts, entity_type.as_str(), limit],
            )
            .await
            .map_err(storage_err)?;

        let mut hits = Vec::new();
        while let Some(row) = rows.next().await.map_err(storage_err)? {
            hits.push(SearchHit {
                entity_type,
                key: row.get(0).map_err(storage_err)?,
                name: row.get(1).map_err(storage_err)?,
                score: row.get(2).unwrap_or(0.0),
            });
        }
        Ok(hits)
    }
}

/// Body of [`Storage::commit_batch`], run inside the open transaction.
async fn write_batch(conn: &Connection, batch: &CommitBatch<'_>) -> Result<CommitReport> {
    let entity_type = batch.entity_type.as_str();

    let mut known: HashMap<String, String> = HashMap::new();
    let mut rows = conn
        .query(
            "SELECT key, content_hash FROM entities WHERE entity_type = ?1",
            params![entity_type],
        )
        .await
        .map_err(commit_err)?;
    while let Some(row) = rows.next().await.map_err(commit_err)? {
        known.insert(
            row.get(0).map_err(commit_err)?,
            row.get(1).map_err(commit_err)?,
        );
    }

    let mut report = CommitReport::default();
    for record in batch.records {
        if record.entity_type != batch.entity_type {
            return Err(KbSyncError::Commit(format!(
                "record {} is a {} in a {} batch",
                record.key, record.entity_type, batch.entity_type
            )));
        }
        if record.name.trim().is_empty() {
            return Err(KbSyncError::Commit(format!("record {} has no name", record.key)));
        }

        let json = record
            .content_json()
            .map_err(|e| KbSyncError::Commit(format!("serialize {}: {e}", record.key)))?;
        let hash = content_hash(&json);
        let synced = format_timestamp(&record.last_synced_at);

        if known.get(&record.key) == Some(&hash) {
            conn.execute(
                "UPDATE entities SET last_synced_at = MAX(last_synced_at, ?3)
                 WHERE entity_type = ?1 AND key = ?2",
                params![entity_type, record.key.as_str(), synced.as_str()],
            )
            .await
            .map_err(commit_err)?;
            report.unchanged += 1;
            continue;
        }

        let centroid = record.attributes.centroid();
        conn.execute(
            "INSERT INTO entities (entity_type, key, name, record_json, content_hash, lat, lon, last_synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(entity_type, key) DO UPDATE SET
               name = excluded.name,
               record_json = excluded.record_json,
               content_hash = excluded.content_hash,
               lat = excluded.lat,
               lon = excluded.lon,
               last_synced_at = MAX(entities.last_synced_at, excluded.last_synced_at)",
            params![
                entity_type,
                record.key.as_str(),
                record.name.as_str(),
                json.as_str(),
                hash.as_str(),
                centroid.map(|c| c.lat),
                centroid.map(|c| c.lon),
                synced.as_str(),
            ],
        )
        .await
        .map_err(commit_err)?;

        if known.contains_key(&record.key) {
            report.updated += 1;
        } else {
            report.inserted += 1;
        }
    }

    conn.execute(
        "INSERT INTO sync_state (entity_type, last_synced_at) VALUES (?1, ?2)
         ON CONFLICT(entity_type) DO UPDATE SET
           last_synced_at = MAX(sync_state.last_synced_at, excluded.last_synced_at)",
        params![entity_type, format_timestamp(&batch.synced_at)],
    )
    .await
    .map_err(commit_err)?;

    for (source, field, stats) in batch.field_stats {
        conn.execute(
            "INSERT INTO field_stats (source, entity_type, field, attempts, failures)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(source, entity_type, field) DO UPDATE SET
               attempts = field_stats.attempts + excluded.attempts,
               failures = field_stats.failures + excluded.failures",
            params![
                source.as_str(),
                entity_type,
                field.as_str(),
                stats.attempts as i64,
                stats.failures as i64,
            ],
        )
        .await
        .map_err(commit_err)?;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, SubsecRound};
    use kbsync_shared::{Centroid, EntityAttributes, PlazaAttrs, ProvinceAttrs};

    /// Storage keeps microseconds.
    fn now() -> DateTime<Utc> {
        Utc::now().trunc_subsecs(6)
    }

    async fn test_storage() -> Storage {
        let tmp = std::env::temp_dir().join(format!("kbsync_test_{}.db", Uuid::now_v7()));
        Storage::open(&tmp).await.expect("open test db")
    }

    fn plaza(
        key: &str,
        name: &str,
        centroid: Option<Centroid>,
        at: DateTime<Utc>,
    ) -> CanonicalRecord {
        let qid = key.trim_start_matches("wikidata:");
        CanonicalRecord {
            entity_type: EntityType::Plaza,
            key: key.into(),
            name: name.into(),
            source_ids: BTreeMap::from([(SourceKind::Wikidata, qid.to_string())]),
            attributes: EntityAttributes::Plaza(PlazaAttrs {
                city: Some("Quito".into()),
                centroid,
                image_url: None,
            }),
            last_synced_at: at,
        }
    }

    fn batch<'a>(records: &'a [CanonicalRecord], at: DateTime<Utc>) -> CommitBatch<'a> {
        CommitBatch {
            entity_type: EntityType::Plaza,
            records,
            synced_at: at,
            field_stats: &[],
        }
    }

    #[tokio::test]
    async fn open_and_migrate() {
        let storage = test_storage().await;
        assert_eq!(storage.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn idempotent_migration() {
        let tmp = std::env::temp_dir().join(format!("kbsync_test_{}.db", Uuid::now_v7()));
        let first = Storage::open(&tmp).await.expect("first open");
        drop(first);
        let second = Storage::open(&tmp).await.expect("second open");
        assert_eq!(second.get_schema_version().await, 1);
    }

    #[tokio::test]
    async fn commit_and_list() {
        let storage = test_storage().await;
        let now = now();
        let records = vec![
            plaza("wikidata:Q2", "Plaza de San Francisco", Centroid::new(-0.22, -78.52), now),
            plaza("wikidata:Q1", "Plaza Grande", Centroid::new(-0.22, -78.51), now),
        ];

        let report = storage.commit_batch(&batch(&records, now)).await.expect("commit");
        assert_eq!(report.inserted, 2);

        let listed = storage.list_entities(EntityType::Plaza).await.expect("list");
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].key, "wikidata:Q1");
        assert_eq!(listed[0], records[1].clone());
        assert_eq!(storage.count_entities(EntityType::Plaza).await.unwrap(), 2);
        assert!(storage.list_entities(EntityType::Province).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recommit_detects_unchanged_and_updated() {
        let storage = test_storage().await;
        let t0 = now();
        let records = vec![plaza("wikidata:Q1", "Plaza Grande", None, t0)];
        storage.commit_batch(&batch(&records, t0)).await.unwrap();

        let t1 = t0 + Duration::seconds(10);
        let again = vec![plaza("wikidata:Q1", "Plaza Grande", None, t1)];
        let report = storage.commit_batch(&batch(&again, t1)).await.unwrap();
        assert_eq!(report.unchanged, 1);

        let renamed = vec![plaza("wikidata:Q1", "Plaza de la Independencia", None, t1)];
        let report = storage.commit_batch(&batch(&renamed, t1)).await.unwrap();
        assert_eq!(report.updated, 1);

        let listed = storage.list_entities(EntityType::Plaza).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Plaza de la Independencia");
        assert_eq!(listed[0].last_synced_at, t1);
    }

    #[tokio::test]
    async fn timestamps_never_move_backwards() {
        let storage = test_storage().await;
        let later = now();
        let earlier = later - Duration::hours(1);

        let records = vec![plaza("wikidata:Q1", "Plaza Grande", None, later)];
        storage.commit_batch(&batch(&records, later)).await.unwrap();
        let stale = vec![plaza("wikidata:Q1", "Plaza Grande Vieja", None, earlier)];
        storage.commit_batch(&batch(&stale, earlier)).await.unwrap();

        let listed = storage.list_entities(EntityType::Plaza).await.unwrap();
        assert_eq!(listed[0].last_synced_at, later);
        let state = storage.load_sync_state().await.unwrap();
        assert_eq!(state.get(&EntityType::Plaza), Some(&later));
    }

    #[tokio::test]
    async fn failed_batch_leaves_store_untouched() {
        let storage = test_storage().await;
        let now = now();
        let good = vec![plaza("wikidata:Q1", "Plaza Grande", None, now)];
        storage.commit_batch(&batch(&good, now)).await.unwrap();

        let mut bad = vec![
            plaza("wikidata:Q1", "Renamed", None, now),
            plaza("wikidata:Q2", "Plaza Nueva", None, now),
        ];
        bad[1].entity_type = EntityType::Province;
        bad[1].attributes = EntityAttributes::Province(ProvinceAttrs::default());

        let later = now + Duration::seconds(5);
        let err = storage.commit_batch(&batch(&bad, later)).await.unwrap_err();
        assert!(matches!(err, KbSyncError::Commit(_)));

        let listed = storage.list_entities(EntityType::Plaza).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].name, "Plaza Grande");
        let state = storage.load_sync_state().await.unwrap();
        assert_eq!(state.get(&EntityType::Plaza), Some(&now));
    }

    #[tokio::test]
    async fn field_stats_accumulate() {
        let storage = test_storage().await;
        let now = now();
        let stats = [(
            SourceKind::Dbpedia,
            Field::Centroid,
            FieldStats {
                attempts: 4,
                failures: 1,
            },
        )];
        for _ in 0..2 {
            storage
                .commit_batch(&CommitBatch {
                    entity_type: EntityType::Plaza,
                    records: &[],
                    synced_at: now,
                    field_stats: &stats,
                })
                .await
                .unwrap();
        }

        let loaded = storage.load_field_stats(EntityType::Plaza).await.unwrap();
        assert_eq!(
            loaded,
            vec![(
                SourceKind::Dbpedia,
                Field::Centroid,
                FieldStats {
                    attempts: 8,
                    failures: 2
                }
            )]
        );
        assert!(storage.load_field_stats(EntityType::Province).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sync_run_lifecycle() {
        let storage = test_storage().await;
        let run_id = storage.insert_sync_run(EntityType::Province).await.expect("insert run");
        assert!(!run_id.is_empty());

        storage
            .finish_sync_run(&run_id, "fresh", r#"{"records": 24}"#)
            .await
            .expect("finish run");

        let runs = storage.recent_sync_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].entity_type, EntityType::Province);
        assert_eq!(runs[0].outcome.as_deref(), Some("fresh"));
        assert!(runs[0].finished_at.is_some());
    }

    #[tokio::test]
    async fn fts_search_ignores_accents() {
        let storage = test_storage().await;
        let now = now();
        let records = vec![
            plaza("wikidata:Q1", "Plaza Grande", None, now),
            plaza("wikidata:Q2", "Plaza de San Francisco", None, now),
            plaza("wikidata:Q3", "Plaza de la Independencia", None, now),
            plaza("wikidata:Q4", "Parque El Ejido", None, now),
            plaza("wikidata:Q5", "Plazoleta Bolívar", None, now),
        ];
        storage.commit_batch(&batch(&records, now)).await.unwrap();

        let hits = storage.search(EntityType::Plaza, "francisco", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].key, "wikidata:Q2");

        let hits = storage.search(EntityType::Plaza, "bolivar", 10).await.unwrap();
        assert_eq!(hits.len(), 1);

        let hits = storage.search(EntityType::Plaza, "pla", 2).await.unwrap();
        assert_eq!(hits.len(), 2);

        assert!(storage.search(EntityType::Plaza, "\"*()", 10).await.unwrap().is_empty());
        assert!(storage.search(EntityType::Province, "plaza", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn clean_removes_out_of_region_and_old_records() {
        let storage = test_storage().await;
        let now = now();
        let old = now - Duration::days(30);
        let records = vec![
            plaza("wikidata:Q1", "Plaza Grande", Centroid::new(-0.22, -78.51), now),
            plaza("wikidata:Q2", "Plaza Mayor", Centroid::new(40.41, -3.70), now),
            plaza("wikidata:Q3", "Plaza sin coordenadas", None, now),
            plaza("wikidata:Q4", "Plaza Antigua", None, old),
        ];
        storage.commit_batch(&batch(&records, now)).await.unwrap();

        let region = RegionConfig::default();
        let report = storage
            .clean_entities(EntityType::Plaza, &region, None)
            .await
            .unwrap();
        assert_eq!(report.outside_region, 1);
        assert_eq!(report.not_synced, 0);

        let report = storage
            .clean_entities(EntityType::Plaza, &region, Some(now - Duration::days(7)))
            .await
            .unwrap();
        assert_eq!(report.not_synced, 1);

        let keys: Vec<String> = storage
            .list_entities(EntityType::Plaza)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.key)
            .collect();
        assert_eq!(keys, vec!["wikidata:Q1", "wikidata:Q3"]);

        // Deleted rows leave the search index too.
        assert!(storage.search(EntityType::Plaza, "mayor", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn readonly_rejects_writes() {
        let tmp = std::env::temp_dir().join(format!("kbsync_test_{}.db", Uuid::now_v7()));
        let rw = Storage::open(&tmp).await.unwrap();
        let now = now();
        let records = vec![plaza("wikidata:Q1", "Plaza Grande", None, now)];
        rw.commit_batch(&batch(&records, now)).await.unwrap();
        drop(rw);

        let ro = Storage::open_readonly(&tmp).await.unwrap();
        assert_eq!(ro.list_entities(EntityType::Plaza).await.unwrap().len(), 1);
        let result = ro.commit_batch(&batch(&records, now)).await;
        assert!(result.unwrap_err().to_string().contains("read-only"));
    }

    #[test]
    fn timestamps_have_fixed_width() {
        let a = DateTime::parse_from_rfc3339("2026-01-02T03:04:05Z")
            .unwrap()
            .with_timezone(&Utc);
        let b = a + Duration::microseconds(1);
        let (fa, fb) = (format_timestamp(&a), format_timestamp(&b));
        assert_eq!(fa, "2026-01-02T03:04:05.000000Z");
        assert_eq!(fa.len(), fb.len());
        assert!(fa < fb);
        assert_eq!(parse_timestamp(&fb).unwrap(), b);
    }

    #[test]
    fn fts_query_quotes_terms() {
        assert_eq!(fts_query("Plaza Grande").as_deref(), Some("\"Plaza\"* \"Grande\"*"));
        assert_eq!(fts_query("san-francisco").as_deref(), Some("\"san\"* \"francisco\"*"));
        assert_eq!(fts_query("  ** "), None);
    }
}
