//! Sync core for kbsync.
//!
//! Ties the endpoint client, source adapters, reconciler and store into the
//! read-through [`KnowledgeService`]: callers ask for an entity type and get
//! the stored records, refreshed from Wikidata and DBpedia when stale.

pub mod freshness;
pub mod orchestrator;
pub mod service;

pub use freshness::{FreshnessTracker, RefreshGuard, SyncState};
pub use orchestrator::{
    RefreshOutcome, SilentProgress, SourceReport, SyncOrchestrator, SyncProgress, SyncStats,
};
pub use service::{
    CleanOptions, EntitySnapshot, KnowledgeService, MIN_SEARCH_CHARS, SnapshotStatus, TypeStatus,
};
