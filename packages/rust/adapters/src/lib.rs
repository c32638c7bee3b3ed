//! Source adapters: turn raw SPARQL rows into normalized entity DTOs.
//!
//! Each remote knowledge base gets one adapter that knows its query
//! templates, its variable names and its literal encodings. Adapters are
//! pure: no network, no store access.

mod dbpedia;
mod label;
pub mod literal;
mod queries;
mod rows;
mod wikidata;

use std::collections::BTreeMap;

use kbsync_endpoint::Binding;
use kbsync_shared::{EntityDto, EntityType, Field, FieldStats, HeritageCategory, SourceKind};

pub use dbpedia::DbpediaAdapter;
pub use label::pick_label;
pub use wikidata::WikidataAdapter;

// ---------------------------------------------------------------------------
// Normalization output
// ---------------------------------------------------------------------------

/// Bookkeeping from one normalization pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizeReport {
    /// Rows received.
    pub rows_seen: usize,
    /// Rows dropped for a missing identifier or name.
    pub rows_skipped: usize,
    /// Parse attempts and failures per structured field.
    pub field_stats: BTreeMap<Field, FieldStats>,
}

impl NormalizeReport {
    /// Count one parse attempt for `field`.
    pub fn record(&mut self, field: Field, ok: bool) {
        self.field_stats.entry(field).or_default().record(ok);
    }

    pub fn stats(&self, field: Field) -> FieldStats {
        self.field_stats.get(&field).copied().unwrap_or_default()
    }
}

/// DTOs plus the report describing how they were produced.
#[derive(Debug, Clone, Default)]
pub struct Normalized {
    pub dtos: Vec<EntityDto>,
    pub report: NormalizeReport,
}

// ---------------------------------------------------------------------------
// Trait
// ---------------------------------------------------------------------------

/// One remote knowledge base.
///
/// Adapters are held in priority order by [`AdapterRegistry`].
pub trait SourceAdapter: Send + Sync {
    /// Which source this adapter speaks for.
    fn source(&self) -> SourceKind;

    /// Query template for `entity_type`, or `None` when this source does not
    /// describe that type.
    fn query_for(&self, entity_type: EntityType) -> Option<&'static str>;

    /// Map raw result rows onto DTOs. Malformed rows or fields degrade to
    /// nulls and are counted in the report; this never fails.
    fn normalize(&self, entity_type: EntityType, rows: &[Binding]) -> Normalized;
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Holds registered adapters in priority order.
pub struct AdapterRegistry {
    adapters: Vec<Box<dyn SourceAdapter>>,
}

impl AdapterRegistry {
    /// Registry with the built-in adapters (Wikidata first, DBpedia second).
    pub fn new() -> Self {
        let mut registry = Self {
            adapters: Vec::new(),
        };
        registry.register(Box::new(DbpediaAdapter));
        registry.register(Box::new(WikidataAdapter));
        registry
    }

    /// Add an adapter, keeping the registry ordered by source priority.
    /// An adapter for an already-registered source replaces it.
    pub fn register(&mut self, adapter: Box<dyn SourceAdapter>) {
        self.adapters.retain(|a| a.source() != adapter.source());
        self.adapters.push(adapter);
        self.adapters.sort_by_key(|a| a.source().priority());
    }

    /// Adapter for `source`, if registered.
    pub fn get(&self, source: SourceKind) -> Option<&dyn SourceAdapter> {
        self.iter().find(|a| a.source() == source)
    }

    /// Adapters that have a query for `entity_type`, in priority order.
    pub fn relevant(&self, entity_type: EntityType) -> Vec<&dyn SourceAdapter> {
        self.iter()
            .filter(|a| a.query_for(entity_type).is_some())
            .collect()
    }

    /// All adapters, in priority order.
    pub fn iter(&self) -> impl Iterator<Item = &dyn SourceAdapter> {
        self.adapters.iter().map(|a| a.as_ref())
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Heritage classification
// ---------------------------------------------------------------------------

/// Map a category marker bound by a query branch.
pub(crate) fn category_from_marker(marker: &str) -> Option<HeritageCategory> {
    match marker.trim() {
        "unesco" => Some(HeritageCategory::Unesco),
        "archaeological" => Some(HeritageCategory::Archaeological),
        "historical" => Some(HeritageCategory::Historical),
        _ => None,
    }
}

/// Classify a free-text type label by keyword.
pub fn classify_heritage(type_label: &str) -> Option<HeritageCategory> {
    let folded = kbsync_shared::text::fold(type_label);
    if folded.contains("unesco")
        || folded.contains("patrimonio mundial")
        || folded.contains("world heritage")
    {
        Some(HeritageCategory::Unesco)
    } else if folded.contains("arqueol") || folded.contains("archaeolog") {
        Some(HeritageCategory::Archaeological)
    } else if folded.contains("historic")
        || folded.contains("monument")
        || folded.contains("centro")
    {
        Some(HeritageCategory::Historical)
    } else {
        None
    }
}

/// Strongest category: UNESCO over archaeological over historical.
pub(crate) fn strongest(
    categories: impl IntoIterator<Item = HeritageCategory>,
) -> Option<HeritageCategory> {
    let weight = |c: &HeritageCategory| match c {
        HeritageCategory::Unesco => 0,
        HeritageCategory::Archaeological => 1,
        HeritageCategory::Historical => 2,
    };
    categories.into_iter().min_by_key(weight)
}
