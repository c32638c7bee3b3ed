//! Core domain types: entity types, sources, DTOs and canonical records.

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::error::KbSyncError;
use crate::text::fold;

/// Current schema version for the nested canton payload.
pub const CANTON_SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// EntityType
// ---------------------------------------------------------------------------

/// The kinds of entity the sync layer maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Province,
    NationalPark,
    HeritageSite,
    Plaza,
}

impl EntityType {
    /// Every entity type, in sync order (provinces first so parks can link to them).
    pub const ALL: [EntityType; 4] = [
        EntityType::Province,
        EntityType::NationalPark,
        EntityType::HeritageSite,
        EntityType::Plaza,
    ];

    /// Stable storage/CLI name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Province => "province",
            Self::NationalPark => "national_park",
            Self::HeritageSite => "heritage_site",
            Self::Plaza => "plaza",
        }
    }
}

impl std::fmt::Display for EntityType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for EntityType {
    type Err = KbSyncError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "province" | "provinces" => Ok(Self::Province),
            "national_park" | "national_parks" | "park" | "parks" => Ok(Self::NationalPark),
            "heritage_site" | "heritage_sites" | "site" | "sites" => Ok(Self::HeritageSite),
            "plaza" | "plazas" => Ok(Self::Plaza),
            other => Err(KbSyncError::validation(format!(
                "unknown entity type '{other}': expected province, national_park, heritage_site or plaza"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// SourceKind
// ---------------------------------------------------------------------------

/// A remote knowledge base. Declaration order is the fixed precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Wikidata,
    Dbpedia,
}

impl SourceKind {
    pub const ALL: [SourceKind; 2] = [SourceKind::Wikidata, SourceKind::Dbpedia];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wikidata => "wikidata",
            Self::Dbpedia => "dbpedia",
        }
    }

    /// Fixed priority; lower wins when reliability cannot decide.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Wikidata => 0,
            Self::Dbpedia => 1,
        }
    }

    /// Qualify an external identifier with this source, e.g. `wikidata:Q220451`.
    pub fn qualify(&self, external_id: &str) -> String {
        format!("{}:{external_id}", self.as_str())
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = KbSyncError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "wikidata" => Ok(Self::Wikidata),
            "dbpedia" => Ok(Self::Dbpedia),
            other => Err(KbSyncError::validation(format!("unknown source '{other}'"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Centroid
// ---------------------------------------------------------------------------

/// A validated (latitude, longitude) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Centroid {
    pub lat: f64,
    pub lon: f64,
}

impl Centroid {
    /// Build a centroid, rejecting non-finite or out-of-range coordinates.
    pub fn new(lat: f64, lon: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lon.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lon);
        valid.then_some(Self { lat, lon })
    }
}

// ---------------------------------------------------------------------------
// Cantons
// ---------------------------------------------------------------------------

/// A canton (second-level subdivision) nested inside a province.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Canton {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seat_town: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centroid: Option<Centroid>,
}

impl Canton {
    /// Dedup key: folded (name, seat town).
    pub fn dedup_key(&self) -> (String, String) {
        (
            fold(&self.name),
            self.seat_town.as_deref().map(fold).unwrap_or_default(),
        )
    }

    /// Fill fields that are missing here from `other`.
    fn absorb(&mut self, other: &Canton) {
        if self.description.is_none() {
            self.description.clone_from(&other.description);
        }
        if self.seat_town.is_none() {
            self.seat_town.clone_from(&other.seat_town);
        }
        if self.population.is_none() {
            self.population = other.population;
        }
        if self.url.is_none() {
            self.url.clone_from(&other.url);
        }
        if self.centroid.is_none() {
            self.centroid = other.centroid;
        }
    }
}

/// Versioned, order-irrelevant set of cantons.
///
/// Items stay sorted by [`Canton::dedup_key`] so serialization is stable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CantonSet {
    pub schema_version: u32,
    #[serde(default)]
    pub items: Vec<Canton>,
}

impl Default for CantonSet {
    fn default() -> Self {
        Self {
            schema_version: CANTON_SCHEMA_VERSION,
            items: Vec::new(),
        }
    }
}

impl CantonSet {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Insert a canton; a duplicate (same name and seat town) only fills gaps
    /// in the entry already present.
    pub fn insert(&mut self, canton: Canton) {
        let key = canton.dedup_key();
        match self.items.iter_mut().find(|c| c.dedup_key() == key) {
            Some(existing) => existing.absorb(&canton),
            None => {
                self.items.push(canton);
                self.items.sort_by_key(Canton::dedup_key);
            }
        }
    }

    /// Union another set into this one.
    pub fn union(&mut self, other: &CantonSet) {
        for canton in &other.items {
            self.insert(canton.clone());
        }
    }
}

// ---------------------------------------------------------------------------
// Entity attributes
// ---------------------------------------------------------------------------

/// Province attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvinceAttrs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capital: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub population: Option<u64>,
    /// Area in km².
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_km2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centroid: Option<Centroid>,
    #[serde(default)]
    pub cantons: CantonSet,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flag_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub wikipedia_url: Option<String>,
}

/// Weak reference from a park to its owning province.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvinceRef {
    /// Province name as reported by the source.
    pub name: String,
    /// Canonical province key, once resolved against stored provinces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}

/// National park attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParkAttrs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Area in km².
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area_km2: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub established: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub province: Option<ProvinceRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centroid: Option<Centroid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub website_url: Option<String>,
}

/// Heritage classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeritageCategory {
    Unesco,
    Archaeological,
    Historical,
}

impl HeritageCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unesco => "unesco",
            Self::Archaeological => "archaeological",
            Self::Historical => "historical",
        }
    }
}

/// Heritage site attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeritageAttrs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<HeritageCategory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centroid: Option<Centroid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Plaza attributes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlazaAttrs {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub centroid: Option<Centroid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

/// Typed attributes, one variant per [`EntityType`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntityAttributes {
    Province(ProvinceAttrs),
    NationalPark(ParkAttrs),
    HeritageSite(HeritageAttrs),
    Plaza(PlazaAttrs),
}

impl EntityAttributes {
    /// Empty attributes for the given type.
    pub fn empty(entity_type: EntityType) -> Self {
        match entity_type {
            EntityType::Province => Self::Province(ProvinceAttrs::default()),
            EntityType::NationalPark => Self::NationalPark(ParkAttrs::default()),
            EntityType::HeritageSite => Self::HeritageSite(HeritageAttrs::default()),
            EntityType::Plaza => Self::Plaza(PlazaAttrs::default()),
        }
    }

    pub fn entity_type(&self) -> EntityType {
        match self {
            Self::Province(_) => EntityType::Province,
            Self::NationalPark(_) => EntityType::NationalPark,
            Self::HeritageSite(_) => EntityType::HeritageSite,
            Self::Plaza(_) => EntityType::Plaza,
        }
    }

    pub fn centroid(&self) -> Option<Centroid> {
        match self {
            Self::Province(a) => a.centroid,
            Self::NationalPark(a) => a.centroid,
            Self::HeritageSite(a) => a.centroid,
            Self::Plaza(a) => a.centroid,
        }
    }

    /// The disambiguating qualifier used when joining by name: the owning
    /// province of a park, the city of a plaza.
    pub fn join_qualifier(&self) -> Option<&str> {
        match self {
            Self::NationalPark(a) => a.province.as_ref().map(|p| p.name.as_str()),
            Self::Plaza(a) => a.city.as_deref(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// DTOs and canonical records
// ---------------------------------------------------------------------------

/// Source-specific, normalized representation of one entity before merging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDto {
    pub source: SourceKind,
    /// Identifier within `source` (a Wikidata QID, a DBpedia resource name).
    pub external_id: String,
    /// Wikidata QID this entity is declared equivalent to, if the source says so.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub same_as: Option<String>,
    pub name: String,
    pub attributes: EntityAttributes,
}

impl EntityDto {
    pub fn entity_type(&self) -> EntityType {
        self.attributes.entity_type()
    }

    pub fn qualified_id(&self) -> String {
        self.source.qualify(&self.external_id)
    }
}

/// The merged, source-agnostic entity served to consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CanonicalRecord {
    pub entity_type: EntityType,
    /// Primary source identifier, e.g. `wikidata:Q220451`.
    pub key: String,
    pub name: String,
    /// External identifier per contributing source.
    pub source_ids: BTreeMap<SourceKind, String>,
    pub attributes: EntityAttributes,
    pub last_synced_at: DateTime<Utc>,
}

impl CanonicalRecord {
    /// Serialized content without the sync timestamp. Two records with the
    /// same content produce byte-identical output.
    pub fn content_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&RecordContent {
            entity_type: self.entity_type,
            key: &self.key,
            name: &self.name,
            source_ids: &self.source_ids,
            attributes: &self.attributes,
        })
    }

    /// Rebuild a record from [`CanonicalRecord::content_json`] output.
    pub fn from_content_json(
        json: &str,
        last_synced_at: DateTime<Utc>,
    ) -> serde_json::Result<Self> {
        let content: OwnedRecordContent = serde_json::from_str(json)?;
        Ok(Self {
            entity_type: content.entity_type,
            key: content.key,
            name: content.name,
            source_ids: content.source_ids,
            attributes: content.attributes,
            last_synced_at,
        })
    }
}

#[derive(Serialize)]
struct RecordContent<'a> {
    entity_type: EntityType,
    key: &'a str,
    name: &'a str,
    source_ids: &'a BTreeMap<SourceKind, String>,
    attributes: &'a EntityAttributes,
}

#[derive(Deserialize)]
struct OwnedRecordContent {
    entity_type: EntityType,
    key: String,
    name: String,
    source_ids: BTreeMap<SourceKind, String>,
    attributes: EntityAttributes,
}

// ---------------------------------------------------------------------------
// Field statistics
// ---------------------------------------------------------------------------

/// Structured fields whose parse reliability is tracked per source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Field {
    Population,
    Area,
    Centroid,
    Established,
    CantonPopulation,
}

impl Field {
    pub const ALL: [Field; 5] = [
        Field::Population,
        Field::Area,
        Field::Centroid,
        Field::Established,
        Field::CantonPopulation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Population => "population",
            Self::Area => "area",
            Self::Centroid => "centroid",
            Self::Established => "established",
            Self::CantonPopulation => "canton_population",
        }
    }
}

impl std::str::FromStr for Field {
    type Err = KbSyncError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Field::ALL
            .into_iter()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| KbSyncError::validation(format!("unknown field '{s}'")))
    }
}

/// Parse attempts and failures for one field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldStats {
    pub attempts: u64,
    pub failures: u64,
}

impl FieldStats {
    /// Count one parse attempt.
    pub fn record(&mut self, ok: bool) {
        self.attempts += 1;
        if !ok {
            self.failures += 1;
        }
    }

    /// Failure rate in `[0, 1]`, or `None` when nothing was attempted.
    pub fn failure_rate(&self) -> Option<f64> {
        (self.attempts > 0).then(|| self.failures as f64 / self.attempts as f64)
    }

    pub fn combine(&self, other: &FieldStats) -> FieldStats {
        FieldStats {
            attempts: self.attempts + other.attempts,
            failures: self.failures + other.failures,
        }
    }
}
