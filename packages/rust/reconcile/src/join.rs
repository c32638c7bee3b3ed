//! Name-based join keys.

use kbsync_shared::text::fold;
use kbsync_shared::{CanonicalRecord, EntityDto};

/// Generic words that carry no identity ("Provincia de Pichincha" and
/// "Pichincha Province" must meet).
const STOPWORDS: &[&str] = &[
    "province", "provincia", "de", "del", "la", "el", "los", "las", "of", "the", "ecuador",
    "islas", "parque", "nacional", "national", "park",
];

/// Normalized identity of an entity when no shared identifier exists.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JoinKey {
    pub name: String,
    /// Owning province (parks) or city (plazas).
    pub qualifier: Option<String>,
}

impl JoinKey {
    pub fn new(name: &str, qualifier: Option<&str>) -> Self {
        Self {
            name: normalize_name(name),
            qualifier: qualifier.map(normalize_name).filter(|q| !q.is_empty()),
        }
    }

    pub fn for_dto(dto: &EntityDto) -> Self {
        Self::new(&dto.name, dto.attributes.join_qualifier())
    }

    pub fn for_record(record: &CanonicalRecord) -> Self {
        Self::new(&record.name, record.attributes.join_qualifier())
    }

    /// Names must agree; qualifiers only when both sides carry one.
    pub fn matches(&self, other: &JoinKey) -> bool {
        if self.name.is_empty() || self.name != other.name {
            return false;
        }
        match (&self.qualifier, &other.qualifier) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        }
    }

    /// Storable form, `name` or `name|qualifier`.
    pub fn as_storage_key(&self) -> String {
        match &self.qualifier {
            Some(q) => format!("{}|{q}", self.name),
            None => self.name.clone(),
        }
    }
}

/// Fold case, accents and punctuation, then drop generic words. Falls back
/// to the plain folded name when nothing else is left.
pub fn normalize_name(name: &str) -> String {
    let folded = fold(name);
    let kept: Vec<&str> = folded
        .split(' ')
        .filter(|w| !w.is_empty() && !STOPWORDS.contains(w))
        .collect();
    if kept.is_empty() {
        folded
    } else {
        kept.join(" ")
    }
}
