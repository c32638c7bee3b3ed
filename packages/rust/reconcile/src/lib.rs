//! Reconciler: merges source DTOs into canonical records.
//!
//! Pure and synchronous. Grouping, precedence and key assignment depend only
//! on the inputs, never on their arrival order.

mod fields;
pub mod join;
mod links;
mod precedence;

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use chrono::{DateTime, Utc};
use kbsync_shared::{CanonicalRecord, EntityDto, EntityType, SourceKind};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

pub use fields::fill_gaps;
pub use join::JoinKey;
pub use links::link_provinces;
pub use precedence::Reliability;

use precedence::Resolver;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Per-pass knobs.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    /// Fill fields the responding sources left null from the re-matched
    /// existing record. Set when some relevant source failed this pass.
    pub carry_forward: bool,
    /// Timestamp stamped on every output record.
    pub synced_at: DateTime<Utc>,
}

/// Counters for one merge pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeReport {
    pub dtos_in: usize,
    pub groups: usize,
    pub new_records: usize,
    pub rematched: usize,
    pub conflicts: usize,
    pub fields_carried_forward: usize,
}

#[derive(Debug, Clone)]
pub struct MergeOutcome {
    /// Merged records, sorted by key.
    pub records: Vec<CanonicalRecord>,
    pub report: MergeReport,
}

/// DTOs that describe the same real-world entity, at most one per source.
#[derive(Debug)]
struct Group {
    members: Vec<EntityDto>,
    join: JoinKey,
}

impl Group {
    fn new(dto: EntityDto) -> Self {
        Self {
            join: JoinKey::for_dto(&dto),
            members: vec![dto],
        }
    }

    fn has_source(&self, source: SourceKind) -> bool {
        self.members.iter().any(|m| m.source == source)
    }

    fn add(&mut self, dto: EntityDto) {
        if self.join.qualifier.is_none() {
            self.join.qualifier = JoinKey::for_dto(&dto).qualifier;
        }
        self.members.push(dto);
    }

    /// Whether any member is listed in `record`'s source ids.
    fn shares_id_with(&self, record: &CanonicalRecord) -> bool {
        self.members
            .iter()
            .any(|m| record.source_ids.get(&m.source) == Some(&m.external_id))
    }

    /// Whether `record` carries a different id for one of our sources.
    fn contradicts(&self, record: &CanonicalRecord) -> bool {
        self.members.iter().any(|m| {
            record
                .source_ids
                .get(&m.source)
                .is_some_and(|id| *id != m.external_id)
        })
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge the DTOs of one entity type into canonical records.
///
/// `existing` holds the records already stored for the type; matched records
/// keep their key and gain any new source ids. Existing records that no
/// group matches are not part of the output.
#[instrument(skip_all, fields(%entity_type, dtos = dtos.len()))]
pub fn merge(
    entity_type: EntityType,
    dtos: Vec<EntityDto>,
    existing: &[CanonicalRecord],
    reliability: &Reliability,
    options: &MergeOptions,
) -> MergeOutcome {
    let mut report = MergeReport {
        dtos_in: dtos.len(),
        ..Default::default()
    };

    let groups = group(fold(entity_type, dtos));
    report.groups = groups.len();

    let mut existing: Vec<&CanonicalRecord> = existing
        .iter()
        .filter(|r| r.entity_type == entity_type)
        .collect();
    existing.sort_by(|a, b| a.key.cmp(&b.key));
    let matches = match_existing(&groups, &existing);

    let mut records: BTreeMap<String, CanonicalRecord> = BTreeMap::new();

    for (group, matched) in groups.iter().zip(matches) {
        let prior = matched.map(|idx| existing[idx]);
        let members: Vec<&EntityDto> = group.members.iter().collect();
        let primary = members[0];

        let mut resolver = Resolver::new(reliability, &primary.name);
        let mut attributes = fields::merge_attributes(entity_type, &members, &mut resolver);
        report.conflicts += resolver.conflicts;

        let mut source_ids: BTreeMap<SourceKind, String> =
            prior.map(|r| r.source_ids.clone()).unwrap_or_default();
        for member in &members {
            source_ids.insert(member.source, member.external_id.clone());
        }

        let key = match prior {
            Some(record) => {
                report.rematched += 1;
                if options.carry_forward {
                    report.fields_carried_forward +=
                        fill_gaps(&mut attributes, &record.attributes);
                }
                record.key.clone()
            }
            None => {
                report.new_records += 1;
                primary.qualified_id()
            }
        };

        match records.entry(key) {
            Entry::Occupied(mut slot) => {
                // Groups run in priority order, so the earlier one leads.
                let record = slot.get_mut();
                warn!(
                    key = %record.key,
                    name = %primary.name,
                    "record key collision, merging groups"
                );
                for (source, id) in source_ids {
                    record.source_ids.entry(source).or_insert(id);
                }
                fill_gaps(&mut record.attributes, &attributes);
            }
            Entry::Vacant(slot) => {
                let key = slot.key().clone();
                slot.insert(CanonicalRecord {
                    entity_type,
                    key,
                    name: primary.name.trim().to_string(),
                    source_ids,
                    attributes,
                    last_synced_at: options.synced_at,
                });
            }
        }
    }

    let records: Vec<CanonicalRecord> = records.into_values().collect();

    info!(
        %entity_type,
        records = records.len(),
        new = report.new_records,
        rematched = report.rematched,
        conflicts = report.conflicts,
        "merge complete"
    );

    MergeOutcome { records, report }
}

/// Fold DTOs per (source, external id) and sort by (priority, id).
/// Wrong-type and nameless DTOs are dropped.
fn fold(entity_type: EntityType, dtos: Vec<EntityDto>) -> Vec<EntityDto> {
    let mut by_id: BTreeMap<(u8, SourceKind, String), Vec<EntityDto>> = BTreeMap::new();

    for dto in dtos {
        if dto.entity_type() != entity_type || dto.name.trim().is_empty() {
            debug!(id = %dto.qualified_id(), "dropping unusable dto");
            continue;
        }
        by_id
            .entry((dto.source.priority(), dto.source, dto.external_id.clone()))
            .or_default()
            .push(dto);
    }

    by_id
        .into_values()
        .filter_map(|mut duplicates| {
            // Content order makes the fold independent of arrival order.
            duplicates.sort_by_cached_key(|d| serde_json::to_string(d).unwrap_or_default());
            let mut iter = duplicates.into_iter();
            let mut first = iter.next()?;
            for other in iter {
                fill_gaps(&mut first.attributes, &other.attributes);
                if first.same_as.is_none() {
                    first.same_as = other.same_as;
                }
            }
            Some(first)
        })
        .collect()
}

/// Build groups from priority-sorted DTOs.
fn group(dtos: Vec<EntityDto>) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();

    for dto in dtos {
        let by_same_as = dto.same_as.as_deref().and_then(|shared| {
            groups.iter().position(|g| {
                !g.has_source(dto.source) && g.members.iter().any(|m| m.external_id == shared)
            })
        });

        let slot = by_same_as.or_else(|| {
            let key = JoinKey::for_dto(&dto);
            groups
                .iter()
                .position(|g| !g.has_source(dto.source) && g.join.matches(&key))
        });

        match slot {
            Some(idx) => groups[idx].add(dto),
            None => groups.push(Group::new(dto)),
        }
    }

    groups
}

/// Pair each group with at most one existing record: first by shared
/// source id, then by join key. Each record is claimed once.
fn match_existing(groups: &[Group], existing: &[&CanonicalRecord]) -> Vec<Option<usize>> {
    let mut claimed = vec![false; existing.len()];
    let mut matches = vec![None; groups.len()];

    for (gi, group) in groups.iter().enumerate() {
        let found = existing
            .iter()
            .enumerate()
            .position(|(ei, r)| !claimed[ei] && group.shares_id_with(r));
        if let Some(ei) = found {
            claimed[ei] = true;
            matches[gi] = Some(ei);
        }
    }

    let join_keys: Vec<JoinKey> = existing.iter().map(|r| JoinKey::for_record(r)).collect();
    for (gi, group) in groups.iter().enumerate() {
        if matches[gi].is_some() {
            continue;
        }
        let found = existing.iter().enumerate().position(|(ei, r)| {
            !claimed[ei] && join_keys[ei].matches(&group.join) && !group.contradicts(r)
        });
        if let Some(ei) = found {
            claimed[ei] = true;
            matches[gi] = Some(ei);
        }
    }

    matches
}
