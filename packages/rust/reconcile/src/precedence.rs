//! Field-level source precedence.

use std::collections::BTreeMap;
use std::fmt::Debug;

use kbsync_shared::{Field, FieldStats, KbSyncError, SourceKind};
use tracing::debug;

/// Historical parse reliability per (source, field) for one entity type.
#[derive(Debug, Clone, Default)]
pub struct Reliability {
    stats: BTreeMap<(SourceKind, Field), FieldStats>,
}

impl Reliability {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate stats for one source and field.
    pub fn add(&mut self, source: SourceKind, field: Field, stats: FieldStats) {
        let entry = self.stats.entry((source, field)).or_default();
        *entry = entry.combine(&stats);
    }

    pub fn failure_rate(&self, source: SourceKind, field: Field) -> Option<f64> {
        self.stats.get(&(source, field)).and_then(FieldStats::failure_rate)
    }

    /// Order `sources` for a structured field: lowest failure rate first
    /// when every rate is known, fixed priority otherwise or on ties.
    pub fn rank(&self, field: Field, sources: &mut [SourceKind]) {
        let rates: Option<Vec<f64>> = sources
            .iter()
            .map(|s| self.failure_rate(*s, field))
            .collect();

        match rates {
            Some(_) => sources.sort_by(|a, b| {
                let ra = self.failure_rate(*a, field).unwrap_or(1.0);
                let rb = self.failure_rate(*b, field).unwrap_or(1.0);
                ra.total_cmp(&rb).then(a.priority().cmp(&b.priority()))
            }),
            None => sources.sort_by_key(SourceKind::priority),
        }
    }
}

/// Picks a winner per field and records disagreements.
pub(crate) struct Resolver<'a> {
    reliability: &'a Reliability,
    entity: &'a str,
    pub conflicts: usize,
}

impl<'a> Resolver<'a> {
    pub fn new(reliability: &'a Reliability, entity: &'a str) -> Self {
        Self {
            reliability,
            entity,
            conflicts: 0,
        }
    }

    /// Structured field: reliability-ranked precedence.
    pub fn structured<A, T>(
        &mut self,
        field: Field,
        members: &[(SourceKind, &A)],
        get: impl Fn(&A) -> Option<T>,
    ) -> Option<T>
    where
        T: PartialEq + Debug,
    {
        let mut candidates: Vec<(SourceKind, T)> = members
            .iter()
            .filter_map(|(source, attrs)| get(*attrs).map(|v| (*source, v)))
            .collect();

        let mut order: Vec<SourceKind> = candidates.iter().map(|(s, _)| *s).collect();
        self.reliability.rank(field, &mut order);
        candidates.sort_by_key(|(s, _)| order.iter().position(|o| o == s));

        self.settle(field.as_str(), candidates)
    }

    /// Text field: fixed priority (members arrive priority-sorted).
    pub fn text<A, T>(
        &mut self,
        name: &'static str,
        members: &[(SourceKind, &A)],
        get: impl Fn(&A) -> Option<T>,
    ) -> Option<T>
    where
        T: PartialEq + Debug,
    {
        let candidates: Vec<(SourceKind, T)> = members
            .iter()
            .filter_map(|(source, attrs)| get(*attrs).map(|v| (*source, v)))
            .collect();
        self.settle(name, candidates)
    }

    /// Take the first candidate, logging a conflict when others disagree.
    fn settle<T: PartialEq + Debug>(
        &mut self,
        field: &str,
        candidates: Vec<(SourceKind, T)>,
    ) -> Option<T> {
        let mut iter = candidates.into_iter();
        let (winner_source, winner) = iter.next()?;

        for (source, value) in iter {
            if value != winner {
                self.conflicts += 1;
                let conflict = KbSyncError::MergeConflict {
                    field: field.to_string(),
                    message: format!(
                        "{winner_source} says {winner:?}, {source} says {value:?}; keeping {winner_source}"
                    ),
                };
                debug!(entity = self.entity, error = %conflict, "resolved merge conflict");
            }
        }

        Some(winner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(attempts: u64, failures: u64) -> FieldStats {
        FieldStats { attempts, failures }
    }

    #[test]
    fn lower_failure_rate_wins() {
        let mut reliability = Reliability::new();
        reliability.add(SourceKind::Wikidata, Field::Population, stats(10, 5));
        reliability.add(SourceKind::Dbpedia, Field::Population, stats(10, 1));

        let mut order = vec![SourceKind::Wikidata, SourceKind::Dbpedia];
        reliability.rank(Field::Population, &mut order);
        assert_eq!(order, vec![SourceKind::Dbpedia, SourceKind::Wikidata]);
    }

    #[test]
    fn unknown_rate_falls_back_to_priority() {
        let mut reliability = Reliability::new();
        reliability.add(SourceKind::Dbpedia, Field::Area, stats(10, 0));

        let mut order = vec![SourceKind::Dbpedia, SourceKind::Wikidata];
        reliability.rank(Field::Area, &mut order);
        assert_eq!(order, vec![SourceKind::Wikidata, SourceKind::Dbpedia]);
    }

    #[test]
    fn equal_rates_fall_back_to_priority() {
        let mut reliability = Reliability::new();
        reliability.add(SourceKind::Wikidata, Field::Centroid, stats(4, 1));
        reliability.add(SourceKind::Dbpedia, Field::Centroid, stats(8, 2));

        let mut order = vec![SourceKind::Dbpedia, SourceKind::Wikidata];
        reliability.rank(Field::Centroid, &mut order);
        assert_eq!(order, vec![SourceKind::Wikidata, SourceKind::Dbpedia]);
    }

    #[test]
    fn stats_accumulate() {
        let mut reliability = Reliability::new();
        reliability.add(SourceKind::Wikidata, Field::Area, stats(3, 1));
        reliability.add(SourceKind::Wikidata, Field::Area, stats(1, 1));
        assert_eq!(reliability.failure_rate(SourceKind::Wikidata, Field::Area), Some(0.5));
    }

    #[test]
    fn resolver_counts_conflicts() {
        let reliability = Reliability::new();
        let mut resolver = Resolver::new(&reliability, "Pichincha");
        let wikidata = Some(2_800_000u64);
        let dbpedia = Some(2_576_287u64);
        let members = [
            (SourceKind::Wikidata, &wikidata),
            (SourceKind::Dbpedia, &dbpedia),
        ];

        let chosen = resolver.structured(Field::Population, &members, |v| *v);
        assert_eq!(chosen, Some(2_800_000));
        assert_eq!(resolver.conflicts, 1);

        let same = [(SourceKind::Wikidata, &wikidata), (SourceKind::Dbpedia, &wikidata)];
        resolver.text("population", &same, |v| *v);
        assert_eq!(resolver.conflicts, 1);
    }
}
