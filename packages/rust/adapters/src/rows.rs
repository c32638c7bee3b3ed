//! Grouping of result rows by entity and field extraction helpers.

use std::collections::HashMap;

use kbsync_endpoint::{Binding, RdfTerm};
use kbsync_shared::Field;

use crate::NormalizeReport;

/// All rows that describe one external entity, in arrival order.
pub(crate) struct RowGroup<'a> {
    pub id: String,
    pub rows: Vec<&'a Binding>,
}

impl<'a> RowGroup<'a> {
    /// Every bound term for `var`, row by row.
    pub fn terms(&self, var: &'a str) -> impl Iterator<Item = &'a RdfTerm> + '_ {
        self.rows.iter().filter_map(move |row| row.get(var))
    }

    /// Every non-blank value for `var`.
    pub fn values(&self, var: &'a str) -> impl Iterator<Item = &'a str> + '_ {
        self.terms(var)
            .map(|t| t.value.trim())
            .filter(|v| !v.is_empty())
    }

    /// First non-blank value for `var`.
    pub fn first(&self, var: &'a str) -> Option<&'a str> {
        self.values(var).next()
    }

    pub fn first_owned(&self, var: &'a str) -> Option<String> {
        self.first(var).map(str::to_owned)
    }

    /// `(lat, long)` value pairs from rows that bind both variables.
    pub fn coordinate_pairs(
        &self,
        lat_var: &'a str,
        long_var: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a str)> + '_ {
        self.rows.iter().filter_map(move |row| {
            let lat = row.get(lat_var)?;
            let long = row.get(long_var)?;
            Some((lat.value.as_str(), long.value.as_str()))
        })
    }
}

/// Group rows by the identifier bound to `id_var`, preserving first-seen
/// order. Rows without an identifier are counted as skipped.
pub(crate) fn group_rows<'a>(
    rows: &'a [Binding],
    id_var: &str,
    id_of: impl Fn(&str) -> Option<String>,
    report: &mut NormalizeReport,
) -> Vec<RowGroup<'a>> {
    let mut groups: Vec<RowGroup<'a>> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for row in rows {
        report.rows_seen += 1;

        let Some(id) = row.get(id_var).and_then(|t| id_of(t.value.trim())) else {
            report.rows_skipped += 1;
            continue;
        };

        match index.get(&id) {
            Some(&pos) => groups[pos].rows.push(row),
            None => {
                index.insert(id.clone(), groups.len());
                groups.push(RowGroup {
                    id,
                    rows: vec![row],
                });
            }
        }
    }

    groups
}

/// Parse the first value of a structured field that parses, recording one
/// attempt (and one failure if nothing parsed) when any value was present.
pub(crate) fn parse_field<I, T>(
    report: &mut NormalizeReport,
    field: Field,
    values: impl IntoIterator<Item = I>,
    parse: impl Fn(I) -> Option<T>,
) -> Option<T> {
    let mut attempted = false;
    for value in values {
        attempted = true;
        if let Some(parsed) = parse(value) {
            report.record(field, true);
            return Some(parsed);
        }
    }
    if attempted {
        report.record(field, false);
    }
    None
}
