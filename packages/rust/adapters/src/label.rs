//! Bilingual label resolution.

use kbsync_endpoint::RdfTerm;

/// Preference rank of a language tag: Spanish, then English, then anything.
fn rank(lang: Option<&str>) -> u8 {
    let Some(lang) = lang else { return 2 };
    let lang = lang.to_ascii_lowercase();
    let primary = lang.split('-').next().unwrap_or("");
    match primary {
        "es" => 0,
        "en" => 1,
        _ => 2,
    }
}

/// Pick the best label among `terms`.
///
/// Spanish-tagged literals win, then English, then the first available.
/// Blank values and echoes of `item_id` (the Wikidata label service returns
/// the QID when no label exists) are ignored.
pub fn pick_label<'a>(
    terms: impl IntoIterator<Item = &'a RdfTerm>,
    item_id: Option<&str>,
) -> Option<String> {
    let mut best: Option<(u8, &str)> = None;

    for term in terms {
        let value = term.value.trim();
        if value.is_empty() || item_id.is_some_and(|id| value == id) {
            continue;
        }
        let r = rank(term.lang.as_deref());
        if best.is_none_or(|(best_rank, _)| r < best_rank) {
            best = Some((r, value));
        }
    }

    best.map(|(_, value)| value.to_string())
}
