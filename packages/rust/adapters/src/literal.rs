//! Parsers for the literal encodings the sources use.
//!
//! Every parser returns `None` on malformed input; callers count the
//! failure and degrade the field to null.

use std::sync::LazyLock;

use chrono::NaiveDate;
use kbsync_shared::Centroid;
use regex::Regex;

/// `Point(<lon> <lat>)`, the WKT literal Wikidata uses for P625.
static POINT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^Point\(\s*([-+]?\d+(?:\.\d+)?)\s+([-+]?\d+(?:\.\d+)?)\s*\)$")
        .expect("valid regex")
});

/// `YYYY-MM-DD` with an optional `THH:MM:SS[Z]` suffix.
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\+?(\d{4})-(\d{2})-(\d{2})(?:T\d{2}:\d{2}:\d{2}(?:\.\d+)?Z?)?$")
        .expect("valid regex")
});

/// Parse a WKT point literal. Note the order: longitude first.
pub fn parse_point(literal: &str) -> Option<Centroid> {
    let caps = POINT_RE.captures(literal.trim())?;
    let lon: f64 = caps[1].parse().ok()?;
    let lat: f64 = caps[2].parse().ok()?;
    Centroid::new(lat, lon)
}

/// Combine separate `geo:lat` / `geo:long` literals.
pub fn parse_lat_long(lat: &str, lon: &str) -> Option<Centroid> {
    let lat = parse_decimal(lat)?;
    let lon = parse_decimal(lon)?;
    Centroid::new(lat, lon)
}

/// Finite decimal number; scientific notation accepted (DBpedia emits
/// `xsd:double` values like `2.7e9`).
pub fn parse_decimal(literal: &str) -> Option<f64> {
    literal.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Non-negative count. Decimal notation (`"2800000.0"`) is truncated.
pub fn parse_count(literal: &str) -> Option<u64> {
    let value = parse_decimal(literal)?;
    if value < 0.0 || value > u64::MAX as f64 {
        return None;
    }
    Some(value.trunc() as u64)
}

/// Non-negative area.
pub fn parse_area(literal: &str) -> Option<f64> {
    parse_decimal(literal).filter(|v| *v >= 0.0)
}

/// Calendar date, with or without a time component. BCE dates fail.
pub fn parse_date(literal: &str) -> Option<NaiveDate> {
    let caps = DATE_RE.captures(literal.trim())?;
    let year: i32 = caps[1].parse().ok()?;
    let month: u32 = caps[2].parse().ok()?;
    let day: u32 = caps[3].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Last path segment of an IRI (`.../entity/Q220451` → `Q220451`).
pub fn local_name(iri: &str) -> &str {
    let trimmed = iri.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed,
    }
}

/// Human-readable name from a DBpedia resource IRI
/// (`.../resource/Santa_Elena_Province` → `Santa Elena Province`).
pub fn resource_title(iri: &str) -> String {
    local_name(iri).replace('_', " ")
}

/// Whether `value` looks like a bare Wikidata item id (`Q` + digits).
pub fn is_qid(value: &str) -> bool {
    value
        .strip_prefix('Q')
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}

/// Whether `value` is an http(s) URL pointing at an SVG file.
pub fn is_svg_url(value: &str) -> bool {
    let lower = value.trim().to_ascii_lowercase();
    (lower.starts_with("http://") || lower.starts_with("https://")) && lower.ends_with(".svg")
}
