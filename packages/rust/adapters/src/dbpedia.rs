//! DBpedia adapter (secondary source).
//!
//! DBpedia contributes cantons, flags, and a second opinion on the numeric
//! fields. It has no plaza data.

use std::collections::HashMap;

use kbsync_endpoint::{Binding, RdfTerm};
use kbsync_shared::{
    Canton, CantonSet, Centroid, EntityAttributes, EntityDto, EntityType, Field, HeritageAttrs,
    HeritageCategory, ParkAttrs, ProvinceAttrs, ProvinceRef, SourceKind,
};
use tracing::debug;

use crate::label::pick_label;
use crate::literal::{
    is_qid, is_svg_url, local_name, parse_area, parse_count, parse_date, parse_lat_long,
    resource_title,
};
use crate::queries;
use crate::rows::{RowGroup, group_rows, parse_field};
use crate::{NormalizeReport, Normalized, SourceAdapter};

const RESOURCE_PREFIX: &str = "http://dbpedia.org/resource/";

/// `dbo:areaTotal` is in square metres.
const M2_PER_KM2: f64 = 1_000_000.0;

/// Normalizes DBpedia (Virtuoso) results.
pub struct DbpediaAdapter;

impl SourceAdapter for DbpediaAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::Dbpedia
    }

    fn query_for(&self, entity_type: EntityType) -> Option<&'static str> {
        match entity_type {
            EntityType::Province => Some(queries::DBPEDIA_PROVINCES),
            EntityType::NationalPark => Some(queries::DBPEDIA_PARKS),
            EntityType::HeritageSite => Some(queries::DBPEDIA_HERITAGE),
            EntityType::Plaza => None,
        }
    }

    fn normalize(&self, entity_type: EntityType, rows: &[Binding]) -> Normalized {
        let mut report = NormalizeReport::default();
        let id_var = match entity_type {
            EntityType::Province => "province",
            EntityType::NationalPark => "park",
            EntityType::HeritageSite => "site",
            EntityType::Plaza => {
                return Normalized {
                    dtos: Vec::new(),
                    report,
                };
            }
        };

        let groups = group_rows(rows, id_var, resource_name, &mut report);
        let mut dtos = Vec::with_capacity(groups.len());

        for group in &groups {
            let Some(name) = pick_label(group.terms("label"), None) else {
                debug!(id = %group.id, "skipping resource without a label");
                report.rows_skipped += group.rows.len();
                continue;
            };

            let attributes = match entity_type {
                EntityType::Province => province(group, &mut report),
                EntityType::NationalPark => park(group, &mut report),
                _ => heritage(group, &mut report),
            };

            dtos.push(EntityDto {
                source: SourceKind::Dbpedia,
                external_id: group.id.clone(),
                same_as: wikidata_link(group),
                name,
                attributes,
            });
        }

        debug!(
            %entity_type,
            rows = report.rows_seen,
            skipped = report.rows_skipped,
            dtos = dtos.len(),
            "normalized dbpedia results"
        );

        Normalized { dtos, report }
    }
}

/// Resource name from a DBpedia resource IRI.
fn resource_name(iri: &str) -> Option<String> {
    iri.strip_prefix(RESOURCE_PREFIX)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

/// Wikidata QID declared via `owl:sameAs`.
fn wikidata_link(group: &RowGroup<'_>) -> Option<String> {
    group
        .values("wikidata")
        .map(local_name)
        .find(|id| is_qid(id))
        .map(str::to_string)
}

fn area_km2(report: &mut NormalizeReport, group: &RowGroup<'_>) -> Option<f64> {
    parse_field(report, Field::Area, group.values("area"), parse_area).map(|m2| m2 / M2_PER_KM2)
}

fn coordinates(report: &mut NormalizeReport, group: &RowGroup<'_>) -> Option<Centroid> {
    parse_field(
        report,
        Field::Centroid,
        group.coordinate_pairs("lat", "long"),
        |(lat, long)| parse_lat_long(lat, long),
    )
}

fn province(group: &RowGroup<'_>, report: &mut NormalizeReport) -> EntityAttributes {
    EntityAttributes::Province(ProvinceAttrs {
        capital: None,
        population: parse_field(report, Field::Population, group.values("population"), parse_count),
        area_km2: area_km2(report, group),
        centroid: coordinates(report, group),
        cantons: cantons(group, report),
        image_url: None,
        flag_url: group.values("flag").find(|v| is_svg_url(v)).map(str::to_string),
        wikipedia_url: None,
    })
}

/// Collect the cantons spread over a province's rows, one per subdivision IRI.
fn cantons(group: &RowGroup<'_>, report: &mut NormalizeReport) -> CantonSet {
    let mut by_iri: Vec<(&str, Vec<&Binding>)> = Vec::new();
    let mut index: HashMap<&str, usize> = HashMap::new();

    for &row in &group.rows {
        let Some(canton) = row.get("canton").filter(|t| t.is_uri()) else {
            continue;
        };
        let iri = canton.value.as_str();
        match index.get(iri) {
            Some(&pos) => by_iri[pos].1.push(row),
            None => {
                index.insert(iri, by_iri.len());
                by_iri.push((iri, vec![row]));
            }
        }
    }

    let mut set = CantonSet::default();
    for (iri, rows) in by_iri {
        let name =
            pick_label(terms(&rows, "cantonLabel"), None).unwrap_or_else(|| resource_title(iri));
        if name.trim().is_empty() {
            continue;
        }

        let population = parse_field(
            report,
            Field::CantonPopulation,
            terms(&rows, "cantonPopulation").map(|t| t.value.as_str()),
            parse_count,
        );
        let centroid = rows.iter().find_map(|r| {
            let lat = r.get("cantonLat")?;
            let long = r.get("cantonLong")?;
            parse_lat_long(&lat.value, &long.value)
        });

        set.insert(Canton {
            name,
            description: terms(&rows, "cantonAbstract")
                .map(|t| t.value.trim())
                .find(|v| !v.is_empty())
                .map(str::to_string),
            seat_town: terms(&rows, "cantonSeat").find_map(seat_name),
            population,
            url: Some(iri.to_string()),
            centroid,
        });
    }

    set
}

/// Every term bound to `var` across `rows`.
fn terms<'a, 'b>(rows: &'b [&'a Binding], var: &'static str) -> impl Iterator<Item = &'a RdfTerm> + 'b {
    rows.iter().filter_map(move |r| r.get(var))
}

/// `dbp:seat` is either a resource or a plain literal.
fn seat_name(term: &RdfTerm) -> Option<String> {
    let value = term.value.trim();
    if value.is_empty() {
        None
    } else if term.is_uri() {
        Some(resource_title(value))
    } else {
        Some(value.to_string())
    }
}

fn park(group: &RowGroup<'_>, report: &mut NormalizeReport) -> EntityAttributes {
    EntityAttributes::NationalPark(ParkAttrs {
        description: group.first_owned("abstract"),
        area_km2: area_km2(report, group),
        established: parse_field(
            report,
            Field::Established,
            group.values("established"),
            parse_date,
        ),
        province: pick_label(group.terms("provinceLabel"), None)
            .map(|name| ProvinceRef { name, key: None }),
        centroid: coordinates(report, group),
        image_url: group.first_owned("thumbnail"),
        website_url: group.first_owned("website"),
    })
}

fn heritage(group: &RowGroup<'_>, report: &mut NormalizeReport) -> EntityAttributes {
    EntityAttributes::HeritageSite(HeritageAttrs {
        category: Some(HeritageCategory::Unesco),
        description: group.first_owned("abstract"),
        centroid: coordinates(report, group),
        image_url: group.first_owned("thumbnail"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixture;

    fn provinces() -> Normalized {
        DbpediaAdapter.normalize(EntityType::Province, &fixture("dbpedia_provinces.json"))
    }

    fn province_attrs<'a>(out: &'a Normalized, id: &str) -> (&'a EntityDto, &'a ProvinceAttrs) {
        let dto = out
            .dtos
            .iter()
            .find(|d| d.external_id == id)
            .unwrap_or_else(|| panic!("missing {id}"));
        match &dto.attributes {
            EntityAttributes::Province(attrs) => (dto, attrs),
            _ => panic!("expected province attributes"),
        }
    }

    #[test]
    fn province_rows_fold_with_cantons() {
        let out = provinces();
        let (dto, attrs) = province_attrs(&out, "Pichincha_Province");

        assert_eq!(dto.name, "Provincia de Pichincha");
        assert_eq!(dto.same_as.as_deref(), Some("Q220451"));
        assert_eq!(attrs.population, Some(2_576_287));
        assert_eq!(attrs.area_km2, Some(9_692.0));

        let names: Vec<_> = attrs.cantons.items.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Cayambe", "Mejía", "Quito"]);

        let quito = attrs.cantons.items.iter().find(|c| c.name == "Quito").unwrap();
        assert_eq!(quito.seat_town.as_deref(), Some("Quito"));
        assert_eq!(quito.population, Some(2_239_191));
        assert!(quito.centroid.is_some());

        let mejia = attrs.cantons.items.iter().find(|c| c.name == "Mejía").unwrap();
        assert_eq!(mejia.seat_town.as_deref(), Some("Machachi"));
    }

    #[test]
    fn flags_must_be_svg_urls() {
        let out = provinces();
        let (_, guayas) = province_attrs(&out, "Guayas_Province");
        assert!(guayas.flag_url.as_deref().unwrap().ends_with(".svg"));

        let (_, azuay) = province_attrs(&out, "Azuay_Province");
        assert!(azuay.flag_url.is_none());
    }

    #[test]
    fn english_label_when_no_spanish() {
        let out = provinces();
        let (dto, _) = province_attrs(&out, "Guayas_Province");
        assert_eq!(dto.name, "Guayas Province");
        assert!(dto.same_as.is_none());
    }

    #[test]
    fn unparsable_population_is_counted() {
        let out = provinces();
        let (_, azuay) = province_attrs(&out, "Azuay_Province");
        assert!(azuay.population.is_none());
        assert_eq!(out.report.stats(Field::Population).failures, 1);
        assert!(out.report.stats(Field::CantonPopulation).attempts >= 2);
    }

    #[test]
    fn parks_convert_area_and_count_bad_dates() {
        let out =
            DbpediaAdapter.normalize(EntityType::NationalPark, &fixture("dbpedia_parks.json"));
        let park = out
            .dtos
            .iter()
            .find(|d| d.external_id == "Cotopaxi_National_Park")
            .expect("park");
        let EntityAttributes::NationalPark(attrs) = &park.attributes else {
            panic!("expected park attributes");
        };
        assert_eq!(attrs.area_km2, Some(333.93));
        assert!(attrs.established.is_none());
        assert_eq!(
            attrs.province.as_ref().map(|p| p.name.as_str()),
            Some("Cotopaxi Province")
        );
        assert_eq!(out.report.stats(Field::Established).failures, 1);
    }

    #[test]
    fn heritage_sites_are_unesco() {
        let out =
            DbpediaAdapter.normalize(EntityType::HeritageSite, &fixture("dbpedia_heritage.json"));
        assert!(!out.dtos.is_empty());
        for dto in &out.dtos {
            let EntityAttributes::HeritageSite(attrs) = &dto.attributes else {
                panic!("expected heritage attributes");
            };
            assert_eq!(attrs.category, Some(HeritageCategory::Unesco));
        }
    }

    #[test]
    fn no_plaza_query() {
        assert!(DbpediaAdapter.query_for(EntityType::Plaza).is_none());
        let out = DbpediaAdapter.normalize(EntityType::Plaza, &[]);
        assert!(out.dtos.is_empty());
    }

    #[test]
    fn non_resource_iris_are_skipped() {
        let rows: Vec<Binding> = serde_json::from_str(
            r#"[{"province": {"type": "uri", "value": "http://example.org/x"},
                 "label": {"type": "literal", "value": "X", "xml:lang": "en"}}]"#,
        )
        .unwrap();
        let out = DbpediaAdapter.normalize(EntityType::Province, &rows);
        assert!(out.dtos.is_empty());
        assert_eq!(out.report.rows_skipped, 1);
    }
}
