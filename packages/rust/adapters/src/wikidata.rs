//! Wikidata adapter (primary source).

use kbsync_endpoint::Binding;
use kbsync_shared::{
    CantonSet, EntityAttributes, EntityDto, EntityType, Field, HeritageAttrs, ParkAttrs,
    PlazaAttrs, ProvinceAttrs, ProvinceRef, SourceKind,
};
use tracing::debug;

use crate::label::pick_label;
use crate::literal::{is_qid, local_name, parse_area, parse_count, parse_date, parse_point};
use crate::queries;
use crate::rows::{RowGroup, group_rows, parse_field};
use crate::{
    NormalizeReport, Normalized, SourceAdapter, category_from_marker, classify_heritage,
    strongest,
};

/// Normalizes Wikidata Query Service results.
pub struct WikidataAdapter;

impl SourceAdapter for WikidataAdapter {
    fn source(&self) -> SourceKind {
        SourceKind::Wikidata
    }

    fn query_for(&self, entity_type: EntityType) -> Option<&'static str> {
        Some(match entity_type {
            EntityType::Province => queries::WIKIDATA_PROVINCES,
            EntityType::NationalPark => queries::WIKIDATA_PARKS,
            EntityType::HeritageSite => queries::WIKIDATA_HERITAGE,
            EntityType::Plaza => queries::WIKIDATA_PLAZAS,
        })
    }

    fn normalize(&self, entity_type: EntityType, rows: &[Binding]) -> Normalized {
        let mut report = NormalizeReport::default();
        let groups = group_rows(rows, "item", item_qid, &mut report);
        let mut dtos = Vec::with_capacity(groups.len());

        for group in &groups {
            let Some(name) = pick_label(group.terms("itemLabel"), Some(&group.id)) else {
                debug!(id = %group.id, "skipping item without a usable label");
                report.rows_skipped += group.rows.len();
                continue;
            };

            let attributes = match entity_type {
                EntityType::Province => province(group, &mut report),
                EntityType::NationalPark => park(group, &mut report),
                EntityType::HeritageSite => heritage(group, &mut report),
                EntityType::Plaza => plaza(group, &mut report),
            };

            dtos.push(EntityDto {
                source: SourceKind::Wikidata,
                external_id: group.id.clone(),
                same_as: None,
                name,
                attributes,
            });
        }

        debug!(
            %entity_type,
            rows = report.rows_seen,
            skipped = report.rows_skipped,
            dtos = dtos.len(),
            "normalized wikidata results"
        );

        Normalized { dtos, report }
    }
}

/// QID from an entity IRI.
fn item_qid(iri: &str) -> Option<String> {
    let id = local_name(iri);
    is_qid(id).then(|| id.to_string())
}

/// Label of a related item (capital, city, province). Unlabelled items come
/// back as their QID and are dropped.
fn related_label(group: &RowGroup<'_>, var: &'static str) -> Option<String> {
    pick_label(group.terms(var).filter(|t| !is_qid(t.value.trim())), None)
}

fn province(group: &RowGroup<'_>, report: &mut NormalizeReport) -> EntityAttributes {
    EntityAttributes::Province(ProvinceAttrs {
        capital: related_label(group, "capitalLabel"),
        population: parse_field(report, Field::Population, group.values("population"), parse_count),
        area_km2: parse_field(report, Field::Area, group.values("area"), parse_area),
        centroid: parse_field(report, Field::Centroid, group.values("coord"), parse_point),
        cantons: CantonSet::default(),
        image_url: group.first_owned("image"),
        flag_url: group.first_owned("flag"),
        wikipedia_url: group.first_owned("article"),
    })
}

fn park(group: &RowGroup<'_>, report: &mut NormalizeReport) -> EntityAttributes {
    EntityAttributes::NationalPark(ParkAttrs {
        description: group.first_owned("itemDescription"),
        area_km2: parse_field(report, Field::Area, group.values("area"), parse_area),
        established: parse_field(
            report,
            Field::Established,
            group.values("established"),
            parse_date,
        ),
        province: related_label(group, "provinceLabel").map(|name| ProvinceRef { name, key: None }),
        centroid: parse_field(report, Field::Centroid, group.values("coord"), parse_point),
        image_url: group.first_owned("image"),
        website_url: group.first_owned("website"),
    })
}

fn heritage(group: &RowGroup<'_>, report: &mut NormalizeReport) -> EntityAttributes {
    let category = strongest(group.values("category").filter_map(category_from_marker))
        .or_else(|| strongest(group.values("typeLabel").filter_map(classify_heritage)));

    EntityAttributes::HeritageSite(HeritageAttrs {
        category,
        description: group.first_owned("itemDescription"),
        centroid: parse_field(report, Field::Centroid, group.values("coord"), parse_point),
        image_url: group.first_owned("image"),
    })
}

fn plaza(group: &RowGroup<'_>, report: &mut NormalizeReport) -> EntityAttributes {
    EntityAttributes::Plaza(PlazaAttrs {
        city: related_label(group, "cityLabel"),
        centroid: parse_field(report, Field::Centroid, group.values("coord"), parse_point),
        image_url: group.first_owned("image"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::fixture;
    use kbsync_shared::HeritageCategory;

    fn normalize(entity_type: EntityType, name: &str) -> Normalized {
        WikidataAdapter.normalize(entity_type, &fixture(name))
    }

    fn find<'a>(dtos: &'a [EntityDto], id: &str) -> &'a EntityDto {
        dtos.iter()
            .find(|d| d.external_id == id)
            .unwrap_or_else(|| panic!("missing {id}"))
    }

    #[test]
    fn provinces_from_fixture() {
        let out = normalize(EntityType::Province, "wikidata_provinces.json");

        let pichincha = find(&out.dtos, "Q220451");
        assert_eq!(pichincha.name, "Pichincha");
        let EntityAttributes::Province(attrs) = &pichincha.attributes else {
            panic!("expected province attributes");
        };
        assert_eq!(attrs.capital.as_deref(), Some("Quito"));
        assert_eq!(attrs.population, Some(2_800_000));
        assert_eq!(attrs.area_km2, Some(9_692.0));
        let c = attrs.centroid.expect("centroid");
        assert_eq!((c.lat, c.lon), (-0.2, -78.5));
        assert!(attrs.wikipedia_url.as_deref().unwrap().contains("es.wikipedia.org"));
    }

    #[test]
    fn malformed_point_yields_null_centroid() {
        let out = normalize(EntityType::Province, "wikidata_provinces.json");

        let galapagos = find(&out.dtos, "Q241140");
        let EntityAttributes::Province(attrs) = &galapagos.attributes else {
            panic!("expected province attributes");
        };
        assert!(attrs.centroid.is_none());
        assert_eq!(attrs.population, Some(33_042));

        let stats = out.report.stats(Field::Centroid);
        assert_eq!(stats.failures, 1);
        assert!(stats.attempts >= 3);
    }

    #[test]
    fn qid_echo_label_is_skipped() {
        let out = normalize(EntityType::Province, "wikidata_provinces.json");
        assert!(out.dtos.iter().all(|d| d.external_id != "Q999999999"));
        assert!(out.report.rows_skipped >= 1);
    }

    #[test]
    fn duplicate_rows_fold_into_one_dto() {
        let out = normalize(EntityType::Province, "wikidata_provinces.json");
        let count = out.dtos.iter().filter(|d| d.external_id == "Q220451").count();
        assert_eq!(count, 1);
    }

    #[test]
    fn parks_from_fixture() {
        let out = normalize(EntityType::NationalPark, "wikidata_parks.json");

        let cotopaxi = find(&out.dtos, "Q1140525");
        let EntityAttributes::NationalPark(attrs) = &cotopaxi.attributes else {
            panic!("expected park attributes");
        };
        assert_eq!(attrs.province.as_ref().map(|p| p.name.as_str()), Some("Cotopaxi"));
        assert_eq!(attrs.established, chrono::NaiveDate::from_ymd_opt(1975, 8, 11));
        assert!(attrs.province.as_ref().unwrap().key.is_none());
    }

    #[test]
    fn heritage_categories() {
        let out = normalize(EntityType::HeritageSite, "wikidata_heritage.json");

        let category = |id: &str| match &find(&out.dtos, id).attributes {
            EntityAttributes::HeritageSite(a) => a.category,
            _ => panic!("expected heritage attributes"),
        };

        // Quito appears in both the UNESCO and historical branches.
        assert_eq!(category("Q2900"), Some(HeritageCategory::Unesco));
        assert_eq!(category("Q1412034"), Some(HeritageCategory::Archaeological));
    }

    #[test]
    fn plazas_from_fixture() {
        let out = normalize(EntityType::Plaza, "wikidata_plazas.json");
        assert_eq!(out.dtos.len(), 2);
        let EntityAttributes::Plaza(attrs) = &out.dtos[0].attributes else {
            panic!("expected plaza attributes");
        };
        assert_eq!(attrs.city.as_deref(), Some("Quito"));
    }

    #[test]
    fn garbage_rows_never_panic() {
        let rows: Vec<Binding> = serde_json::from_str(
            r#"[
              {},
              {"item": {"type": "literal", "value": "not-an-iri"}},
              {"item": {"type": "uri", "value": "http://www.wikidata.org/entity/Q1"},
               "itemLabel": {"type": "literal", "value": "Somewhere", "xml:lang": "es"},
               "population": {"type": "literal", "value": "many"},
               "coord": {"type": "literal", "value": "Point(abc xyz)"}}
            ]"#,
        )
        .unwrap();

        let out = WikidataAdapter.normalize(EntityType::Province, &rows);
        assert_eq!(out.dtos.len(), 1);
        assert_eq!(out.report.rows_seen, 3);
        assert_eq!(out.report.rows_skipped, 2);
        assert_eq!(out.report.stats(Field::Population).failures, 1);
        assert_eq!(out.report.stats(Field::Centroid).failures, 1);
    }
}
