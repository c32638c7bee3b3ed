//! Per-type attribute merging and gap filling.

use kbsync_shared::{
    CantonSet, EntityAttributes, EntityDto, EntityType, Field, HeritageAttrs, ParkAttrs,
    PlazaAttrs, ProvinceAttrs, ProvinceRef, SourceKind,
};

use crate::precedence::Resolver;

/// Members of one type with their source, in priority order.
fn typed<'a, A>(
    members: &[&'a EntityDto],
    pick: impl Fn(&'a EntityAttributes) -> Option<&'a A>,
) -> Vec<(SourceKind, &'a A)> {
    members
        .iter()
        .filter_map(|dto| pick(&dto.attributes).map(|a| (dto.source, a)))
        .collect()
}

/// Merge the attributes of one group. `members` must be priority-sorted.
pub(crate) fn merge_attributes(
    entity_type: EntityType,
    members: &[&EntityDto],
    resolver: &mut Resolver<'_>,
) -> EntityAttributes {
    match entity_type {
        EntityType::Province => {
            let m = typed(members, |a| match a {
                EntityAttributes::Province(p) => Some(p),
                _ => None,
            });
            let mut cantons = CantonSet::default();
            for (_, attrs) in &m {
                cantons.union(&attrs.cantons);
            }
            EntityAttributes::Province(ProvinceAttrs {
                capital: resolver.text("capital", &m, |a| a.capital.clone()),
                population: resolver.structured(Field::Population, &m, |a| a.population),
                area_km2: resolver.structured(Field::Area, &m, |a| a.area_km2),
                centroid: resolver.structured(Field::Centroid, &m, |a| a.centroid),
                cantons,
                image_url: resolver.text("image_url", &m, |a| a.image_url.clone()),
                flag_url: resolver.text("flag_url", &m, |a| a.flag_url.clone()),
                wikipedia_url: resolver.text("wikipedia_url", &m, |a| a.wikipedia_url.clone()),
            })
        }
        EntityType::NationalPark => {
            let m = typed(members, |a| match a {
                EntityAttributes::NationalPark(p) => Some(p),
                _ => None,
            });
            EntityAttributes::NationalPark(ParkAttrs {
                description: resolver.text("description", &m, |a| a.description.clone()),
                area_km2: resolver.structured(Field::Area, &m, |a| a.area_km2),
                established: resolver.structured(Field::Established, &m, |a| a.established),
                // Compared by name only; the key is resolved later by linking.
                province: resolver
                    .text("province", &m, |a| a.province.as_ref().map(|p| p.name.clone()))
                    .map(|name| ProvinceRef { name, key: None }),
                centroid: resolver.structured(Field::Centroid, &m, |a| a.centroid),
                image_url: resolver.text("image_url", &m, |a| a.image_url.clone()),
                website_url: resolver.text("website_url", &m, |a| a.website_url.clone()),
            })
        }
        EntityType::HeritageSite => {
            let m = typed(members, |a| match a {
                EntityAttributes::HeritageSite(h) => Some(h),
                _ => None,
            });
            EntityAttributes::HeritageSite(HeritageAttrs {
                category: resolver.text("category", &m, |a| a.category),
                description: resolver.text("description", &m, |a| a.description.clone()),
                centroid: resolver.structured(Field::Centroid, &m, |a| a.centroid),
                image_url: resolver.text("image_url", &m, |a| a.image_url.clone()),
            })
        }
        EntityType::Plaza => {
            let m = typed(members, |a| match a {
                EntityAttributes::Plaza(p) => Some(p),
                _ => None,
            });
            EntityAttributes::Plaza(PlazaAttrs {
                city: resolver.text("city", &m, |a| a.city.clone()),
                centroid: resolver.structured(Field::Centroid, &m, |a| a.centroid),
                image_url: resolver.text("image_url", &m, |a| a.image_url.clone()),
            })
        }
    }
}

fn fill<T: Clone>(slot: &mut Option<T>, from: &Option<T>, filled: &mut usize) {
    if slot.is_none() && from.is_some() {
        slot.clone_from(from);
        *filled += 1;
    }
}

/// Fill null fields of `target` from `from`. Returns how many were filled.
/// Attributes of different types are left alone.
pub fn fill_gaps(target: &mut EntityAttributes, from: &EntityAttributes) -> usize {
    let mut n = 0;
    match (target, from) {
        (EntityAttributes::Province(t), EntityAttributes::Province(f)) => {
            fill(&mut t.capital, &f.capital, &mut n);
            fill(&mut t.population, &f.population, &mut n);
            fill(&mut t.area_km2, &f.area_km2, &mut n);
            fill(&mut t.centroid, &f.centroid, &mut n);
            fill(&mut t.image_url, &f.image_url, &mut n);
            fill(&mut t.flag_url, &f.flag_url, &mut n);
            fill(&mut t.wikipedia_url, &f.wikipedia_url, &mut n);
            if t.cantons.is_empty() && !f.cantons.is_empty() {
                t.cantons = f.cantons.clone();
                n += 1;
            }
        }
        (EntityAttributes::NationalPark(t), EntityAttributes::NationalPark(f)) => {
            fill(&mut t.description, &f.description, &mut n);
            fill(&mut t.area_km2, &f.area_km2, &mut n);
            fill(&mut t.established, &f.established, &mut n);
            fill(&mut t.province, &f.province, &mut n);
            fill(&mut t.centroid, &f.centroid, &mut n);
            fill(&mut t.image_url, &f.image_url, &mut n);
            fill(&mut t.website_url, &f.website_url, &mut n);
        }
        (EntityAttributes::HeritageSite(t), EntityAttributes::HeritageSite(f)) => {
            fill(&mut t.category, &f.category, &mut n);
            fill(&mut t.description, &f.description, &mut n);
            fill(&mut t.centroid, &f.centroid, &mut n);
            fill(&mut t.image_url, &f.image_url, &mut n);
        }
        (EntityAttributes::Plaza(t), EntityAttributes::Plaza(f)) => {
            fill(&mut t.city, &f.city, &mut n);
            fill(&mut t.centroid, &f.centroid, &mut n);
            fill(&mut t.image_url, &f.image_url, &mut n);
        }
        _ => {}
    }
    n
}

#[cfg(test)]
mod tests {
    use super::*;
    use kbsync_shared::Centroid;

    #[test]
    fn fill_gaps_only_touches_nulls() {
        let mut target = EntityAttributes::Plaza(PlazaAttrs {
            city: Some("Quito".into()),
            centroid: None,
            image_url: None,
        });
        let from = EntityAttributes::Plaza(PlazaAttrs {
            city: Some("Cuenca".into()),
            centroid: Centroid::new(-0.22, -78.51),
            image_url: None,
        });

        assert_eq!(fill_gaps(&mut target, &from), 1);
        let EntityAttributes::Plaza(p) = target else {
            panic!("expected plaza");
        };
        assert_eq!(p.city.as_deref(), Some("Quito"));
        assert!(p.centroid.is_some());
    }

    #[test]
    fn fill_gaps_ignores_mismatched_types() {
        let mut target = EntityAttributes::empty(EntityType::Plaza);
        let from = EntityAttributes::empty(EntityType::Province);
        assert_eq!(fill_gaps(&mut target, &from), 0);
    }
}
