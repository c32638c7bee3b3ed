//! Park → province references.

use kbsync_shared::{CanonicalRecord, EntityAttributes, EntityType};
use tracing::debug;

use crate::join::normalize_name;

/// Resolve each park's `ProvinceRef.key` against `provinces` by normalized
/// name. Unresolvable references are cleared to `None`. Returns how many
/// references resolved.
pub fn link_provinces(records: &mut [CanonicalRecord], provinces: &[CanonicalRecord]) -> usize {
    let index: Vec<(String, &str)> = provinces
        .iter()
        .filter(|p| p.entity_type == EntityType::Province)
        .map(|p| (normalize_name(&p.name), p.key.as_str()))
        .collect();

    let mut linked = 0;
    for record in records.iter_mut() {
        let EntityAttributes::NationalPark(park) = &mut record.attributes else {
            continue;
        };
        let Some(province) = park.province.as_mut() else {
            continue;
        };

        let wanted = normalize_name(&province.name);
        province.key = index
            .iter()
            .find(|(name, _)| *name == wanted)
            .map(|(_, key)| key.to_string());

        match &province.key {
            Some(_) => linked += 1,
            None => debug!(park = %record.name, province = %province.name, "province not found"),
        }
    }
    linked
}
