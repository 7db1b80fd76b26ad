use std::collections::BTreeMap;

use super::types::{Observation, RegionDataset};

/// Split a flat table into one dataset per climate-region label.
///
/// Regions come out in ascending label order (BTreeMap keyed by label), and
/// rows keep their source order within each region.
pub fn group_by_region(observations: Vec<Observation>) -> Vec<RegionDataset> {
    group_by_label(observations, |obs| obs.region.clone())
        .into_iter()
        .map(|(region, rows)| RegionDataset::labelled(region, rows))
        .collect()
}

/// Bucket items by a string label, labels ascending, items in input order.
pub(crate) fn group_by_label<T>(
    items: impl IntoIterator<Item = T>,
    label: impl Fn(&T) -> String,
) -> BTreeMap<String, Vec<T>> {
    let mut groups: BTreeMap<String, Vec<T>> = BTreeMap::new();
    for item in items {
        groups.entry(label(&item)).or_default().push(item);
    }
    groups
}
