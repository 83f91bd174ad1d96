//! Registration reconciliation.
//!
//! Pure functions for merging desired and reported property maps, comparing
//! registrations field by field and patching one snapshot with another.
//! Nothing in here touches the store.

use std::collections::{BTreeMap, HashSet};
use std::hash::Hash;

use serde_json::Value;
use twinreg_core::fold_case;

use crate::model::{PropertyMap, Registration};

/// Merge desired and reported properties into one view.
///
/// For each key: absent (or null) on both sides is dropped, a value on one
/// side is taken as is, and when both sides hold a value the reported one
/// wins.
pub fn consolidate(desired: &PropertyMap, reported: &PropertyMap) -> PropertyMap {
    let mut merged = PropertyMap::new();
    for key in desired.keys().chain(reported.keys()) {
        if merged.contains_key(key) {
            continue;
        }
        let desired_value = present(desired.get(key));
        let reported_value = present(reported.get(key));
        if let Some(value) = reported_value.or(desired_value) {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

fn present(value: Option<&Value>) -> Option<&Value> {
    value.filter(|v| !v.is_null())
}

/// Patch `existing` with the fields present in `incoming`.
///
/// Returns a complete new snapshot and whether anything changed. Structurally
/// identical inputs short-circuit without copying fields.
pub fn patch<T: Registration>(existing: &T, incoming: &T) -> (T, bool) {
    let mut result = existing.clone();
    if existing.is_structurally_same(incoming) {
        return (result, false);
    }
    let changed = result.apply_patch(incoming);
    (result, changed)
}

/// Case-insensitive URI comparison.
pub fn uri_eq(a: &str, b: &str) -> bool {
    fold_case(a) == fold_case(b)
}

/// Unordered comparison.
pub fn set_eq<T: Eq + Hash>(a: &[T], b: &[T]) -> bool {
    a.iter().collect::<HashSet<_>>() == b.iter().collect::<HashSet<_>>()
}

/// Unordered, case-insensitive comparison of strings.
pub fn set_eq_ignore_case(a: &[String], b: &[String]) -> bool {
    let lower = |items: &[String]| {
        items
            .iter()
            .map(|s| fold_case(s))
            .collect::<HashSet<_>>()
    };
    lower(a) == lower(b)
}

/// Ordered comparison.
pub fn seq_eq<T: PartialEq>(a: &[T], b: &[T]) -> bool {
    a == b
}

/// Key-by-key comparison of two maps.
pub fn map_eq<V: PartialEq>(a: &BTreeMap<String, V>, b: &BTreeMap<String, V>) -> bool {
    a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
}

/// Compare two optional fields with `eq`, treating two `None`s as equal.
pub fn opt_eq<T>(a: &Option<T>, b: &Option<T>, eq: impl Fn(&T, &T) -> bool) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => eq(a, b),
        _ => false,
    }
}

/// Overwrite `target` when `incoming` is specified. Returns whether it changed.
pub fn overwrite<T: Clone + PartialEq>(target: &mut Option<T>, incoming: &Option<T>) -> bool {
    match incoming {
        Some(value) if target.as_ref() != Some(value) => {
            *target = Some(value.clone());
            true
        }
        _ => false,
    }
}

/// Apply property updates to a map. A null value removes the key.
///
/// Returns whether the map changed.
pub fn apply_properties(target: &mut PropertyMap, updates: &PropertyMap) -> bool {
    let mut changed = false;
    for (key, value) in updates {
        if value.is_null() {
            changed |= target.remove(key).is_some();
        } else if target.get(key) != Some(value) {
            target.insert(key.clone(), value.clone());
            changed = true;
        }
    }
    changed
}
