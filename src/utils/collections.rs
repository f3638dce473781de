//! Small collection helpers shared across the state/channel/checkpoint
//! layers, all built on `rustc_hash::FxHashMap` to match the teacher's
//! pervasive hashmap choice for non-adversarial, in-process keys.

use rustc_hash::FxHashMap;

/// Constructs an empty `FxHashMap`, for call sites that prefer a function
/// over `FxHashMap::default()` at a type-inference boundary.
pub fn new_map<K, V>() -> FxHashMap<K, V> {
    FxHashMap::default()
}

/// Merges `update` into `base`, with `update`'s values winning on key
/// collision. Used by the map-merge reducer and by barrier seen-set unions.
pub fn merge_into<K, V>(base: &mut FxHashMap<K, V>, update: FxHashMap<K, V>)
where
    K: std::hash::Hash + Eq,
{
    for (k, v) in update {
        base.insert(k, v);
    }
}
