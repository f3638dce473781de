//! Per-run collection of live channels, keyed by name.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::{Channel, ChannelDef, ChannelView, ChannelWrite};
use crate::types::ChannelName;

/// Owns every channel live for one run. Created from the graph's
/// `channelDefs` at run start; each channel guarded by its own lock so
/// concurrently-dispatched tasks never contend on a single global lock.
#[derive(Clone)]
pub struct ChannelManager {
    channels: FxHashMap<ChannelName, Arc<RwLock<Channel>>>,
}

impl ChannelManager {
    pub fn from_defs(defs: &FxHashMap<ChannelName, ChannelDef>) -> Self {
        let channels = defs
            .iter()
            .map(|(name, def)| (name.clone(), Arc::new(RwLock::new(Channel::new(name.clone(), def)))))
            .collect();
        Self { channels }
    }

    /// Ensures a channel with the given definition exists, inserting it if
    /// absent. Used when a branch/join target introduces a channel the
    /// graph compiler derived (e.g. a deterministic join channel name)
    /// that was not declared up front.
    pub fn ensure(&mut self, name: ChannelName, def: &ChannelDef) {
        self.channels
            .entry(name.clone())
            .or_insert_with(|| Arc::new(RwLock::new(Channel::new(name, def))));
    }

    pub fn get(&self, name: &ChannelName) -> Option<Arc<RwLock<Channel>>> {
        self.channels.get(name).cloned()
    }

    pub fn contains(&self, name: &ChannelName) -> bool {
        self.channels.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &ChannelName> {
        self.channels.keys()
    }

    /// Applies one write to the named channel, returning whether it
    /// changed. No-op (returns `false`) if the channel does not exist.
    pub fn update(&self, name: &ChannelName, write: ChannelWrite, step: u64) -> bool {
        match self.channels.get(name) {
            Some(channel) => channel.write().update(write, step),
            None => false,
        }
    }

    pub fn version_of(&self, name: &ChannelName) -> u64 {
        self.channels.get(name).map(|c| c.read().version()).unwrap_or(0)
    }

    pub fn is_available(&self, name: &ChannelName) -> bool {
        self.channels.get(name).map(|c| c.read().is_available()).unwrap_or(false)
    }

    pub fn behavior_of(&self, name: &ChannelName) -> Option<super::ChannelBehaviorKind> {
        self.channels.get(name).map(|c| c.read().behavior())
    }

    /// Whether the named channel is a satisfied Barrier, i.e. every
    /// expected sender has written. `false` for any other behavior or for
    /// an unknown channel.
    pub fn barrier_satisfied(&self, name: &ChannelName) -> bool {
        self.channels.get(name).map(|c| c.read().barrier_satisfied()).unwrap_or(false)
    }

    pub fn acknowledge(&self, name: &ChannelName) {
        if let Some(channel) = self.channels.get(name) {
            channel.write().acknowledge();
        }
    }

    pub fn consume(&self, name: &ChannelName) -> Option<serde_json::Value> {
        self.channels.get(name).and_then(|c| c.write().consume())
    }

    pub fn with_view<R>(&self, name: &ChannelName, f: impl FnOnce(ChannelView<'_>) -> R) -> Option<R> {
        self.channels.get(name).map(|c| f(c.read().get()))
    }

    /// Snapshot of every channel's current version, for writing into a
    /// checkpoint's `channelVersions`.
    pub fn all_versions(&self) -> FxHashMap<String, u64> {
        self.channels
            .iter()
            .map(|(name, c)| (name.as_str().to_string(), c.read().version()))
            .collect()
    }

    /// Snapshot of every Barrier channel's seen-sender set, for
    /// `checkpoint.barrierSets`.
    pub fn all_barrier_sets(&self) -> FxHashMap<String, Vec<String>> {
        self.channels
            .iter()
            .filter_map(|(name, c)| {
                let guard = c.read();
                if guard.barrier_seen().is_empty() {
                    None
                } else {
                    Some((name.as_str().to_string(), guard.barrier_seen().iter().cloned().collect()))
                }
            })
            .collect()
    }

    /// Names of channels updated during `step` — used for a checkpoint's
    /// `updatedChannels`.
    pub fn updated_in_step(&self, step: u64) -> Vec<String> {
        self.channels
            .iter()
            .filter(|(_, c)| c.read().is_updated_in_step(step))
            .map(|(name, _)| name.as_str().to_string())
            .collect()
    }

    /// Restores per-channel versions and barrier-seen sets from a resumed
    /// checkpoint.
    pub fn restore_from(&self, versions: &FxHashMap<String, u64>, barrier_sets: &FxHashMap<String, Vec<String>>) {
        for (name, channel) in &self.channels {
            let mut guard = channel.write();
            let version = versions.get(name.as_str()).copied().unwrap_or(0);
            let seen: BTreeSet<String> = barrier_sets
                .get(name.as_str())
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .collect();
            guard.restore_runtime(version, seen);
        }
    }

    /// Clears the end-of-step mark on every channel whose Ephemeral
    /// behavior requires auto-consume after a producing step (spec §4.2
    /// Open Question, resolved in `DESIGN.md`: Ephemeral channels are
    /// consumed automatically at end-of-step).
    pub fn consume_ephemeral_after_step(&self, step: u64) {
        for channel in self.channels.values() {
            let mut guard = channel.write();
            if guard.behavior() == super::ChannelBehaviorKind::Ephemeral && guard.is_updated_in_step(step) {
                guard.consume();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn defs() -> FxHashMap<ChannelName, ChannelDef> {
        let mut m = FxHashMap::default();
        m.insert(ChannelName::from("a"), ChannelDef::last_value());
        m
    }

    #[test]
    fn update_and_read_round_trips() {
        let manager = ChannelManager::from_defs(&defs());
        assert!(manager.update(&ChannelName::from("a"), ChannelWrite::Value(json!(42)), 1));
        assert_eq!(manager.version_of(&ChannelName::from("a")), 1);
    }

    #[test]
    fn unknown_channel_update_is_noop() {
        let manager = ChannelManager::from_defs(&defs());
        assert!(!manager.update(&ChannelName::from("missing"), ChannelWrite::Value(json!(1)), 1));
    }
}
