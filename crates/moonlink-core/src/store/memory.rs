// ── In-memory state tree ──
//
// Lock-free storage with push-based change notification. Every mutation
// bumps a version counter on a `watch` channel; value changes are also
// broadcast individually so a consumer can print them as they happen.

use chrono::Utc;
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use tokio::sync::{broadcast, watch};

use super::{StateEntry, StateMeta, StateStore, StateValue, WriteIntent};

const CHANGE_CHANNEL_SIZE: usize = 1024;
const INTENT_CHANNEL_SIZE: usize = 64;

/// A value change as observed by consumers of the store.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub path: String,
    pub value: StateValue,
    pub ack: bool,
}

/// `DashMap`-backed [`StateStore`].
pub struct MemoryStore {
    channels: DashMap<String, String>,
    states: DashMap<String, StateEntry>,
    subscribed: DashSet<String>,
    intents: broadcast::Sender<WriteIntent>,
    changes: broadcast::Sender<StateChange>,
    version: watch::Sender<u64>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (intents, _) = broadcast::channel(INTENT_CHANNEL_SIZE);
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_SIZE);
        let (version, _) = watch::channel(0u64);
        Self {
            channels: DashMap::new(),
            states: DashMap::new(),
            subscribed: DashSet::new(),
            intents,
            changes,
            version,
        }
    }

    /// Write on behalf of an external party (`ack = false`), as a user
    /// flipping a control in the host platform would.
    pub fn request_write(&self, path: &str, value: StateValue) -> bool {
        self.write_value(path, value, false)
    }

    /// Look up a single state.
    pub fn get(&self, path: &str) -> Option<StateEntry> {
        self.states.get(path).map(|e| e.value().clone())
    }

    /// Label of a channel, if it exists.
    pub fn channel(&self, path: &str) -> Option<String> {
        self.channels.get(path).map(|e| e.value().clone())
    }

    /// All states, sorted by path.
    pub fn snapshot(&self) -> Vec<StateEntry> {
        let mut entries: Vec<StateEntry> = self.states.iter().map(|e| e.value().clone()).collect();
        entries.sort_by(|a, b| a.path.cmp(&b.path));
        entries
    }

    /// All channels as `(path, label)`, sorted by path.
    pub fn channels(&self) -> Vec<(String, String)> {
        let mut channels: Vec<(String, String)> = self
            .channels
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        channels.sort();
        channels
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn is_subscribed(&self, path: &str) -> bool {
        self.subscribed.contains(path)
    }

    /// Subscribe to individual value changes.
    pub fn changes(&self) -> broadcast::Receiver<StateChange> {
        self.changes.subscribe()
    }

    /// Subscribe to the mutation counter.
    pub fn version(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    fn bump_version(&self) {
        self.version.send_modify(|v| *v += 1);
    }
}

impl StateStore for MemoryStore {
    fn ensure_channel(&self, path: &str, label: &str) {
        if !self.channels.contains_key(path) {
            self.channels.insert(path.to_owned(), label.to_owned());
            self.bump_version();
        }
    }

    fn upsert_state(&self, path: &str, meta: &StateMeta) {
        self.states
            .entry(path.to_owned())
            .and_modify(|e| e.meta = meta.clone())
            .or_insert_with(|| StateEntry {
                path: path.to_owned(),
                value: None,
                ack: true,
                meta: meta.clone(),
                updated_at: None,
            });
        self.bump_version();
    }

    fn write_value(&self, path: &str, value: StateValue, ack: bool) -> bool {
        let changed = {
            let mut guard = self.states.entry(path.to_owned()).or_insert_with(|| {
                tracing::debug!(path, "value written before metadata, inferring");
                StateEntry {
                    path: path.to_owned(),
                    value: None,
                    ack,
                    meta: StateMeta::inferred(
                        path.rsplit('.').next().unwrap_or(path),
                        &Value::Null,
                    ),
                    updated_at: None,
                }
            });
            let entry = guard.value_mut();

            if entry.value.as_ref() == Some(&value) && entry.ack == ack {
                false
            } else {
                entry.value = Some(value.clone());
                entry.ack = ack;
                entry.updated_at = Some(Utc::now());
                true
            }
        };

        if changed {
            self.bump_version();
            let _ = self.changes.send(StateChange {
                path: path.to_owned(),
                value: value.clone(),
                ack,
            });
        }

        // Every external write is a request, even if it repeats the last one.
        if !ack && self.subscribed.contains(path) {
            let _ = self.intents.send(WriteIntent {
                path: path.to_owned(),
                value,
            });
        }
        changed
    }

    fn subscribe_writable_changes(&self, path: &str) {
        self.subscribed.insert(path.to_owned());
    }

    fn write_intents(&self) -> broadcast::Receiver<WriteIntent> {
        self.intents.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::ValueType;

    fn meta(name: &str) -> StateMeta {
        StateMeta {
            name: name.into(),
            value_type: ValueType::Number,
            role: "value.temperature".into(),
            unit: "°C".into(),
            readable: true,
            writable: false,
        }
    }

    #[test]
    fn unchanged_writes_are_elided() {
        let store = MemoryStore::new();
        store.upsert_state("extruder.temperature", &meta("temperature"));
        let mut changes = store.changes();

        assert!(store.write_value("extruder.temperature", StateValue::Number(210.0), true));
        assert!(!store.write_value("extruder.temperature", StateValue::Number(210.0), true));
        assert!(store.write_value("extruder.temperature", StateValue::Number(211.0), true));

        assert_eq!(changes.try_recv().unwrap().value, StateValue::Number(210.0));
        assert_eq!(changes.try_recv().unwrap().value, StateValue::Number(211.0));
        assert!(changes.try_recv().is_err());
    }

    #[test]
    fn ack_flip_counts_as_change() {
        let store = MemoryStore::new();
        assert!(store.write_value("control.printPause", StateValue::Bool(true), false));
        assert!(store.write_value("control.printPause", StateValue::Bool(true), true));
        assert!(store.get("control.printPause").unwrap().ack);
    }

    #[test]
    fn intents_only_for_unacked_writes_on_subscribed_paths() {
        let store = MemoryStore::new();
        let mut intents = store.write_intents();

        store.request_write("control.printPause", StateValue::Bool(true));
        assert!(intents.try_recv().is_err(), "not subscribed yet");

        store.subscribe_writable_changes("control.printCancel");
        store.write_value("control.printCancel", StateValue::Bool(false), true);
        assert!(intents.try_recv().is_err(), "acknowledged write");

        store.request_write("control.printCancel", StateValue::Bool(true));
        let intent = intents.try_recv().unwrap();
        assert_eq!(intent.path, "control.printCancel");
        assert_eq!(intent.value, StateValue::Bool(true));

        // Pressing again without an acknowledgement in between still asks.
        assert!(!store.request_write("control.printCancel", StateValue::Bool(true)));
        assert!(intents.try_recv().is_ok());
    }

    #[test]
    fn channels_are_created_once() {
        let store = MemoryStore::new();
        let version = store.version();
        store.ensure_channel("extruder", "extruder");
        store.ensure_channel("extruder", "renamed");
        assert_eq!(store.channel("extruder").as_deref(), Some("extruder"));
        assert_eq!(*version.borrow(), 1);
    }

    #[test]
    fn upsert_keeps_value() {
        let store = MemoryStore::new();
        store.upsert_state("heater_bed.target", &meta("target"));
        store.write_value("heater_bed.target", StateValue::Number(60.0), true);
        let mut updated = meta("target");
        updated.role = "level.temperature".into();
        store.upsert_state("heater_bed.target", &updated);

        let entry = store.get("heater_bed.target").unwrap();
        assert_eq!(entry.value, Some(StateValue::Number(60.0)));
        assert_eq!(entry.meta.role, "level.temperature");
    }

    #[test]
    fn snapshot_is_sorted() {
        let store = MemoryStore::new();
        store.write_value("toolhead.position", StateValue::Text("[0,0,0,0]".into()), true);
        store.write_value("extruder.target", StateValue::Number(0.0), true);
        let paths: Vec<String> = store.snapshot().into_iter().map(|e| e.path).collect();
        assert_eq!(paths, vec!["extruder.target", "toolhead.position"]);
        assert_eq!(store.len(), 2);
    }
}
