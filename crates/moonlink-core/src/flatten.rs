// ── Tree flattening ──
//
// Turns arbitrarily nested JSON into dotted-path channels and leaves.
// `plan` is pure: it only decides the shape. `Flattener::flatten`
// materializes a plan into a `StateStore`, applying attribute metadata,
// rounding, metadata dedup and liveness timers.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::attributes;
use crate::liveness::LivenessTracker;
use crate::round;
use crate::store::{StateMeta, StateStore, StateValue};

/// Naming switches for channels built from nested objects.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlattenOptions {
    /// Label channels with the child's `name` field.
    pub rename_from_child: bool,
    /// Build channel paths from the child's `id` field.
    pub reid_from_child: bool,
}

/// One step of a flatten plan.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeOp {
    Channel { path: String, label: String },
    Leaf { path: String, name: String, value: Value },
}

// ── Planning ─────────────────────────────────────────────────────────

/// Classify every member of `node` below `parent`.
///
/// Non-empty objects become channels and are descended into. Empty
/// objects and empty arrays are skipped. Everything else is a leaf;
/// non-empty arrays are carried as their serialized JSON text. A `node`
/// that is not an object yields nothing.
pub fn plan(node: &Value, parent: Option<&str>, opts: FlattenOptions) -> Vec<TreeOp> {
    let mut ops = Vec::new();
    if let Value::Object(map) = node {
        plan_object(map, parent, opts, &mut ops);
    }
    ops
}

fn plan_object(map: &Map<String, Value>, parent: Option<&str>, opts: FlattenOptions, ops: &mut Vec<TreeOp>) {
    for (key, child) in map {
        match child {
            Value::Object(inner) if inner.is_empty() => {
                debug!(key = %key, "empty object skipped");
            }
            Value::Array(items) if items.is_empty() => {
                debug!(key = %key, "empty array skipped");
            }
            Value::Object(inner) => {
                let segment = if opts.reid_from_child {
                    child_id(inner).unwrap_or_else(|| key.clone())
                } else {
                    key.clone()
                };
                let label = if opts.rename_from_child {
                    child_name(inner).unwrap_or_else(|| key.clone())
                } else {
                    key.clone()
                };
                let path = join(parent, &segment);
                ops.push(TreeOp::Channel {
                    path: path.clone(),
                    label,
                });
                plan_object(inner, Some(&path), opts, ops);
            }
            Value::Array(_) => ops.push(TreeOp::Leaf {
                path: join(parent, key),
                name: key.clone(),
                value: Value::String(child.to_string()),
            }),
            _ => ops.push(TreeOp::Leaf {
                path: join(parent, key),
                name: key.clone(),
                value: child.clone(),
            }),
        }
    }
}

fn join(parent: Option<&str>, segment: &str) -> String {
    match parent {
        Some(parent) if !parent.is_empty() => format!("{parent}.{segment}"),
        _ => segment.to_owned(),
    }
}

fn child_name(map: &Map<String, Value>) -> Option<String> {
    map.get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

fn child_id(map: &Map<String, Value>) -> Option<String> {
    match map.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ── Materialization ──────────────────────────────────────────────────

/// Counters for one `flatten` call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlattenReport {
    pub channels: usize,
    pub leaves: usize,
    /// Leaves whose metadata was created or changed.
    pub metadata_updates: usize,
    /// Leaves whose value changed in the store.
    pub values_changed: usize,
    /// Names reported as missing an attribute definition by this call.
    pub missing_definitions: Vec<String>,
}

/// Materializes plans into a store.
///
/// Keeps the last metadata applied per path, so repeated documents don't
/// rewrite metadata, and the set of names already reported as undefined.
#[derive(Debug)]
pub struct Flattener {
    applied: HashMap<String, StateMeta>,
    reported_missing: HashSet<String>,
    subscribed: HashSet<String>,
    liveness_timeout: Duration,
}

impl Flattener {
    pub fn new(liveness_timeout: Duration) -> Self {
        Self {
            applied: HashMap::new(),
            reported_missing: HashSet::new(),
            subscribed: HashSet::new(),
            liveness_timeout,
        }
    }

    /// Flatten `node` below `parent` into `store`.
    pub fn flatten(
        &mut self,
        store: &dyn StateStore,
        liveness: &mut LivenessTracker,
        node: &Value,
        parent: Option<&str>,
        opts: FlattenOptions,
    ) -> FlattenReport {
        let mut report = FlattenReport::default();
        for op in plan(node, parent, opts) {
            match op {
                TreeOp::Channel { path, label } => {
                    store.ensure_channel(&path, &label);
                    report.channels += 1;
                }
                TreeOp::Leaf { path, name, value } => {
                    report.leaves += 1;
                    self.apply_leaf(store, liveness, &path, &name, &value, &mut report);
                }
            }
        }
        report
    }

    fn apply_leaf(
        &mut self,
        store: &dyn StateStore,
        liveness: &mut LivenessTracker,
        path: &str,
        name: &str,
        value: &Value,
        report: &mut FlattenReport,
    ) {
        let def = attributes::lookup(name);
        let meta = match def {
            Some(def) => def.meta(),
            None => {
                if self.reported_missing.insert(name.to_owned()) {
                    warn!(attribute = name, path, value = %value, "state attribute definition missing");
                    report.missing_definitions.push(name.to_owned());
                }
                StateMeta::inferred(name, value)
            }
        };

        if self.applied.get(path) != Some(&meta) {
            store.upsert_state(path, &meta);
            report.metadata_updates += 1;
            self.applied.insert(path.to_owned(), meta.clone());
        }

        if let Some(state) = StateValue::from_json(value) {
            let state = match def.and_then(|d| d.rounding) {
                Some(precision) => round::round(&state, precision),
                None => state,
            };
            if store.write_value(path, state, true) {
                report.values_changed += 1;
            }
        }

        if def.is_some_and(|d| d.liveness) {
            liveness.arm(path, self.liveness_timeout, StateValue::Bool(false));
        }

        if meta.writable && self.subscribed.insert(path.to_owned()) {
            store.subscribe_writable_changes(path);
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;

    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::sync::broadcast;

    use super::*;
    use crate::store::{MemoryStore, ValueType, WriteIntent};

    // ── Planning ──

    fn paths(ops: &[TreeOp]) -> Vec<&str> {
        ops.iter()
            .map(|op| match op {
                TreeOp::Channel { path, .. } | TreeOp::Leaf { path, .. } => path.as_str(),
            })
            .collect()
    }

    #[test]
    fn nested_objects_become_dotted_paths() {
        let ops = plan(&json!({"temp": {"core": {"value": 5}}}), None, FlattenOptions::default());
        assert_eq!(
            ops,
            vec![
                TreeOp::Channel { path: "temp".into(), label: "temp".into() },
                TreeOp::Channel { path: "temp.core".into(), label: "core".into() },
                TreeOp::Leaf { path: "temp.core.value".into(), name: "value".into(), value: json!(5) },
            ]
        );
    }

    #[test]
    fn empty_structures_are_skipped() {
        let ops = plan(&json!({"fan": {}, "objects": [], "speed": 0.5}), None, FlattenOptions::default());
        assert_eq!(paths(&ops), vec!["speed"]);
    }

    #[test]
    fn arrays_are_serialized_leaves() {
        let ops = plan(&json!({"toolhead": {"position": [1.0, 2.5, 3.0, 0.0]}}), None, FlattenOptions::default());
        assert_eq!(
            ops[1],
            TreeOp::Leaf {
                path: "toolhead.position".into(),
                name: "position".into(),
                value: Value::String("[1.0,2.5,3.0,0.0]".into()),
            }
        );
    }

    #[test]
    fn parent_prefixes_every_path() {
        let ops = plan(&json!({"state": "ready"}), Some("printer"), FlattenOptions::default());
        assert_eq!(paths(&ops), vec!["printer.state"]);
    }

    #[test]
    fn rename_and_reid_from_child() {
        let doc = json!({"0": {"id": "spool_7", "name": "PLA Galaxy Black", "remaining": 812.4}});
        let opts = FlattenOptions {
            rename_from_child: true,
            reid_from_child: true,
        };
        let ops = plan(&doc, Some("spools"), opts);
        assert_eq!(
            ops[0],
            TreeOp::Channel {
                path: "spools.spool_7".into(),
                label: "PLA Galaxy Black".into()
            }
        );
        assert!(paths(&ops).contains(&"spools.spool_7.remaining"));
    }

    #[test]
    fn reid_falls_back_to_key_without_id() {
        let opts = FlattenOptions {
            rename_from_child: false,
            reid_from_child: true,
        };
        let ops = plan(&json!({"extruder": {"temperature": 200}}), None, opts);
        assert_eq!(paths(&ops), vec!["extruder", "extruder.temperature"]);
    }

    #[test]
    fn non_object_node_yields_nothing() {
        assert!(plan(&json!(12.5), None, FlattenOptions::default()).is_empty());
    }

    // ── Materialization ──

    /// Store that records every call, in order.
    #[derive(Default)]
    struct RecordingStore {
        calls: Mutex<Vec<String>>,
        inner: MemoryStore,
    }

    impl RecordingStore {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.calls.lock().unwrap())
        }
    }

    impl StateStore for RecordingStore {
        fn ensure_channel(&self, path: &str, label: &str) {
            self.calls.lock().unwrap().push(format!("channel {path}"));
            self.inner.ensure_channel(path, label);
        }
        fn upsert_state(&self, path: &str, meta: &StateMeta) {
            self.calls.lock().unwrap().push(format!("upsert {path}"));
            self.inner.upsert_state(path, meta);
        }
        fn write_value(&self, path: &str, value: StateValue, ack: bool) -> bool {
            self.calls.lock().unwrap().push(format!("write {path}={value}"));
            self.inner.write_value(path, value, ack)
        }
        fn subscribe_writable_changes(&self, path: &str) {
            self.calls.lock().unwrap().push(format!("subscribe {path}"));
            self.inner.subscribe_writable_changes(path);
        }
        fn write_intents(&self) -> broadcast::Receiver<WriteIntent> {
            self.inner.write_intents()
        }
    }

    fn flattener() -> Flattener {
        Flattener::new(Duration::from_secs(20))
    }

    #[tokio::test]
    async fn second_identical_document_skips_metadata() {
        let store = RecordingStore::default();
        let mut liveness = LivenessTracker::new();
        let mut f = flattener();
        let doc = json!({"extruder": {"temperature": 210.04, "target": 210.0}});

        let first = f.flatten(&store, &mut liveness, &doc, None, FlattenOptions::default());
        assert_eq!(first.metadata_updates, 2);
        assert_eq!(first.values_changed, 2);
        store.take();

        let second = f.flatten(&store, &mut liveness, &doc, None, FlattenOptions::default());
        assert_eq!(second.metadata_updates, 0);
        assert_eq!(second.values_changed, 0);
        assert_eq!(
            store.take(),
            vec![
                "channel extruder",
                "write extruder.target=210",
                "write extruder.temperature=210",
            ],
            "values are still offered on every pass"
        );
    }

    #[tokio::test]
    async fn unknown_names_get_defaults_and_one_warning() {
        let store = RecordingStore::default();
        let mut liveness = LivenessTracker::new();
        let mut f = flattener();

        let report = f.flatten(
            &store,
            &mut liveness,
            &json!({"bed_mesh": {"profile_name": "default"}, "probe": {"profile_name": "x"}}),
            None,
            FlattenOptions::default(),
        );
        assert_eq!(report.missing_definitions, vec!["profile_name".to_owned()]);

        let entry = store.inner.get("bed_mesh.profile_name").unwrap();
        assert_eq!(entry.meta.value_type, ValueType::String);
        assert_eq!(entry.meta.role, "state");
        assert_eq!(entry.meta.unit, "");
        assert!(!entry.meta.writable);

        let again = f.flatten(
            &store,
            &mut liveness,
            &json!({"bed_mesh": {"profile_name": "other"}}),
            None,
            FlattenOptions::default(),
        );
        assert!(again.missing_definitions.is_empty());
    }

    #[tokio::test]
    async fn rounding_applies_from_attribute_table() {
        let store = MemoryStore::new();
        let mut liveness = LivenessTracker::new();
        let mut f = flattener();
        f.flatten(
            &store,
            &mut liveness,
            &json!({"virtual_sdcard": {"progress": 0.123_456}, "heater_bed": {"temperature": "59.96"}}),
            None,
            FlattenOptions::default(),
        );
        assert_eq!(store.get("virtual_sdcard.progress").unwrap().value, Some(StateValue::Number(0.123)));
        assert_eq!(store.get("heater_bed.temperature").unwrap().value, Some(StateValue::Number(60.0)));
    }

    #[tokio::test]
    async fn null_values_create_state_without_writing() {
        let store = RecordingStore::default();
        let mut liveness = LivenessTracker::new();
        let mut f = flattener();
        f.flatten(&store, &mut liveness, &json!({"print_stats": {"filename": null}}), None, FlattenOptions::default());

        assert_eq!(store.take(), vec!["channel print_stats", "upsert print_stats.filename"]);
        assert_eq!(store.inner.get("print_stats.filename").unwrap().value, None);
    }

    #[tokio::test(start_paused = true)]
    async fn liveness_leaf_arms_timer() {
        let store = MemoryStore::new();
        let mut liveness = LivenessTracker::new();
        let mut f = Flattener::new(Duration::from_secs(2));

        f.flatten(&store, &mut liveness, &json!({"klippy_connected": true}), None, FlattenOptions::default());
        assert!(liveness.is_armed("klippy_connected"));

        let expiry = liveness.next_expiry().await;
        assert!(liveness.expire(&expiry, &store));
        assert_eq!(store.get("klippy_connected").unwrap().value, Some(StateValue::Bool(false)));

        // A fresh update rearms and restores the value.
        f.flatten(&store, &mut liveness, &json!({"klippy_connected": true}), None, FlattenOptions::default());
        assert!(liveness.is_armed("klippy_connected"));
        assert_eq!(store.get("klippy_connected").unwrap().value, Some(StateValue::Bool(true)));
    }

    #[tokio::test]
    async fn metadata_change_triggers_upsert() {
        let store = RecordingStore::default();
        let mut liveness = LivenessTracker::new();
        let mut f = flattener();

        f.flatten(&store, &mut liveness, &json!({"mystery": 1}), None, FlattenOptions::default());
        store.take();
        // Same unknown name, different inferred type.
        f.flatten(&store, &mut liveness, &json!({"mystery": "one"}), None, FlattenOptions::default());
        assert_eq!(store.take(), vec!["upsert mystery", "write mystery=one"]);
    }
}
