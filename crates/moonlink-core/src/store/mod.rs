// ── State tree storage ──
//
// The live link never owns the state tree. It talks to whatever hosts the
// tree through `StateStore`; `MemoryStore` is the implementation the CLI
// and the tests run against.

mod memory;

pub use memory::{MemoryStore, StateChange};

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

// ── Values ───────────────────────────────────────────────────────────

/// A typed scalar, or a serialized structure stored as text.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StateValue {
    Bool(bool),
    Number(f64),
    Text(String),
}

impl StateValue {
    /// Convert a JSON leaf. `null` has no state value; arrays and objects
    /// are serialized to their JSON text.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(Self::Bool(*b)),
            Value::Number(n) => n.as_f64().map(Self::Number),
            Value::String(s) => Some(Self::Text(s.clone())),
            Value::Array(_) | Value::Object(_) => Some(Self::Text(value.to_string())),
        }
    }

    /// The type a state holding this value would be declared with.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::Bool(_) => ValueType::Boolean,
            Self::Number(_) => ValueType::Number,
            Self::Text(_) => ValueType::String,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }
}

impl fmt::Display for StateValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Declared type of a state.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, strum::Display, strum::EnumString, strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ValueType {
    Boolean,
    Number,
    String,
    /// No value seen yet (`null`) or a value of no fixed type.
    Mixed,
}

impl ValueType {
    /// Infer a declared type from a raw JSON leaf.
    pub fn infer(value: &Value) -> Self {
        StateValue::from_json(value).map_or(Self::Mixed, |v| v.value_type())
    }
}

// ── Metadata ─────────────────────────────────────────────────────────

/// Descriptive metadata of a state. Compared field by field to decide
/// whether an upsert is needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateMeta {
    pub name: String,
    pub value_type: ValueType,
    pub role: String,
    pub unit: String,
    pub readable: bool,
    pub writable: bool,
}

impl StateMeta {
    /// Defaults for a name with no attribute definition.
    pub fn inferred(name: &str, value: &Value) -> Self {
        Self {
            name: name.to_owned(),
            value_type: ValueType::infer(value),
            role: "state".into(),
            unit: String::new(),
            readable: true,
            writable: false,
        }
    }
}

/// One addressable state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateEntry {
    pub path: String,
    pub value: Option<StateValue>,
    pub ack: bool,
    pub meta: StateMeta,
    pub updated_at: Option<DateTime<Utc>>,
}

/// A write requested by someone other than the bridge (`ack = false`) on
/// a path the bridge subscribed to.
#[derive(Debug, Clone, PartialEq)]
pub struct WriteIntent {
    pub path: String,
    pub value: StateValue,
}

// ── Collaborator interface ───────────────────────────────────────────

/// Primitives the bridge needs from the host of the state tree.
///
/// All methods are synchronous and must not block for long; they are
/// called from the session's event loop.
pub trait StateStore: Send + Sync + 'static {
    /// Create a structural node at `path` unless one exists.
    fn ensure_channel(&self, path: &str, label: &str);

    /// Create the state at `path` or replace its metadata.
    fn upsert_state(&self, path: &str, meta: &StateMeta);

    /// Write a value. Returns `false` when the stored value and ack flag
    /// already match and nothing changed.
    fn write_value(&self, path: &str, value: StateValue, ack: bool) -> bool;

    /// Report future unacknowledged writes to `path` as write intents.
    fn subscribe_writable_changes(&self, path: &str);

    /// Stream of write intents on subscribed paths.
    fn write_intents(&self) -> broadcast::Receiver<WriteIntent>;
}
