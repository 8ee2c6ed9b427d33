//! Live-link subsystem of the moonlink workspace.
//!
//! Keeps a Moonraker instance mirrored into a state tree:
//!
//! - **[`Bridge`]** — Runs one session: authenticates, opens the websocket
//!   (or polls over REST), bootstraps printer/server/object state,
//!   reconnects on a fixed delay and refreshes tokens. Observable through
//!   [`ConnectionState`] and [`LinkNotice`].
//!
//! - **[`Correlator`]** — Matches JSON-RPC replies to pending requests and
//!   routes notifications by method.
//!
//! - **[`Flattener`]** — Turns nested JSON into dotted-path channels and
//!   leaves with attribute metadata, rounding and metadata dedup.
//!
//! - **[`LivenessTracker`]** — Expiry timers that force stale indicators to
//!   a fallback value.
//!
//! - **[`CommandDispatcher`]** — Maps writes on `control.*` states to
//!   Moonraker command endpoints.
//!
//! - **[`StateStore`]** — The interface to whatever hosts the state tree;
//!   [`MemoryStore`] is the in-process implementation.

pub mod attributes;
pub mod command;
pub mod config;
pub mod correlator;
pub mod error;
pub mod flatten;
pub mod liveness;
pub mod round;
pub mod session;
pub mod store;
mod timer;

// ── Primary re-exports ──────────────────────────────────────────────
pub use command::{CommandDispatcher, ControlCommand, DispatchOutcome, CONTROL_CHANNEL};
pub use config::{AuthSettings, BridgeConfig, TransportMode};
pub use correlator::{Correlator, Inbound, PendingRequest};
pub use error::CoreError;
pub use flatten::{FlattenOptions, FlattenReport, Flattener, TreeOp};
pub use liveness::{Expiry, LivenessTracker};
pub use round::{Precision, round};
pub use session::{Bridge, CONNECTION_PATH, ConnectionState, LinkNotice};
pub use store::{
    MemoryStore, StateChange, StateEntry, StateMeta, StateStore, StateValue, ValueType, WriteIntent,
};

// The wire types consumers need alongside the core ones.
pub use moonlink_api::{HeartbeatConfig, TlsMode};
