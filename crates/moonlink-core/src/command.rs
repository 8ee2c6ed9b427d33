// ── Control commands ──
//
// The `control` channel exposes a handful of writable states. An
// unacknowledged write to one of them is a request to run the matching
// Moonraker endpoint; the dispatcher makes that call and reports how it
// went.

use secrecy::SecretString;
use serde_json::Value;
use strum::IntoEnumIterator;
use tracing::{debug, error, info};

use moonlink_api::MoonrakerClient;

use crate::config::{AuthSettings, BridgeConfig};
use crate::error::CoreError;
use crate::store::{StateMeta, StateStore, StateValue, ValueType};

/// Channel holding the control states.
pub const CONTROL_CHANNEL: &str = "control";

/// A control state and the endpoint behind it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString, strum::EnumIter, strum::IntoStaticStr,
)]
#[strum(serialize_all = "camelCase")]
pub enum ControlCommand {
    EmergencyStop,
    PrintCancel,
    PrintPause,
    PrintResume,
    RestartFirmware,
    RestartHost,
    RestartServer,
    SystemReboot,
    SystemShutdown,
    RunGcode,
}

impl ControlCommand {
    /// State id below the control channel, e.g. `printPause`.
    pub fn state_id(self) -> &'static str {
        self.into()
    }

    /// Full state path, e.g. `control.printPause`.
    pub fn path(self) -> String {
        format!("{CONTROL_CHANNEL}.{}", self.state_id())
    }

    /// Parse a full state path.
    pub fn from_path(path: &str) -> Option<Self> {
        path.strip_prefix(CONTROL_CHANNEL)?
            .strip_prefix('.')?
            .parse()
            .ok()
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::EmergencyStop => "Emergency Stop",
            Self::PrintCancel => "Cancel current printing",
            Self::PrintPause => "Pause current printing",
            Self::PrintResume => "Resume current printing",
            Self::RestartFirmware => "Restart Firmware",
            Self::RestartHost => "Restart Host",
            Self::RestartServer => "Restart Server",
            Self::SystemReboot => "Reboot the system",
            Self::SystemShutdown => "Shutdown the system",
            Self::RunGcode => "Run G-code",
        }
    }

    /// REST endpoint the command posts to.
    pub fn endpoint(self) -> &'static str {
        match self {
            Self::EmergencyStop => "/printer/emergency_stop",
            Self::PrintCancel => "/printer/print/cancel",
            Self::PrintPause => "/printer/print/pause",
            Self::PrintResume => "/printer/print/resume",
            Self::RestartFirmware => "/printer/firmware_restart",
            Self::RestartHost => "/printer/restart",
            Self::RestartServer => "/server/restart",
            Self::SystemReboot => "/machine/reboot",
            Self::SystemShutdown => "/machine/shutdown",
            Self::RunGcode => "/printer/gcode/script",
        }
    }

    /// Everything except `runGcode` is a momentary button.
    pub fn is_button(self) -> bool {
        !matches!(self, Self::RunGcode)
    }

    /// Metadata of the backing state.
    pub fn meta(self) -> StateMeta {
        let (value_type, role) = if self.is_button() {
            (ValueType::Boolean, "button")
        } else {
            (ValueType::String, "text")
        };
        StateMeta {
            name: self.label().to_owned(),
            value_type,
            role: role.to_owned(),
            unit: String::new(),
            readable: true,
            writable: true,
        }
    }

    /// Initial value of the backing state.
    pub fn initial_value(self) -> StateValue {
        if self.is_button() {
            StateValue::Bool(false)
        } else {
            StateValue::Text(String::new())
        }
    }

    /// Query parameters for a write of `value`. `None` means the write
    /// does not ask for anything (a released button, an empty script).
    fn query(self, value: &StateValue) -> Option<Vec<(&'static str, String)>> {
        if self.is_button() {
            return value.as_bool().filter(|pressed| *pressed).map(|_| Vec::new());
        }
        let script = match value {
            StateValue::Text(s) => s.trim().to_owned(),
            StateValue::Number(n) => n.to_string(),
            StateValue::Bool(_) => return None,
        };
        (!script.is_empty()).then(|| vec![("script", script)])
    }
}

/// How a dispatched write ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Not a control path, or a value that requests nothing.
    Ignored,
    /// Moonraker answered `ok`.
    Sent,
    /// The call completed but Moonraker refused.
    Rejected { message: String },
    /// The call never produced a reply.
    Failed { error: String },
}

impl DispatchOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, Self::Sent)
    }
}

/// Maps control-path writes to REST calls.
#[derive(Clone)]
pub struct CommandDispatcher {
    client: MoonrakerClient,
}

impl CommandDispatcher {
    pub fn new(client: MoonrakerClient) -> Self {
        Self { client }
    }

    /// Dispatcher talking to the API endpoint described by `config`.
    pub fn from_config(config: &BridgeConfig) -> Result<Self, CoreError> {
        let client = MoonrakerClient::new(config.api_base_url()?, &config.transport_config())?;
        Ok(Self::new(client))
    }

    /// Obtain a bearer token for one-off dispatches outside a session.
    /// Returns `None` when authentication is disabled.
    pub async fn login(&self, auth: &AuthSettings) -> Result<Option<SecretString>, CoreError> {
        match auth {
            AuthSettings::Disabled => Ok(None),
            AuthSettings::Credentials { username, password } => {
                let tokens = self.client.login(username, password).await?;
                Ok(Some(tokens.token))
            }
        }
    }

    /// Create the control channel and states and subscribe them for
    /// write intents. Existing values are left alone.
    pub fn provision(store: &dyn StateStore) {
        store.ensure_channel(CONTROL_CHANNEL, "Control");
        for command in ControlCommand::iter() {
            let path = command.path();
            store.upsert_state(&path, &command.meta());
            store.subscribe_writable_changes(&path);
        }
        debug!("control states provisioned");
    }

    /// Seed initial values; only called when the states are first created.
    pub fn seed(store: &dyn StateStore) {
        for command in ControlCommand::iter() {
            store.write_value(&command.path(), command.initial_value(), true);
        }
    }

    /// Run the command behind `path` for a write of `value`.
    pub async fn dispatch(
        &self,
        bearer: Option<&SecretString>,
        path: &str,
        value: &StateValue,
    ) -> DispatchOutcome {
        let Some(command) = ControlCommand::from_path(path) else {
            debug!(path, "write on non-control path ignored");
            return DispatchOutcome::Ignored;
        };
        let Some(query) = command.query(value) else {
            debug!(command = %command, value = %value, "write requests nothing");
            return DispatchOutcome::Ignored;
        };
        let query: Vec<(&str, &str)> = query.iter().map(|(k, v)| (*k, v.as_str())).collect();

        let outcome = match self.client.post_command(command.endpoint(), &query, bearer).await {
            Ok(reply) if reply.is_ok() => DispatchOutcome::Sent,
            Ok(reply) => DispatchOutcome::Rejected {
                message: describe(&reply.result),
            },
            Err(e) if e.is_transport() => DispatchOutcome::Failed {
                error: e.to_string(),
            },
            Err(e) => DispatchOutcome::Rejected {
                message: e.to_string(),
            },
        };

        match &outcome {
            DispatchOutcome::Sent => info!(command = %command, "command sent successfully"),
            DispatchOutcome::Rejected { message } => {
                error!(command = %command, message, "command rejected");
            }
            DispatchOutcome::Failed { error } => {
                error!(command = %command, error, "command failed");
            }
            DispatchOutcome::Ignored => {}
        }
        outcome
    }

    /// Acknowledge a successful write in the store.
    pub fn acknowledge(store: &dyn StateStore, path: &str, value: StateValue, outcome: &DispatchOutcome) {
        if outcome.is_sent() {
            store.write_value(path, value, true);
        }
    }
}

fn describe(result: &Value) -> String {
    match result {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
