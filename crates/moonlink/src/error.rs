//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` into user-facing errors with
//! actionable help text and stable exit codes.

use miette::Diagnostic;
use thiserror::Error;

use moonlink_config::ConfigError;
use moonlink_core::CoreError;

/// Process exit codes.
#[allow(dead_code)]
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
#[allow(dead_code, unused_assignments)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────

    #[error("Could not connect to Moonraker at {url}")]
    #[diagnostic(
        code(moonlink::connection_failed),
        help(
            "Check that Moonraker is running and reachable.\n\
             URL: {url}\n\
             Try: moonlink snapshot --host <printer> --transport http"
        )
    )]
    ConnectionFailed {
        url: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    // ── Authentication ───────────────────────────────────────────────

    #[error("Authentication failed: {message}")]
    #[diagnostic(
        code(moonlink::auth_failed),
        help(
            "Verify the username and password of the active profile.\n\
             Run: moonlink config set-password"
        )
    )]
    AuthFailed { message: String },

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(moonlink::no_credentials),
        help(
            "Set a username with: moonlink config set username <name>\n\
             Store the password with: moonlink config set-password {profile}\n\
             Or set the MOONLINK_PASSWORD environment variable."
        )
    )]
    NoCredentials { profile: String },

    // ── Commands ─────────────────────────────────────────────────────

    #[error("Moonraker refused '{command}': {message}")]
    #[diagnostic(
        code(moonlink::command_rejected),
        help("Check the printer state; e.g. resuming only works on a paused print.")
    )]
    CommandRejected { command: String, message: String },

    #[error("Could not deliver '{command}': {reason}")]
    #[diagnostic(code(moonlink::command_failed))]
    CommandFailed { command: String, reason: String },

    // ── API ──────────────────────────────────────────────────────────

    #[error("API error: {message}")]
    #[diagnostic(code(moonlink::api_error))]
    ApiError { message: String, status: Option<u16> },

    #[error("The bridge stopped: {reason}")]
    #[diagnostic(code(moonlink::session))]
    Session { reason: String },

    // ── Validation ───────────────────────────────────────────────────

    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(moonlink::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────

    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(moonlink::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: moonlink config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("No printer configured")]
    #[diagnostic(
        code(moonlink::no_config),
        help(
            "Create a profile with: moonlink config init\n\
             Or pass --host. Expected config at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error("Keyring access failed: {0}")]
    #[diagnostic(
        code(moonlink::keyring),
        help("Store the password in the profile or MOONLINK_PASSWORD instead.")
    )]
    Keyring(String),

    #[error(transparent)]
    #[diagnostic(code(moonlink::config))]
    Config(Box<figment::Error>),

    // ── Timeout ──────────────────────────────────────────────────────

    #[error("Timed out after {seconds}s")]
    #[diagnostic(
        code(moonlink::timeout),
        help("Increase the limit with --timeout or check that Klipper is running.")
    )]
    Timeout { seconds: u64 },

    // ── IO / Serialization ───────────────────────────────────────────

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("Could not serialize output: {0}")]
    #[diagnostic(code(moonlink::json))]
    Json(#[from] serde_json::Error),

    #[error("Could not write config: {0}")]
    #[diagnostic(code(moonlink::toml))]
    Toml(#[from] toml::ser::Error),
}

impl From<figment::Error> for CliError {
    fn from(err: figment::Error) -> Self {
        Self::Config(Box::new(err))
    }
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } | Self::CommandFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } | Self::Keyring(_) => exit_code::AUTH,
            Self::Timeout { .. } => exit_code::TIMEOUT,
            Self::Validation { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { url, reason } => CliError::ConnectionFailed {
                url,
                source: reason.into(),
            },
            CoreError::AuthenticationFailed { message } => CliError::AuthFailed { message },
            CoreError::Timeout { timeout_secs } => CliError::Timeout {
                seconds: timeout_secs,
            },
            CoreError::RestartRequired { reason } => CliError::Session { reason },
            CoreError::Api { message, status } => CliError::ApiError { message, status },
            CoreError::Config { message } => CliError::Validation {
                field: "configuration".into(),
                reason: message,
            },
            CoreError::Internal(reason) => CliError::Session { reason },
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::Keyring(message) => CliError::Keyring(message),
            ConfigError::Serialization(e) => CliError::Toml(e),
            ConfigError::Figment(e) => CliError::Config(e),
            ConfigError::Io(e) => CliError::Io(e),
        }
    }
}
