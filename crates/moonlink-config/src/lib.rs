//! Shared configuration for the moonlink binary.
//!
//! TOML profiles, credential resolution (env + keyring + plaintext),
//! and translation to `moonlink_core::BridgeConfig`. The CLI layers its
//! flag overrides on top of a [`Profile`] before translating it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use moonlink_core::{AuthSettings, BridgeConfig, CoreError, TransportMode};

/// Service name under which passwords live in the system keyring.
pub const KEYRING_SERVICE: &str = "moonlink";

/// Environment variable consulted for the password when a profile does not
/// name its own.
pub const PASSWORD_ENV: &str = "MOONLINK_PASSWORD";

/// Environment variable consulted for the username when a profile has none.
pub const USERNAME_ENV: &str = "MOONLINK_USERNAME";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("keyring access failed: {0}")]
    Keyring(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named Moonraker profiles.
    #[serde(default)]
    pub profiles: BTreeMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Profile selected by `requested`, falling back to the configured
    /// default and finally to `"default"`.
    pub fn active_profile_name(&self, requested: Option<&str>) -> String {
        requested
            .map(str::to_owned)
            .or_else(|| self.default_profile.clone())
            .unwrap_or_else(|| "default".into())
    }

    /// Comma-separated profile names, for error messages.
    pub fn profile_names(&self) -> String {
        if self.profiles.is_empty() {
            "(none)".into()
        } else {
            self.profiles.keys().cloned().collect::<Vec<_>>().join(", ")
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    /// HTTP timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Polling interval in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,

    /// `websocket` or `http`.
    #[serde(default = "default_transport")]
    pub transport: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
            poll_interval: default_poll_interval(),
            transport: default_transport(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}
fn default_poll_interval() -> u64 {
    10
}
fn default_transport() -> String {
    "websocket".into()
}

/// A named Moonraker profile.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Profile {
    /// Host name or address, without scheme.
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Use `https` / `wss`.
    #[serde(default)]
    pub use_tls: bool,

    /// Accept self-signed certificates (on unless set to false).
    pub accept_invalid_certs: Option<bool>,

    /// Log in with username and password.
    #[serde(default)]
    pub auth: bool,

    pub username: Option<String>,

    /// Password (plaintext, prefer keyring or env var).
    pub password: Option<String>,

    /// Environment variable name containing the password.
    pub password_env: Option<String>,

    /// Override the default transport.
    pub transport: Option<String>,

    /// Override the default polling interval (seconds).
    pub poll_interval: Option<u64>,

    /// Override the default HTTP timeout (seconds).
    pub timeout: Option<u64>,
}

fn default_port() -> u16 {
    7125
}

impl Profile {
    /// Profile for `host` with everything else at its default.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: default_port(),
            use_tls: false,
            accept_invalid_certs: None,
            auth: false,
            username: None,
            password: None,
            password_env: None,
            transport: None,
            poll_interval: None,
            timeout: None,
        }
    }
}

// ── Config file path ────────────────────────────────────────────────

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("com", "moonlink", "moonlink").map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

fn dirs_fallback() -> PathBuf {
    PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
        .join(".config")
        .join("moonlink")
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` + environment. A missing file yields the defaults.
///
/// Environment keys nest on a double underscore, e.g.
/// `MOONLINK_DEFAULTS__POLL_INTERVAL=5`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("MOONLINK_").split("__"));

    let config: Config = figment.extract()?;
    debug!(path = %path.display(), profiles = config.profiles.len(), "config loaded");
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist or is broken.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution ───────────────────────────────────────────

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, keyring::Error> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password"))
}

/// Username from the profile, else `MOONLINK_USERNAME`.
pub fn resolve_username(profile: &Profile, profile_name: &str) -> Result<String, ConfigError> {
    profile
        .username
        .clone()
        .filter(|u| !u.trim().is_empty())
        .or_else(|| std::env::var(USERNAME_ENV).ok())
        .ok_or_else(|| ConfigError::NoCredentials {
            profile: profile_name.into(),
        })
}

/// Resolve the password from the credential chain.
pub fn resolve_password(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Profile's password_env, else MOONLINK_PASSWORD
    let env_name = profile.password_env.as_deref().unwrap_or(PASSWORD_ENV);
    if let Ok(val) = std::env::var(env_name) {
        return Ok(SecretString::from(val));
    }

    // 2. System keyring
    if let Ok(entry) = keyring_entry(profile_name) {
        if let Ok(secret) = entry.get_password() {
            return Ok(SecretString::from(secret));
        }
    }

    // 3. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Store `password` for `profile_name` in the system keyring.
pub fn store_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    let entry = keyring_entry(profile_name).map_err(|e| ConfigError::Keyring(e.to_string()))?;
    entry
        .set_password(password)
        .map_err(|e| ConfigError::Keyring(e.to_string()))
}

/// Authentication settings for a profile.
pub fn resolve_auth(profile: &Profile, profile_name: &str) -> Result<AuthSettings, ConfigError> {
    if !profile.auth {
        return Ok(AuthSettings::Disabled);
    }
    let username = resolve_username(profile, profile_name)?;
    let password = resolve_password(profile, profile_name)?;
    Ok(AuthSettings::Credentials { username, password })
}

/// Build a validated `BridgeConfig` from a profile and the global defaults.
pub fn profile_to_bridge_config(
    profile: &Profile,
    profile_name: &str,
    defaults: &Defaults,
) -> Result<BridgeConfig, ConfigError> {
    let transport_name = profile.transport.as_deref().unwrap_or(&defaults.transport);
    let transport: TransportMode = transport_name.parse().map_err(|_| ConfigError::Validation {
        field: "transport".into(),
        reason: format!("expected 'websocket' or 'http', got '{transport_name}'"),
    })?;

    let auth = resolve_auth(profile, profile_name)?;

    let config = BridgeConfig {
        host: profile.host.trim().to_owned(),
        port: profile.port,
        use_tls: profile.use_tls,
        accept_invalid_certs: profile.accept_invalid_certs.unwrap_or(true),
        auth,
        poll_interval: Duration::from_secs(profile.poll_interval.unwrap_or(defaults.poll_interval)),
        transport,
        timeout: Duration::from_secs(profile.timeout.unwrap_or(defaults.timeout)),
        ..BridgeConfig::default()
    };

    config.validate().map_err(|e| match e {
        CoreError::Config { message } => ConfigError::Validation {
            field: format!("profile '{profile_name}'"),
            reason: message,
        },
        other => ConfigError::Validation {
            field: format!("profile '{profile_name}'"),
            reason: other.to_string(),
        },
    })?;
    Ok(config)
}
