// ── Runtime bridge configuration ──
//
// These types describe *how* to reach a Moonraker instance and how the
// live link paces itself. They carry credential data and timing, but never
// touch disk. The CLI builds a `BridgeConfig` and hands it in.

use std::time::Duration;

use secrecy::SecretString;
use url::Url;

use moonlink_api::{HeartbeatConfig, TlsMode, TransportConfig};

use crate::error::CoreError;

/// How to authenticate with Moonraker.
#[derive(Debug, Clone)]
pub enum AuthSettings {
    /// Moonraker's `[authorization]` component is off or trusts this host.
    Disabled,
    /// JWT login with username and password.
    Credentials {
        username: String,
        password: SecretString,
    },
}

impl AuthSettings {
    pub fn is_enabled(&self) -> bool {
        matches!(self, Self::Credentials { .. })
    }
}

/// Which transport carries the live link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum TransportMode {
    /// JSON-RPC over a websocket with push notifications.
    #[default]
    #[strum(to_string = "websocket", serialize = "ws")]
    WebSocket,
    /// Periodic REST polling, no socket.
    #[strum(to_string = "http", serialize = "poll")]
    HttpPoll,
}

/// Configuration for one bridge instance.
///
/// Built by the CLI, passed to [`Bridge`](crate::Bridge). Call
/// [`validate`](Self::validate) before use; `Bridge::new` does.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Moonraker host name or address.
    pub host: String,
    /// Moonraker port (7125 by default).
    pub port: u16,
    /// Use `https`/`wss` instead of `http`/`ws`.
    pub use_tls: bool,
    /// Accept self-signed certificates when `use_tls` is set.
    pub accept_invalid_certs: bool,
    pub auth: AuthSettings,
    /// Polling interval. Drives `server.info` re-queries, HTTP polling and
    /// the liveness timeout (twice this value).
    pub poll_interval: Duration,
    pub transport: TransportMode,
    /// HTTP request timeout.
    pub timeout: Duration,
    /// Delay between a lost connection and the next attempt.
    pub reconnect_delay: Duration,
    /// Delay between a failed login and the next attempt.
    pub login_retry_delay: Duration,
    /// Access token refresh cadence.
    pub token_refresh_interval: Duration,
    pub heartbeat: HeartbeatConfig,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 7125,
            use_tls: false,
            accept_invalid_certs: true,
            auth: AuthSettings::Disabled,
            poll_interval: Duration::from_secs(10),
            transport: TransportMode::WebSocket,
            timeout: Duration::from_secs(30),
            reconnect_delay: Duration::from_secs(10),
            login_retry_delay: Duration::from_secs(90),
            token_refresh_interval: Duration::from_secs(50 * 60),
            heartbeat: HeartbeatConfig::default(),
        }
    }
}

impl BridgeConfig {
    /// Reject configurations the session cannot run with.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.host.trim().is_empty() {
            return Err(config_error("host must not be empty"));
        }
        if self.host.contains('/') || self.host.contains("://") {
            return Err(config_error("host must be a bare name or address, without scheme or path"));
        }
        if self.port == 0 {
            return Err(config_error("port must be between 1 and 65535"));
        }
        if self.poll_interval.is_zero() {
            return Err(config_error("poll interval must be at least one second"));
        }
        if self.reconnect_delay.is_zero() || self.login_retry_delay.is_zero() {
            return Err(config_error("retry delays must be non-zero"));
        }
        if let AuthSettings::Credentials { username, .. } = &self.auth {
            if username.trim().is_empty() {
                return Err(config_error("authentication is enabled but no username is set"));
            }
        }
        // Both endpoints must parse.
        self.api_base_url()?;
        self.websocket_url(None)?;
        Ok(())
    }

    /// `http[s]://host:port`
    pub fn api_base_url(&self) -> Result<Url, CoreError> {
        let scheme = if self.use_tls { "https" } else { "http" };
        self.url(scheme, "")
    }

    /// `ws[s]://host:port/websocket[?token=…]`
    pub fn websocket_url(&self, one_shot: Option<&str>) -> Result<Url, CoreError> {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        let mut url = self.url(scheme, "websocket")?;
        if let Some(token) = one_shot {
            url.query_pairs_mut().append_pair("token", token);
        }
        Ok(url)
    }

    /// Shared HTTP and websocket transport settings.
    pub fn transport_config(&self) -> TransportConfig {
        let tls = if self.accept_invalid_certs {
            TlsMode::DangerAcceptInvalid
        } else {
            TlsMode::System
        };
        TransportConfig {
            tls,
            timeout: self.timeout,
        }
    }

    /// Timeout after which a liveness indicator falls back.
    pub fn liveness_timeout(&self) -> Duration {
        self.poll_interval * 2
    }

    fn url(&self, scheme: &str, path: &str) -> Result<Url, CoreError> {
        let host = if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]", self.host)
        } else {
            self.host.clone()
        };
        Url::parse(&format!("{scheme}://{host}:{}/{path}", self.port)).map_err(|e| {
            CoreError::Config {
                message: format!("invalid endpoint for host {:?}: {e}", self.host),
            }
        })
    }
}

fn config_error(message: &str) -> CoreError {
    CoreError::Config {
        message: message.to_owned(),
    }
}
