use std::time::Duration;

use thiserror::Error;

/// Top-level error type for the `moonlink-api` crate.
///
/// Covers every failure mode of the two API surfaces Moonraker exposes:
/// the REST side-channel (login, token refresh, commands, polling) and the
/// JSON-RPC websocket. `moonlink-core` maps these into session-level errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login, refresh or one-shot token request was rejected.
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS handshake or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Moonraker API ───────────────────────────────────────────────
    /// Error envelope returned by Moonraker (`{"error": {"code", "message"}}`).
    #[error("Moonraker API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed by the remote end.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    /// No pong arrived within the heartbeat window; the socket was terminated.
    #[error("No heartbeat response within {}s", waited.as_secs())]
    HeartbeatTimeout { waited: Duration },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the token in use is no longer accepted
    /// and a fresh login might resolve it.
    pub fn is_auth_expired(&self) -> bool {
        match self {
            Self::Authentication { .. } => true,
            Self::Api { status, .. } => *status == 401,
            _ => false,
        }
    }

    /// Returns `true` if the failure happened below the application layer
    /// (the request never produced a Moonraker reply).
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Tls(_)
            | Self::WebSocketConnect(_)
            | Self::WebSocketClosed { .. }
            | Self::HeartbeatTimeout { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::Api { status: 404, .. } => true,
            _ => false,
        }
    }
}
