// Moonraker REST client
//
// Wraps `reqwest::Client` with Moonraker URL construction and envelope
// unwrapping. Token endpoints live in `auth.rs` as inherent methods; this
// module stays focused on transport mechanics and the `{result}` /
// `{error}` envelope.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Error body Moonraker returns on failed requests:
/// `{"error": {"code": 404, "message": "..."}}`.
#[derive(Deserialize)]
struct ErrorEnvelope {
    error: Option<ErrorInner>,
}

#[derive(Deserialize)]
struct ErrorInner {
    #[serde(default)]
    code: Option<u16>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct ResultEnvelope {
    result: Option<Value>,
}

/// Reply to a command endpoint.
///
/// Moonraker answers successful commands with `{"result": "ok"}`; anything
/// else that still parsed as an envelope is surfaced as-is.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandReply {
    pub result: Value,
}

impl CommandReply {
    /// Whether the daemon acknowledged the command.
    pub fn is_ok(&self) -> bool {
        self.result.as_str() == Some("ok")
    }
}

/// HTTP side-channel to a Moonraker instance.
///
/// Cheap to clone; clones share the underlying connection pool, so spawned
/// login/refresh/command tasks each take their own copy.
#[derive(Clone)]
pub struct MoonrakerClient {
    http: reqwest::Client,
    base_url: Url,
}

impl MoonrakerClient {
    /// Create a client for `base_url` (e.g. `http://printer.local:7125`).
    pub fn new(base_url: Url, transport: &TransportConfig) -> Result<Self, Error> {
        let http = transport.build_client()?;
        Ok(Self { http, base_url })
    }

    /// Create a client around a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// The API base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub(crate) fn http(&self) -> &reqwest::Client {
        &self.http
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Resolve an API path (with optional query string) against the base URL.
    pub(crate) fn endpoint(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        let path = path.trim_start_matches('/');
        Ok(Url::parse(&format!("{base}/{path}"))?)
    }

    // ── Request helpers ──────────────────────────────────────────────

    /// `GET` an endpoint and return the unwrapped `result` payload.
    ///
    /// `path` may carry a raw query string, which is how object queries
    /// are expressed (`printer/objects/query?toolhead&extruder`).
    pub async fn get_result(
        &self,
        path: &str,
        bearer: Option<&SecretString>,
    ) -> Result<Value, Error> {
        let url = self.endpoint(path)?;
        debug!("GET {}", url);

        let builder = with_bearer(self.http.get(url), bearer);
        let resp = builder.send().await.map_err(Error::Transport)?;

        parse_envelope(resp).await
    }

    /// `POST` a command endpoint with query parameters and no body.
    pub async fn post_command(
        &self,
        path: &str,
        query: &[(&str, &str)],
        bearer: Option<&SecretString>,
    ) -> Result<CommandReply, Error> {
        let mut url = self.endpoint(path)?;
        if !query.is_empty() {
            url.query_pairs_mut().extend_pairs(query);
        }
        debug!("POST {}", url);

        let builder = with_bearer(self.http.post(url), bearer);
        let resp = builder.send().await.map_err(Error::Transport)?;

        let result = parse_envelope(resp).await?;
        Ok(CommandReply { result })
    }
}

pub(crate) fn with_bearer(
    builder: reqwest::RequestBuilder,
    bearer: Option<&SecretString>,
) -> reqwest::RequestBuilder {
    match bearer {
        Some(token) => builder.bearer_auth(token.expose_secret()),
        None => builder,
    }
}

/// Parse the `{result}` envelope, returning `result` on success or an
/// `Error::Api` built from the `{error}` body.
pub(crate) async fn parse_envelope(resp: reqwest::Response) -> Result<Value, Error> {
    let status = resp.status();
    let body = resp.text().await.map_err(Error::Transport)?;
    trace!(status = status.as_u16(), len = body.len(), "response received");

    if let Ok(wrapper) = serde_json::from_str::<ErrorEnvelope>(&body) {
        if let Some(err) = wrapper.error {
            let code = err.code.unwrap_or(status.as_u16());
            let message = err.message.unwrap_or_else(|| format!("HTTP {status}"));
            return Err(if code == 401 {
                Error::Authentication { message }
            } else {
                Error::Api {
                    status: code,
                    message,
                }
            });
        }
    }

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return Err(Error::Authentication {
            message: "token expired or invalid credentials".into(),
        });
    }

    if !status.is_success() {
        return Err(Error::Api {
            status: status.as_u16(),
            message: preview(&body).to_owned(),
        });
    }

    let envelope: ResultEnvelope = serde_json::from_str(&body).map_err(|e| Error::Deserialization {
        message: format!("{e} (body preview: {:?})", preview(&body)),
        body: body.clone(),
    })?;

    envelope.result.ok_or_else(|| Error::Deserialization {
        message: "response envelope has no `result` field".into(),
        body,
    })
}

fn preview(body: &str) -> &str {
    let mut end = body.len().min(200);
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    &body[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client(base: &str) -> MoonrakerClient {
        MoonrakerClient::with_client(reqwest::Client::new(), Url::parse(base).expect("url"))
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let c = client("http://printer.local:7125/");
        let url = c.endpoint("/printer/info").expect("url");
        assert_eq!(url.as_str(), "http://printer.local:7125/printer/info");
    }

    #[test]
    fn endpoint_keeps_raw_object_query() {
        let c = client("http://printer.local:7125");
        let url = c.endpoint("printer/objects/query?toolhead&extruder").expect("url");
        assert_eq!(url.query(), Some("toolhead&extruder"));
    }

    #[test]
    fn command_reply_ok_only_for_literal_ok() {
        assert!(CommandReply { result: json!("ok") }.is_ok());
        assert!(!CommandReply { result: json!("OK ") }.is_ok());
        assert!(!CommandReply { result: json!({"state": "ok"}) }.is_ok());
    }

    #[test]
    fn preview_respects_char_boundaries() {
        let body = "é".repeat(150);
        assert!(preview(&body).len() <= 200);
    }
}
