// Moonraker token authentication
//
// Moonraker issues a JWT pair on login. The access token authorizes REST
// calls as a bearer header; the websocket instead takes a short-lived
// one-shot token in its query string. The refresh token buys new access
// tokens without resending the password.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::client::{MoonrakerClient, parse_envelope, with_bearer};
use crate::error::Error;

/// Source tag Moonraker records against the login.
const LOGIN_SOURCE: &str = "moonraker";

/// Tokens returned by `POST /access/login`.
#[derive(Debug)]
pub struct LoginTokens {
    pub username: Option<String>,
    pub token: SecretString,
    pub refresh_token: SecretString,
}

#[derive(Deserialize)]
struct RawLoginReply {
    #[serde(default)]
    username: Option<String>,
    token: String,
    refresh_token: String,
}

impl From<RawLoginReply> for LoginTokens {
    fn from(raw: RawLoginReply) -> Self {
        Self {
            username: raw.username,
            token: SecretString::from(raw.token),
            refresh_token: SecretString::from(raw.refresh_token),
        }
    }
}

/// Authorization material held by a session while auth is enabled.
#[derive(Debug)]
pub struct Authorization {
    pub access_token: SecretString,
    pub refresh_token: SecretString,
    /// Token used for the current socket attempt; replaced on every connect.
    pub one_shot: Option<SecretString>,
}

impl From<LoginTokens> for Authorization {
    fn from(tokens: LoginTokens) -> Self {
        Self {
            access_token: tokens.token,
            refresh_token: tokens.refresh_token,
            one_shot: None,
        }
    }
}

impl MoonrakerClient {
    /// Log in with username/password.
    ///
    /// Any non-success reply is reported as `Error::Authentication`, so a
    /// wrong password and a disabled auth component look the same to the
    /// caller: retry later.
    pub async fn login(&self, username: &str, password: &SecretString) -> Result<LoginTokens, Error> {
        let url = self.endpoint("access/login")?;
        debug!("logging in at {}", url);

        let body = json!({
            "username": username,
            "password": password.expose_secret(),
            "source": LOGIN_SOURCE,
        });

        let resp = self
            .http()
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(Error::Transport)?;

        let result = parse_envelope(resp).await.map_err(into_auth_error)?;
        let tokens: LoginTokens = serde_json::from_value::<RawLoginReply>(result)
            .map(LoginTokens::from)
            .map_err(|e| Error::Authentication {
                message: format!("login reply missing tokens: {e}"),
            })?;

        debug!(user = tokens.username.as_deref().unwrap_or(username), "login successful");
        Ok(tokens)
    }

    /// Exchange the refresh token for a new access token.
    pub async fn refresh_access_token(
        &self,
        refresh_token: &SecretString,
    ) -> Result<SecretString, Error> {
        let url = self.endpoint("access/refresh_jwt")?;
        debug!("refreshing access token");

        let resp = self
            .http()
            .post(url)
            .json(&json!({ "refresh_token": refresh_token.expose_secret() }))
            .send()
            .await
            .map_err(Error::Transport)?;

        let result = parse_envelope(resp).await.map_err(into_auth_error)?;
        result
            .get("token")
            .and_then(serde_json::Value::as_str)
            .map(|t| SecretString::from(t.to_owned()))
            .ok_or_else(|| Error::Authentication {
                message: "refresh reply has no token".into(),
            })
    }

    /// Request a one-shot token for the websocket upgrade.
    pub async fn oneshot_token(&self, access_token: &SecretString) -> Result<SecretString, Error> {
        let url = self.endpoint("access/oneshot_token")?;
        debug!("requesting one-shot token");

        let builder = with_bearer(self.http().get(url), Some(access_token));
        let resp = builder.send().await.map_err(Error::Transport)?;

        let result = parse_envelope(resp).await.map_err(into_auth_error)?;
        result
            .as_str()
            .map(|t| SecretString::from(t.to_owned()))
            .ok_or_else(|| Error::Authentication {
                message: "one-shot reply is not a token string".into(),
            })
    }
}

/// Transport failures pass through untouched; any reply the daemon
/// produced is an authentication rejection.
fn into_auth_error(err: Error) -> Error {
    match err {
        Error::Api { status, message } => Error::Authentication {
            message: format!("HTTP {status}: {message}"),
        },
        Error::Deserialization { message, .. } => Error::Authentication { message },
        other => other,
    }
}
