// JSON-RPC 2.0 frame types
//
// Outbound requests are `{jsonrpc, method, params?, id?}`. Inbound frames
// come in three shapes: `{id, result}`, `{id?, error}` and
// `{method, params}`. `RpcFrame` accepts all of them and `classify` sorts
// them out without any knowledge of which requests are outstanding.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::Error;

const JSONRPC_VERSION: &str = "2.0";

// ── Outbound ─────────────────────────────────────────────────────────

/// An outbound JSON-RPC request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Option<Value>, id: Option<String>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            method: method.into(),
            params,
            id,
        }
    }

    /// Serialize to the text frame sent over the socket.
    pub fn to_text(&self) -> Result<String, Error> {
        serde_json::to_string(self).map_err(|e| Error::Deserialization {
            message: format!("failed to encode {}: {e}", self.method),
            body: String::new(),
        })
    }

    /// REST equivalent of this request, for transports without a socket.
    ///
    /// Returns `None` for methods that only make sense on a live socket
    /// (subscriptions) or have no GET counterpart.
    pub fn rest_path(&self) -> Option<String> {
        let path = match self.method.as_str() {
            "printer.info" => "printer/info",
            "server.info" => "server/info",
            "server.spoolman.get_spool_id" => "server/spoolman/spool_id",
            "printer.objects.list" => "printer/objects/list",
            "printer.objects.query" => return Some(self.objects_query_path()),
            _ => return None,
        };
        Some(path.to_owned())
    }

    /// `printer/objects/query?a&b` from `params.objects` keys.
    fn objects_query_path(&self) -> String {
        let names: Vec<String> = self
            .params
            .as_ref()
            .and_then(|p| p.get("objects"))
            .and_then(Value::as_object)
            .map(|objects| {
                objects
                    .keys()
                    .map(|name| url::form_urlencoded::byte_serialize(name.as_bytes()).collect())
                    .collect()
            })
            .unwrap_or_default();

        if names.is_empty() {
            "printer/objects/query".to_owned()
        } else {
            format!("printer/objects/query?{}", names.join("&"))
        }
    }
}

// ── Inbound ──────────────────────────────────────────────────────────

/// Error member of a JSON-RPC reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcErrorBody {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
}

/// Any inbound frame, before classification.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcFrame {
    #[serde(default, deserialize_with = "id_as_string")]
    pub id: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorBody>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub params: Option<Value>,
}

/// What an inbound frame turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum FrameKind {
    Response { id: String, result: Value },
    RpcError { id: Option<String>, error: RpcErrorBody },
    Notification { method: String, params: Value },
    Unexpected,
}

impl RpcFrame {
    /// Parse a raw text frame.
    pub fn parse(text: &str) -> Result<Self, Error> {
        serde_json::from_str(text).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body: text.to_owned(),
        })
    }

    /// Sort the frame into one of the shapes the protocol allows.
    ///
    /// An `error` member wins over everything else; a `method` that also
    /// carries an `id` is a server-initiated request, which is not part of
    /// this protocol and therefore unexpected.
    pub fn classify(self) -> FrameKind {
        if let Some(error) = self.error {
            return FrameKind::RpcError { id: self.id, error };
        }
        match (self.id, self.result, self.method) {
            (Some(id), Some(result), None) => FrameKind::Response { id, result },
            (None, _, Some(method)) => FrameKind::Notification {
                method,
                params: self.params.unwrap_or(Value::Null),
            },
            _ => FrameKind::Unexpected,
        }
    }
}

/// Moonraker echoes ids with the type they were sent with; ours are
/// strings but numeric ids are accepted too.
fn id_as_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Distinguish `"result": null` from an absent `result`.
fn present<'de, D>(deserializer: D) -> Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}
