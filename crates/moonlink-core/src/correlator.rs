// ── Request/response correlation ──
//
// Matches inbound JSON-RPC frames to the request that caused them, or to
// the handler registered for a notification method. The correlator knows
// nothing about what resolvers and handlers mean; the session picks the
// types (`R`, `N`) and acts on what `on_frame` hands back.

use std::collections::HashMap;
use std::time::Duration;

use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use moonlink_api::{FrameKind, RpcErrorBody, RpcFrame, RpcRequest};

/// An outstanding request.
#[derive(Debug)]
pub struct PendingRequest<R> {
    pub id: String,
    pub issued_at: Instant,
    pub resolver: R,
}

/// Result of routing one inbound frame.
#[derive(Debug, PartialEq)]
pub enum Inbound<R, N> {
    /// Reply to a pending request, which is now resolved.
    Response {
        resolver: R,
        result: Value,
        latency: Duration,
    },
    /// Notification for a registered method.
    Notification { handler: N, params: Value },
    /// Error reply. The matching request, if any, is no longer pending.
    RpcError {
        id: Option<String>,
        error: RpcErrorBody,
        resolver: Option<R>,
    },
    /// Well-formed, but nobody asked for it.
    Unexpected,
    /// Not JSON, or not a JSON-RPC shape.
    Malformed,
}

/// Pending-request table plus notification routing.
pub struct Correlator<R, N> {
    pending: HashMap<String, PendingRequest<R>>,
    notifications: HashMap<String, N>,
}

impl<R, N: Clone> Default for Correlator<R, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, N: Clone> Correlator<R, N> {
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
            notifications: HashMap::new(),
        }
    }

    /// Route notifications for `method` to `handler`.
    pub fn on_notification(&mut self, method: impl Into<String>, handler: N) {
        self.notifications.insert(method.into(), handler);
    }

    /// Register `resolver` under `id` and build the request to send.
    ///
    /// Reusing an id that is still pending supersedes the older request;
    /// its reply will resolve the newer one.
    pub fn request(
        &mut self,
        method: &str,
        params: Option<Value>,
        id: impl Into<String>,
        resolver: R,
    ) -> RpcRequest {
        let id = id.into();
        self.register(id.clone(), resolver);
        RpcRequest::new(method, params, Some(id))
    }

    /// Track `id` as pending. Returns the resolver it superseded, if any.
    pub fn register(&mut self, id: String, resolver: R) -> Option<R> {
        let previous = self.pending.insert(
            id.clone(),
            PendingRequest {
                id: id.clone(),
                issued_at: Instant::now(),
                resolver,
            },
        );
        previous.map(|p| {
            debug!(id, "pending request superseded");
            p.resolver
        })
    }

    /// Route one raw inbound frame. Never fails; bad input is logged and
    /// reported as `Malformed` or `Unexpected`.
    pub fn on_frame(&mut self, raw: &str) -> Inbound<R, N> {
        let frame = match RpcFrame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(error = %e, "malformed frame dropped");
                return Inbound::Malformed;
            }
        };

        match frame.classify() {
            FrameKind::Response { id, result } => self.resolve(&id, result),
            FrameKind::RpcError { id, error } => {
                error!(
                    id = id.as_deref().unwrap_or("-"),
                    code = error.code,
                    message = %error.message,
                    "error reply received"
                );
                let resolver = id
                    .as_deref()
                    .and_then(|id| self.pending.remove(id))
                    .map(|p| p.resolver);
                Inbound::RpcError { id, error, resolver }
            }
            FrameKind::Notification { method, params } => match self.notifications.get(&method) {
                Some(handler) => Inbound::Notification {
                    handler: handler.clone(),
                    params,
                },
                None => {
                    debug!(method, "notification without handler ignored");
                    Inbound::Unexpected
                }
            },
            FrameKind::Unexpected => {
                warn!(frame = %truncate(raw), "unexpected message received");
                Inbound::Unexpected
            }
        }
    }

    /// Resolve `id` with `result`, as a reply frame would.
    pub fn resolve(&mut self, id: &str, result: Value) -> Inbound<R, N> {
        match self.pending.remove(id) {
            Some(pending) => Inbound::Response {
                resolver: pending.resolver,
                result,
                latency: pending.issued_at.elapsed(),
            },
            None => {
                warn!(id, "reply for unknown request ignored");
                Inbound::Unexpected
            }
        }
    }

    /// Forget the pending request `id` without resolving it.
    pub fn abandon(&mut self, id: &str) -> Option<R> {
        self.pending.remove(id).map(|p| p.resolver)
    }

    /// Drop every pending request without resolving it. Returns how many
    /// were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.pending.len();
        self.pending.clear();
        if dropped > 0 {
            debug!(dropped, "pending requests dropped");
        }
        dropped
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.contains_key(id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}

fn truncate(raw: &str) -> &str {
    let mut end = raw.len().min(256);
    while !raw.is_char_boundary(end) {
        end -= 1;
    }
    &raw[..end]
}
