//! JSON-RPC websocket transport with heartbeat.
//!
//! A [`WebSocketHandle`] owns one socket connection and nothing more: it
//! does not reconnect. Reconnection policy (fixed delay, fresh one-shot
//! token) belongs to the session in `moonlink-core`, which builds a new
//! handle per attempt and feeds every [`TransportEvent`] into its own
//! event loop.
//!
//! # Example
//!
//! ```rust,ignore
//! use moonlink_api::{HeartbeatConfig, TransportConfig, WebSocketHandle};
//!
//! let url = Url::parse("ws://printer.local:7125/websocket")?;
//! let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//! let handle = WebSocketHandle::connect(url, &TransportConfig::default(), HeartbeatConfig::default(), move |ev| {
//!     let _ = tx.send(ev);
//! })?;
//! handle.send(r#"{"jsonrpc":"2.0","method":"server.info","id":"server.info"}"#.into())?;
//! while let Some(event) = rx.recv().await { /* ... */ }
//! handle.close().await;
//! ```

use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{self, Message, Utf8Bytes};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::Connector;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::error::Error;
use crate::transport::TransportConfig;

/// Upper bound for delivering the close frame and for `close()` to wait on
/// the socket task before aborting it.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

// ── HeartbeatConfig ──────────────────────────────────────────────────

/// Ping cadence and the extra time a pong may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between pings. Default: 30s.
    pub interval: Duration,
    /// Allowance on top of `interval` before the peer is declared dead. Default: 5s.
    pub grace: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            grace: Duration::from_secs(5),
        }
    }
}

impl HeartbeatConfig {
    fn window(self) -> Duration {
        self.interval + self.grace
    }
}

// ── TransportEvent ───────────────────────────────────────────────────

/// Everything the socket task reports to its owner.
#[derive(Debug)]
pub enum TransportEvent {
    /// Upgrade completed; requests may be sent.
    Opened,
    /// One inbound text frame, unparsed.
    Frame(String),
    /// The peer closed the socket or the stream ended.
    Closed { reason: String },
    /// The socket failed: connect error, read/write error or heartbeat timeout.
    Failed(Error),
}

// ── WebSocketHandle ──────────────────────────────────────────────────

/// Handle to one running socket task.
///
/// Dropping the handle cancels the task; [`close`](Self::close) also waits
/// for it to finish.
pub struct WebSocketHandle {
    outbound: mpsc::UnboundedSender<String>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl WebSocketHandle {
    /// Spawn the socket task. Returns once the task is spawned; the
    /// outcome of the upgrade arrives as `Opened` or `Failed` on `sink`.
    pub fn connect<F>(
        url: Url,
        transport: &TransportConfig,
        heartbeat: HeartbeatConfig,
        sink: F,
    ) -> Result<Self, Error>
    where
        F: Fn(TransportEvent) + Send + Sync + 'static,
    {
        let connector = if url.scheme() == "wss" {
            transport.websocket_connector()?
        } else {
            None
        };

        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            if let Err(e) = run(&url, connector, heartbeat, outbound_rx, &task_cancel, &sink).await {
                sink(TransportEvent::Failed(e));
            }
            tracing::debug!("websocket task exiting");
        });

        Ok(Self {
            outbound,
            cancel,
            task: Some(task),
        })
    }

    /// Queue a text frame for sending.
    pub fn send(&self, text: String) -> Result<(), Error> {
        self.outbound.send(text).map_err(|_| Error::WebSocketClosed {
            code: 1006,
            reason: "socket task has ended".into(),
        })
    }

    /// Close the socket and wait for the task to finish. A task that does
    /// not finish within two seconds is aborted.
    pub async fn close(mut self) {
        self.cancel.cancel();
        let Some(mut task) = self.task.take() else {
            return;
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, &mut task).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::debug!(error = %e, "websocket task ended abnormally"),
            Err(_) => {
                tracing::warn!("websocket task did not stop in time, aborting");
                task.abort();
            }
        }
    }
}

impl Drop for WebSocketHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ── Single connection lifecycle ──────────────────────────────────────

/// Connect, then pump frames both ways until the socket ends.
///
/// `Ok(())` covers a clean end (close frame, stream end or cancellation);
/// those are reported on `sink` here. Errors are reported by the caller.
async fn run<F>(
    url: &Url,
    connector: Option<Connector>,
    heartbeat: HeartbeatConfig,
    mut outbound: mpsc::UnboundedReceiver<String>,
    cancel: &CancellationToken,
    sink: &F,
) -> Result<(), Error>
where
    F: Fn(TransportEvent),
{
    tracing::info!(url = %redacted(url), "connecting to websocket");

    let connect =
        tokio_tungstenite::connect_async_tls_with_config(url.as_str(), None, false, connector);
    let (ws_stream, _response) = tokio::select! {
        biased;
        () = cancel.cancelled() => return Ok(()),
        result = connect => result.map_err(|e| Error::WebSocketConnect(e.to_string()))?,
    };

    tracing::info!("websocket connected");
    sink(TransportEvent::Opened);

    let (mut write, mut read) = ws_stream.split();
    let mut ping = tokio::time::interval_at(Instant::now() + heartbeat.interval, heartbeat.interval);
    let mut deadline = Instant::now() + heartbeat.window();

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                let frame = CloseFrame { code: CloseCode::Normal, reason: Utf8Bytes::from_static("shutdown") };
                match tokio::time::timeout(CLOSE_TIMEOUT, write.send(Message::Close(Some(frame)))).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::debug!(error = %e, "close frame not delivered"),
                    Err(_) => tracing::debug!("close frame not delivered, peer is not reading"),
                }
                return Ok(());
            }
            () = tokio::time::sleep_until(deadline) => {
                tracing::warn!(window_s = heartbeat.window().as_secs(), "heartbeat missed, terminating socket");
                return Err(Error::HeartbeatTimeout { waited: heartbeat.window() });
            }
            _ = ping.tick() => {
                tracing::trace!("websocket ping");
                let message = Message::Ping(Default::default());
                if !deliver(&mut write, message, deadline, heartbeat, cancel).await? {
                    return Ok(());
                }
            }
            Some(text) = outbound.recv() => {
                if !deliver(&mut write, Message::Text(text.into()), deadline, heartbeat, cancel).await? {
                    return Ok(());
                }
            }
            frame = read.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        sink(TransportEvent::Frame(text.as_str().to_owned()));
                    }
                    Some(Ok(Message::Pong(_) | Message::Ping(_))) => {
                        // tungstenite queues the pong reply to pings itself
                        deadline = Instant::now() + heartbeat.window();
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = match frame {
                            Some(cf) => {
                                tracing::info!(code = %cf.code, reason = %cf.reason, "websocket close frame received");
                                format!("closed by peer ({}): {}", u16::from(cf.code), cf.reason)
                            }
                            None => "closed by peer".to_owned(),
                        };
                        sink(TransportEvent::Closed { reason });
                        return Ok(());
                    }
                    Some(Err(e)) => return Err(Error::WebSocketConnect(e.to_string())),
                    None => {
                        tracing::info!("websocket stream ended");
                        sink(TransportEvent::Closed { reason: "stream ended".into() });
                        return Ok(());
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }
}

/// Send one message, giving up at the heartbeat deadline.
///
/// A peer that stops reading fills the socket buffer and parks the write;
/// the deadline and cancellation still apply while it is parked. Returns
/// `Ok(false)` when cancelled mid-write.
async fn deliver<S>(
    write: &mut S,
    message: Message,
    deadline: Instant,
    heartbeat: HeartbeatConfig,
    cancel: &CancellationToken,
) -> Result<bool, Error>
where
    S: Sink<Message, Error = tungstenite::Error> + Unpin,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Ok(false),
        sent = tokio::time::timeout_at(deadline, write.send(message)) => match sent {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => Err(Error::WebSocketConnect(e.to_string())),
            Err(_) => {
                tracing::warn!(window_s = heartbeat.window().as_secs(), "write stalled past heartbeat, terminating socket");
                Err(Error::HeartbeatTimeout { waited: heartbeat.window() })
            }
        },
    }
}

/// The URL without its query, which carries the one-shot token.
fn redacted(url: &Url) -> String {
    let mut shown = url.clone();
    shown.set_query(None);
    shown.to_string()
}

// ── Tests ────────────────────────────────────────────────────────────
