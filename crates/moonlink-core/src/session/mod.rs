// ── Bridge facade ──
//
// Public handle around one live-link session. The session itself runs on
// a spawned task; the bridge exposes its connection state, its notices and
// a way to stop it.

mod link;

use std::sync::Arc;

use tokio::sync::{Mutex, broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::BridgeConfig;
use crate::error::CoreError;
use crate::store::StateStore;

use link::Session;
pub use link::CONNECTION_PATH;

const NOTICE_CHANNEL_SIZE: usize = 64;

// ── ConnectionState ──────────────────────────────────────────────────

/// Connection state observable by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Link transitions reported to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkNotice {
    Opened,
    Closed { reason: String },
    Error { message: String },
    /// The first object status after an open has been materialized.
    Synchronized,
}

// ── Bridge ───────────────────────────────────────────────────────────

/// Entry point for consumers.
///
/// Cheaply cloneable. [`new`](Self::new) validates the configuration but
/// does not connect; [`start`](Self::start) spawns the session, which then
/// connects, reconnects and re-authenticates on its own until
/// [`shutdown`](Self::shutdown) or a fatal error.
#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    config: BridgeConfig,
    state_rx: watch::Receiver<ConnectionState>,
    notice_tx: broadcast::Sender<LinkNotice>,
    cancel: CancellationToken,
    session: Mutex<Option<Session>>,
    task: Mutex<Option<JoinHandle<Result<(), CoreError>>>>,
}

impl Bridge {
    pub fn new(config: BridgeConfig, store: Arc<dyn StateStore>) -> Result<Self, CoreError> {
        config.validate()?;

        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let (notice_tx, _) = broadcast::channel(NOTICE_CHANNEL_SIZE);
        let session = Session::new(config.clone(), store, state_tx, notice_tx.clone())?;

        Ok(Self {
            inner: Arc::new(BridgeInner {
                config,
                state_rx,
                notice_tx,
                cancel: CancellationToken::new(),
                session: Mutex::new(Some(session)),
                task: Mutex::new(None),
            }),
        })
    }

    /// Spawn the session. A bridge runs once; start a new one to retry
    /// after it stopped.
    pub async fn start(&self) -> Result<(), CoreError> {
        let session = self
            .inner
            .session
            .lock()
            .await
            .take()
            .ok_or_else(|| CoreError::Internal("bridge already started".into()))?;

        let cancel = self.inner.cancel.child_token();
        let task = tokio::spawn(session.run(cancel));
        *self.inner.task.lock().await = Some(task);
        debug!(host = %self.inner.config.host, "bridge started");
        Ok(())
    }

    /// Wait for the session to end. Returns the fatal error that ended
    /// it, if any.
    ///
    /// Safe to use as a `select!` branch: dropping the future before the
    /// session ends leaves the task in place for the next caller.
    pub async fn wait(&self) -> Result<(), CoreError> {
        let mut guard = self.inner.task.lock().await;
        let Some(task) = guard.as_mut() else {
            return Ok(());
        };
        let joined = task.await;
        *guard = None;
        joined.map_err(|e| CoreError::Internal(format!("session task failed: {e}")))?
    }

    /// Stop the session: timers are cancelled and the transport closed
    /// before this returns.
    pub async fn shutdown(&self) -> Result<(), CoreError> {
        self.inner.cancel.cancel();
        self.wait().await
    }

    pub fn connection_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_rx.clone()
    }

    pub fn notices(&self) -> broadcast::Receiver<LinkNotice> {
        self.inner.notice_tx.subscribe()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn invalid_config_is_rejected_up_front() {
        let config = BridgeConfig {
            host: String::new(),
            ..BridgeConfig::default()
        };
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        assert!(matches!(Bridge::new(config, store), Err(CoreError::Config { .. })));
    }

    #[tokio::test]
    async fn bridge_starts_once() {
        let store: Arc<dyn StateStore> = Arc::new(MemoryStore::new());
        // Nothing listens on port 1; the session just keeps retrying.
        let config = BridgeConfig {
            host: "127.0.0.1".into(),
            port: 1,
            ..BridgeConfig::default()
        };
        let bridge = Bridge::new(config, store).unwrap();
        assert_eq!(*bridge.connection_state().borrow(), ConnectionState::Disconnected);

        bridge.start().await.unwrap();
        assert!(matches!(bridge.start().await, Err(CoreError::Internal(_))));
        bridge.shutdown().await.unwrap();
        assert_eq!(*bridge.connection_state().borrow(), ConnectionState::Disconnected);
    }
}
