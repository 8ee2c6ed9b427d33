// ── Liveness tracking ──
//
// Some leaves only mean something while they keep being refreshed
// (`klippy_connected` is re-reported on every poll). Each such path gets an
// expiry timer that is rearmed on every update; if it runs out, the path
// is forced to its fallback value.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::store::{StateStore, StateValue};

/// A timer ran out. Hand it back to [`LivenessTracker::expire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiry {
    pub path: String,
    generation: u64,
}

struct ArmedTimer {
    generation: u64,
    fallback: StateValue,
    task: JoinHandle<()>,
}

/// Per-path expiry timers.
pub struct LivenessTracker {
    timers: HashMap<String, ArmedTimer>,
    next_generation: u64,
    tx: mpsc::UnboundedSender<Expiry>,
    rx: mpsc::UnboundedReceiver<Expiry>,
}

impl Default for LivenessTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl LivenessTracker {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            timers: HashMap::new(),
            next_generation: 0,
            tx,
            rx,
        }
    }

    /// Start (or restart) the timer for `path`. Never stacks.
    pub fn arm(&mut self, path: &str, timeout: Duration, fallback: StateValue) {
        self.cancel(path);
        self.next_generation += 1;
        let generation = self.next_generation;

        let tx = self.tx.clone();
        let expiry = Expiry {
            path: path.to_owned(),
            generation,
        };
        let task = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = tx.send(expiry);
        });

        debug!(path, timeout_s = timeout.as_secs(), "liveness timer armed");
        self.timers.insert(
            path.to_owned(),
            ArmedTimer {
                generation,
                fallback,
                task,
            },
        );
    }

    /// Stop the timer for `path`. Returns whether one was running.
    pub fn cancel(&mut self, path: &str) -> bool {
        match self.timers.remove(path) {
            Some(timer) => {
                timer.task.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, timer) in self.timers.drain() {
            timer.task.abort();
        }
    }

    pub fn is_armed(&self, path: &str) -> bool {
        self.timers.contains_key(path)
    }

    /// Wait for the next timer to run out.
    pub async fn next_expiry(&mut self) -> Expiry {
        match self.rx.recv().await {
            Some(expiry) => expiry,
            // The tracker holds a sender, so the channel never closes.
            None => std::future::pending().await,
        }
    }

    /// Apply an expiry: write the fallback as an acknowledged value.
    ///
    /// Expiries that raced with a rearm or a cancel are ignored and
    /// return `false`.
    pub fn expire(&mut self, expiry: &Expiry, store: &dyn StateStore) -> bool {
        let current = self
            .timers
            .get(&expiry.path)
            .is_some_and(|t| t.generation == expiry.generation);
        if !current {
            debug!(path = %expiry.path, "stale liveness expiry ignored");
            return false;
        }

        let Some(timer) = self.timers.remove(&expiry.path) else {
            return false;
        };
        debug!(path = %expiry.path, fallback = %timer.fallback, "liveness expired");
        store.write_value(&expiry.path, timer.fallback, true);
        true
    }
}

impl Drop for LivenessTracker {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
