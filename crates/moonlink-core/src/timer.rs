// Single-shot timers that report back through the session's event channel.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Holds at most one pending timer.
///
/// Arming aborts whatever was pending. Each firing carries the epoch it
/// was armed with, and [`accept`](Self::accept) only takes the current
/// one, so a firing that was already queued when the slot was rearmed or
/// cancelled is discarded.
#[derive(Debug, Default)]
pub(crate) struct TimerSlot {
    epoch: u64,
    task: Option<JoinHandle<()>>,
}

impl TimerSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Arm the slot. `make` builds the event from the epoch.
    pub(crate) fn arm<E, F>(&mut self, after: Duration, tx: &mpsc::UnboundedSender<E>, make: F) -> u64
    where
        E: Send + 'static,
        F: FnOnce(u64) -> E + Send + 'static,
    {
        self.cancel();
        self.epoch += 1;
        let epoch = self.epoch;
        let tx = tx.clone();
        self.task = Some(tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = tx.send(make(epoch));
        }));
        epoch
    }

    pub(crate) fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    /// Take a firing. Returns `false` for stale or cancelled epochs.
    pub(crate) fn accept(&mut self, epoch: u64) -> bool {
        if self.task.is_some() && epoch == self.epoch {
            self.task = None;
            true
        } else {
            false
        }
    }

    pub(crate) fn is_armed(&self) -> bool {
        self.task.is_some()
    }
}

impl Drop for TimerSlot {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slot = TimerSlot::new();
        let epoch = slot.arm(Duration::from_secs(10), &tx, |e| e);
        assert!(slot.is_armed());

        tokio::time::sleep(Duration::from_secs(9)).await;
        assert!(rx.try_recv().is_err());

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, epoch);
        assert!(slot.accept(fired));
        assert!(!slot.is_armed());
        assert!(!slot.accept(fired), "a firing is accepted once");
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_pending_timer() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slot = TimerSlot::new();
        let first = slot.arm(Duration::from_secs(5), &tx, |e| e);
        let second = slot.arm(Duration::from_secs(5), &tx, |e| e);
        assert_ne!(first, second);

        let fired = rx.recv().await.unwrap();
        assert_eq!(fired, second);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(rx.try_recv().is_err(), "the first timer was aborted");
    }

    #[tokio::test(start_paused = true)]
    async fn queued_firing_is_stale_after_cancel() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut slot = TimerSlot::new();
        slot.arm(Duration::from_secs(1), &tx, |e| e);
        let fired = rx.recv().await.unwrap();

        slot.cancel();
        assert!(!slot.accept(fired));
    }
}
