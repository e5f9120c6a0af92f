//! # timer
//!
//! why: detect a silent leader with a randomized, restartable election timeout
//! relations: restarted by follower/candidate processors, events consumed by mode/manager.rs
//! what: RaftElectionTimer, ElectionTimeout

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::config::RaftTimerInterval;

/// Emitted when an armed election timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElectionTimeout {
    pub generation: u64,
}

/// Single-shot election timer.
///
/// Firing never calls into the engine directly: it only pushes an [`ElectionTimeout`]
/// onto a channel drained by the mode manager. Each arming gets a new generation so
/// an event that raced a `restart`/`cancel` can be recognised as stale.
pub struct RaftElectionTimer {
    interval: RaftTimerInterval,
    events: mpsc::UnboundedSender<ElectionTimeout>,
    generation: AtomicU64,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl RaftElectionTimer {
    pub fn new(interval: RaftTimerInterval, events: mpsc::UnboundedSender<ElectionTimeout>) -> Self {
        Self {
            interval,
            events,
            generation: AtomicU64::new(0),
            pending: Mutex::new(None),
        }
    }

    /// Cancels the current timer and starts a new one, returning the chosen delay in ms.
    ///
    /// Must be called from within a tokio runtime.
    pub fn restart(&self) -> u64 {
        let mut pending = self.pending.lock();
        if let Some(task) = pending.take() {
            task.abort();
        }

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let delay_ms = rand::thread_rng()
            .gen_range(self.interval.minimum_ms..=self.interval.maximum_ms);
        let events = self.events.clone();

        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            // receiver gone means the server is shutting down
            let _ = events.send(ElectionTimeout { generation });
        }));

        tracing::trace!(generation, delay_ms, "election timer armed");
        delay_ms
    }

    /// Cancels the current timer without rescheduling. Safe to call when nothing is armed.
    pub fn cancel(&self) {
        let mut pending = self.pending.lock();
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(task) = pending.take() {
            task.abort();
            tracing::trace!("election timer canceled");
        }
    }

    /// Whether `timeout` came from the most recent arming of this timer.
    pub fn is_current(&self, timeout: &ElectionTimeout) -> bool {
        self.generation.load(Ordering::SeqCst) == timeout.generation
    }
}

impl Drop for RaftElectionTimer {
    fn drop(&mut self) {
        if let Some(task) = self.pending.get_mut().take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer() -> (RaftElectionTimer, mpsc::UnboundedReceiver<ElectionTimeout>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let interval = RaftTimerInterval {
            minimum_ms: 150,
            maximum_ms: 300,
        };
        (RaftElectionTimer::new(interval, tx), rx)
    }

    #[tokio::test(start_paused = true)]
    async fn restart_delay_is_within_bounds() {
        let (timer, _rx) = timer();
        for _ in 0..50 {
            let delay = timer.restart();
            assert!((150..=300).contains(&delay));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_after_delay() {
        let (timer, mut rx) = timer();
        let delay = timer.restart();

        tokio::time::sleep(Duration::from_millis(delay - 1)).await;
        assert!(rx.try_recv().is_err());

        let event = rx.recv().await.unwrap();
        assert!(timer.is_current(&event));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_suppresses_firing() {
        let (timer, mut rx) = timer();
        timer.restart();
        timer.cancel();
        timer.cancel();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn restart_makes_earlier_events_stale() {
        let (timer, mut rx) = timer();
        timer.restart();
        tokio::time::sleep(Duration::from_millis(350)).await;
        let fired = rx.recv().await.unwrap();

        timer.restart();
        assert!(!timer.is_current(&fired));
    }

    #[test]
    fn cancel_without_runtime_or_pending_timer() {
        let (timer, _rx) = timer();
        timer.cancel();
    }
}
