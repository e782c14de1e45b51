//! Per-job pause gate and cancellation token.
//!
//! Every worker and progress emitter of a job holds the same `DownloadGate`.
//! `checkpoint` is awaited at each suspension point: it returns immediately
//! while the job runs, parks while the job is paused, and errors once the job
//! is cancelled. Cancelling also opens the gate so parked waiters observe the
//! flag and unwind.

use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::watch;

/// Error returned when a download is stopped by user cancellation.
#[derive(Debug)]
pub struct JobAborted;

impl std::fmt::Display for JobAborted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job aborted by user")
    }
}

impl std::error::Error for JobAborted {}

/// Shared pause/cancel state for one job.
pub struct DownloadGate {
    cancelled: AtomicBool,
    running: watch::Sender<bool>,
}

impl DownloadGate {
    /// Create a gate; `running = false` starts it in the parked (paused) state.
    pub fn new(running: bool) -> Self {
        let (tx, _rx) = watch::channel(running);
        Self {
            cancelled: AtomicBool::new(false),
            running: tx,
        }
    }

    /// Park workers at their next suspension point.
    pub fn pause(&self) {
        self.running.send_replace(false);
    }

    /// Unpark all waiters.
    pub fn resume(&self) {
        self.running.send_replace(true);
    }

    /// Set the cancellation flag and open the gate so paused workers see it.
    /// Once set the flag stays set.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
        self.running.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    pub fn is_paused(&self) -> bool {
        !*self.running.borrow()
    }

    /// Suspension point: returns `Err(JobAborted)` when cancelled, waits while
    /// paused, and returns `Ok` while the job is running.
    pub async fn checkpoint(&self) -> Result<(), JobAborted> {
        if self.is_cancelled() {
            return Err(JobAborted);
        }
        let mut rx = self.running.subscribe();
        loop {
            if self.is_cancelled() {
                return Err(JobAborted);
            }
            if *rx.borrow_and_update() {
                return Ok(());
            }
            if rx.changed().await.is_err() {
                return Err(JobAborted);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn checkpoint_passes_while_running() {
        let gate = DownloadGate::new(true);
        assert!(gate.checkpoint().await.is_ok());
        assert!(!gate.is_paused());
    }

    #[tokio::test]
    async fn checkpoint_parks_until_resumed() {
        let gate = Arc::new(DownloadGate::new(true));
        gate.pause();
        assert!(gate.is_paused());

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.checkpoint().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        gate.resume();
        let r = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should unpark")
            .unwrap();
        assert!(r.is_ok());
    }

    #[tokio::test]
    async fn cancel_unparks_paused_waiters() {
        let gate = Arc::new(DownloadGate::new(true));
        gate.pause();

        let waiter = {
            let gate = Arc::clone(&gate);
            tokio::spawn(async move { gate.checkpoint().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        gate.cancel();

        let r = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should unpark")
            .unwrap();
        assert!(r.is_err());
        assert!(gate.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_is_sticky() {
        let gate = DownloadGate::new(true);
        gate.cancel();
        gate.resume();
        assert!(gate.is_cancelled());
        assert!(gate.checkpoint().await.is_err());
    }
}
