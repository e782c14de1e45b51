//! Multi-subscriber fan-out of progress snapshots.
//!
//! Subscribers receive serialised snapshots over bounded channels; a
//! subscriber that cannot accept a message is dropped. Non-terminal
//! `downloading` updates are throttled per job; status transitions always go
//! out. A fresh subscriber is brought up to date with the latest snapshot of
//! every live job.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::mpsc;

use super::throttle::ProgressThrottle;
use super::ProgressSnapshot;
use crate::store::JobStatus;

/// Queue depth per subscriber; a sink this far behind is considered failed.
const SUBSCRIBER_QUEUE: usize = 64;

pub struct ProgressBus {
    throttle_interval: Duration,
    inner: Mutex<BusInner>,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    subscribers: Vec<Subscriber>,
    jobs: HashMap<String, JobTrack>,
}

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<String>,
}

struct JobTrack {
    throttle: ProgressThrottle,
    last_status: Option<JobStatus>,
    latest: ProgressSnapshot,
}

/// Handle returned by `subscribe`; dropping the receiver unsubscribes on the
/// next publish.
pub struct Subscription {
    id: u64,
    pub rx: mpsc::Receiver<String>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl ProgressBus {
    pub fn new(throttle_interval: Duration) -> Self {
        Self {
            throttle_interval,
            inner: Mutex::new(BusInner::default()),
        }
    }

    /// Register a subscriber and replay the latest snapshot of every live job.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);
        let mut inner = self.inner.lock().unwrap();
        inner.next_id += 1;
        let id = inner.next_id;

        for track in inner.jobs.values() {
            if track.latest.status.is_active() {
                if let Ok(message) = serde_json::to_string(&track.latest) {
                    let _ = tx.try_send(message);
                }
            }
        }

        inner.subscribers.push(Subscriber { id, tx });
        Subscription { id, rx }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.inner.lock().unwrap().subscribers.retain(|s| s.id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().unwrap().subscribers.len()
    }

    /// Deliver a snapshot to all subscribers, subject to per-job throttling.
    pub fn publish(&self, snapshot: &ProgressSnapshot) {
        let mut inner = self.inner.lock().unwrap();

        let throttle_interval = self.throttle_interval;
        let track = inner
            .jobs
            .entry(snapshot.job_id.clone())
            .or_insert_with(|| JobTrack {
                throttle: ProgressThrottle::new(throttle_interval),
                last_status: None,
                latest: snapshot.clone(),
            });

        // Only a repeated `downloading` tick is throttleable; every status
        // transition (paused, terminal, the first downloading) goes out.
        let repeat_tick = snapshot.status == JobStatus::Downloading
            && track.last_status == Some(JobStatus::Downloading);

        track.latest = snapshot.clone();
        track.last_status = Some(snapshot.status);

        if repeat_tick {
            if !track.throttle.should_emit() {
                return;
            }
        } else {
            track.throttle.mark();
        }

        let message = match serde_json::to_string(snapshot) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("progress snapshot serialisation failed: {}", e);
                return;
            }
        };

        inner
            .subscribers
            .retain(|s| match s.tx.try_send(message.clone()) {
                Ok(()) => true,
                Err(_) => {
                    tracing::debug!("dropping unresponsive progress subscriber {}", s.id);
                    false
                }
            });
    }

    /// Forget a job's replay state (called when the job is deleted).
    pub fn forget_job(&self, job_id: &str) {
        self.inner.lock().unwrap().jobs.remove(job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn snapshot(job_id: &str, status: JobStatus, downloaded: u64) -> ProgressSnapshot {
        ProgressSnapshot {
            job_id: job_id.to_string(),
            filename: format!("{job_id}.mp4"),
            title: None,
            cover_url: None,
            url: "http://e/v".to_string(),
            total_size: 1000,
            downloaded,
            status,
            speed: 0.0,
            error_message: None,
            retry_count: 0,
            max_retries: 3,
            created_at: Utc::now(),
            completed_at: None,
            segments: None,
        }
    }

    fn drain(sub: &mut Subscription) -> Vec<serde_json::Value> {
        let mut out = Vec::new();
        while let Ok(m) = sub.rx.try_recv() {
            out.push(serde_json::from_str(&m).unwrap());
        }
        out
    }

    #[tokio::test]
    async fn delivers_to_all_subscribers() {
        let bus = ProgressBus::new(Duration::from_millis(100));
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(&snapshot("j", JobStatus::Downloading, 10));
        assert_eq!(drain(&mut a).len(), 1);
        assert_eq!(drain(&mut b).len(), 1);
    }

    #[tokio::test]
    async fn repeated_downloading_ticks_are_throttled() {
        let bus = ProgressBus::new(Duration::from_secs(60));
        let mut sub = bus.subscribe();

        bus.publish(&snapshot("j", JobStatus::Downloading, 10));
        bus.publish(&snapshot("j", JobStatus::Downloading, 20));
        bus.publish(&snapshot("j", JobStatus::Downloading, 30));

        let got = drain(&mut sub);
        assert_eq!(got.len(), 1, "only the first downloading tick passes");
        assert_eq!(got[0]["downloaded"], 10);
    }

    #[tokio::test]
    async fn status_transitions_bypass_throttle() {
        let bus = ProgressBus::new(Duration::from_secs(60));
        let mut sub = bus.subscribe();

        bus.publish(&snapshot("j", JobStatus::Downloading, 10));
        bus.publish(&snapshot("j", JobStatus::Paused, 10));
        bus.publish(&snapshot("j", JobStatus::Downloading, 10));
        bus.publish(&snapshot("j", JobStatus::Completed, 1000));

        let got = drain(&mut sub);
        let statuses: Vec<_> = got.iter().map(|v| v["status"].as_str().unwrap().to_string()).collect();
        assert_eq!(statuses, ["downloading", "paused", "downloading", "completed"]);
    }

    #[tokio::test]
    async fn new_subscriber_sees_latest_active_snapshots() {
        let bus = ProgressBus::new(Duration::from_millis(100));
        bus.publish(&snapshot("live", JobStatus::Downloading, 42));
        bus.publish(&snapshot("done", JobStatus::Completed, 1000));

        let mut late = bus.subscribe();
        let got = drain(&mut late);
        assert_eq!(got.len(), 1);
        assert_eq!(got[0]["job_id"], "live");
        assert_eq!(got[0]["downloaded"], 42);
    }

    #[tokio::test]
    async fn dead_subscribers_are_removed() {
        let bus = ProgressBus::new(Duration::from_millis(100));
        let sub = bus.subscribe();
        drop(sub.rx);

        bus.publish(&snapshot("j", JobStatus::Downloading, 1));
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn forget_job_stops_replay() {
        let bus = ProgressBus::new(Duration::from_millis(100));
        bus.publish(&snapshot("j", JobStatus::Downloading, 1));
        bus.forget_job("j");

        let mut late = bus.subscribe();
        assert!(drain(&mut late).is_empty());
    }
}
