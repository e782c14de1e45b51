//! Rolling bandwidth samples used by the segment planner.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// Samples retained for adaptive planning.
const MAX_SAMPLES: usize = 10;

/// Records throughput of completed jobs (bytes/sec), newest last.
#[derive(Default)]
pub struct BandwidthTracker {
    samples: Mutex<VecDeque<f64>>,
}

impl BandwidthTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one completed transfer. Zero-length or instantaneous transfers
    /// are ignored.
    pub fn record(&self, bytes: u64, elapsed: Duration) {
        let secs = elapsed.as_secs_f64();
        if bytes == 0 || secs <= 0.0 {
            return;
        }
        let mut samples = self.samples.lock().unwrap();
        samples.push_back(bytes as f64 / secs);
        while samples.len() > MAX_SAMPLES {
            samples.pop_front();
        }
    }

    pub fn samples(&self) -> Vec<f64> {
        self.samples.lock().unwrap().iter().copied().collect()
    }
}
