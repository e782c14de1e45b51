//! Per-job rate limiting of progress broadcasts.

use std::time::{Duration, Instant};

/// Tracks the last emission instant for one job.
pub(super) struct ProgressThrottle {
    last_emit: Option<Instant>,
    min_interval: Duration,
}

impl ProgressThrottle {
    pub(super) fn new(min_interval: Duration) -> Self {
        Self {
            last_emit: None,
            min_interval,
        }
    }

    /// True when the interval since the previous emission has elapsed; stamps
    /// the emission time on success.
    pub(super) fn should_emit(&mut self) -> bool {
        let now = Instant::now();
        match self.last_emit {
            Some(last) if now.duration_since(last) < self.min_interval => false,
            _ => {
                self.last_emit = Some(now);
                true
            }
        }
    }

    /// Stamp an emission that bypassed the throttle (status transitions), so
    /// following throttled updates measure from it.
    pub(super) fn mark(&mut self) {
        self.last_emit = Some(Instant::now());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_emit_always_passes() {
        let mut t = ProgressThrottle::new(Duration::from_millis(100));
        assert!(t.should_emit());
        assert!(!t.should_emit());
    }

    #[test]
    fn emits_again_after_interval() {
        let mut t = ProgressThrottle::new(Duration::from_millis(30));
        assert!(t.should_emit());
        std::thread::sleep(Duration::from_millis(40));
        assert!(t.should_emit());
    }

    #[test]
    fn mark_counts_as_emission() {
        let mut t = ProgressThrottle::new(Duration::from_millis(100));
        t.mark();
        assert!(!t.should_emit());
    }
}
