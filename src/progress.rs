//! Wall-clock throttling of progress notifications.

use std::time::{Duration, Instant};

pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_millis(500);

/// Allows at most one emission per `interval`. The first check always passes.
///
/// Time is passed in by the caller so the throttle can be driven by a fake clock.
#[derive(Clone, Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last_emit: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emit: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_emit(&self) -> Option<Instant> {
        self.last_emit
    }

    pub fn should_emit(&self, now: Instant) -> bool {
        match self.last_emit {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    pub fn mark_emitted(&mut self, now: Instant) {
        self.last_emit = Some(now);
    }

    /// `should_emit` followed by `mark_emitted` when it passes.
    pub fn try_emit(&mut self, now: Instant) -> bool {
        if self.should_emit(now) {
            self.mark_emitted(now);
            true
        } else {
            false
        }
    }
}

impl Default for ProgressThrottle {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRESS_INTERVAL)
    }
}

/// Percentage of `total` reached after `processed` frames, clamped to `[0, 100]`.
/// `None` when the total is unknown.
pub fn progress_percent(processed: u64, total: u64) -> Option<f64> {
    if total == 0 {
        return None;
    }
    Some((processed as f64 / total as f64 * 100.0).clamp(0.0, 100.0))
}
