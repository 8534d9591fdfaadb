use std::time::Duration;

use tokio::time::Instant;

/// Duplicate suppression for decoded values.
///
/// A value is reported only when no cooldown window is open and it differs
/// from the last reported value. Every report opens a new window, during
/// which all detections are ignored, distinct values included.
#[derive(Debug)]
pub struct DetectionCooldown {
    window: Duration,
    last_value: Option<String>,
    last_reported_at: Option<Instant>,
}

impl DetectionCooldown {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_value: None,
            last_reported_at: None,
        }
    }

    pub fn is_cooling(&self, now: Instant) -> bool {
        self.last_reported_at
            .is_some_and(|at| now.saturating_duration_since(at) < self.window)
    }

    /// Whether `value` seen at `now` should be reported. Records it if so.
    pub fn offer(&mut self, value: &str, now: Instant) -> bool {
        if self.is_cooling(now) {
            return false;
        }
        if self.last_value.as_deref() == Some(value) {
            return false;
        }
        self.last_value = Some(value.to_string());
        self.last_reported_at = Some(now);
        true
    }

    pub fn last_value(&self) -> Option<&str> {
        self.last_value.as_deref()
    }

    pub fn reset(&mut self) {
        self.last_value = None;
        self.last_reported_at = None;
    }
}
