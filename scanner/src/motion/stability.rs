use live_scan_common::config::MotionConfig;
use live_scan_common::frame::Frame;
use tracing::debug;

use super::detector::{compare, MotionSample};

/// How a motion sample relates to the calibrated threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Motion {
    /// At or below the threshold.
    Still,
    /// Above the threshold.
    Moving,
    /// Above `unlock_factor` times the threshold; large enough to invalidate a
    /// locked reading.
    Disturbance,
}

/// Baseline-frame bookkeeping and the stillness rules.
///
/// The consecutive-stable counter itself lives in the scan phase (only a
/// waiting session accrues stillness), so the tracker only answers questions
/// about samples and counts.
pub struct StabilityTracker {
    threshold: f64,
    stability_frames: u32,
    unlock_factor: f64,
    baseline: Option<Frame>,
}

impl StabilityTracker {
    pub fn new(config: &MotionConfig) -> Self {
        Self {
            threshold: config.threshold,
            stability_frames: config.stability_frames,
            unlock_factor: config.unlock_factor,
            baseline: None,
        }
    }

    /// Compare `frame` with the previous one and make it the new baseline.
    ///
    /// The first frame only establishes the baseline. A frame whose size
    /// differs from the baseline (camera switched resolution) does the same.
    pub fn observe(&mut self, frame: Frame) -> Option<MotionSample> {
        let sample = match &self.baseline {
            None => {
                debug!("first motion sample, establishing baseline");
                None
            }
            Some(prev) => {
                let sample = compare(prev, &frame);
                if sample.is_none() {
                    debug!(
                        width = frame.width,
                        height = frame.height,
                        "frame size changed, re-establishing baseline"
                    );
                }
                sample
            }
        };
        self.baseline = Some(frame);
        sample
    }

    pub fn assess(&self, sample: MotionSample) -> Motion {
        if sample.level > self.threshold * self.unlock_factor {
            Motion::Disturbance
        } else if sample.level > self.threshold {
            Motion::Moving
        } else {
            Motion::Still
        }
    }

    /// Whether `stable_count` consecutive still samples justify a scan.
    pub fn is_stable(&self, stable_count: u32) -> bool {
        stable_count >= self.stability_frames
    }

    pub fn stability_frames(&self) -> u32 {
        self.stability_frames
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn reset(&mut self) {
        self.baseline = None;
    }
}
