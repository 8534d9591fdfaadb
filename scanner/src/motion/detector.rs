use live_scan_common::frame::Frame;

/// Scalar scene difference between two frames, 0 (identical) to 255.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionSample {
    pub level: f64,
}

/// Mean absolute luma difference between two equally sized frames.
///
/// Luma is the plain channel mean `(r + g + b) / 3`. Returns `None` when the
/// frames differ in size or are empty, since there is nothing to compare.
///
/// Meant for the tiny motion-sampling resolution. The motion threshold is
/// calibrated against that resolution, not against full frames.
pub fn compare(a: &Frame, b: &Frame) -> Option<MotionSample> {
    if !a.same_size(b) || a.is_empty() {
        return None;
    }
    let total: f64 = a.luma().zip(b.luma()).map(|(x, y)| (x - y).abs()).sum();
    Some(MotionSample {
        level: total / a.pixel_count() as f64,
    })
}
