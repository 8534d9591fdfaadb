pub mod detector;
pub mod stability;

pub use detector::{compare, MotionSample};
pub use stability::{Motion, StabilityTracker};
