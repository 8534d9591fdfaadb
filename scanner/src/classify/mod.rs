use async_trait::async_trait;
use live_scan_common::frame::EncodedImage;

pub mod food;
pub mod http;
pub mod vehicle;

pub use food::{FoodAnalysis, FoodItem, Macros};
pub use http::HttpClassifier;
pub use vehicle::VehicleSpotting;

#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("classifier unreachable: {0}")]
    Transport(String),
    #[error("classifier rejected the image: {0}")]
    Rejected(String),
    #[error("malformed classifier response: {0}")]
    Malformed(String),
}

/// Remote image classification for one scanning domain.
///
/// Implementations may be slow; the scan session guarantees at most one call
/// in flight and a minimum spacing between calls.
#[async_trait]
pub trait Classifier: Send + Sync + 'static {
    type Output: Clone + Send + Sync + std::fmt::Debug + 'static;

    /// Human-readable name for logging.
    fn name(&self) -> &str {
        "unnamed"
    }

    async fn classify(&self, image: EncodedImage) -> Result<Self::Output, ClassifyError>;
}
