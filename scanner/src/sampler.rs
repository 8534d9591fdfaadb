use std::io::Cursor;
use std::sync::Arc;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, RgbaImage};
use live_scan_common::config::SamplerConfig;
use live_scan_common::frame::{EncodedImage, Frame};
use tracing::{debug, warn};

/// A live video feed that can be polled for its most recent frame.
pub trait VideoSource: Send + Sync {
    /// Whether the source has produced at least one frame.
    fn is_ready(&self) -> bool;

    /// A copy of the most recent frame, or `None` before the first one arrives.
    fn current_frame(&self) -> Option<Frame>;
}

impl<T: VideoSource + ?Sized> VideoSource for Arc<T> {
    fn is_ready(&self) -> bool {
        (**self).is_ready()
    }

    fn current_frame(&self) -> Option<Frame> {
        (**self).current_frame()
    }
}

/// Frame capture as seen by the scanning logic.
///
/// Every method returns `None` when the source is not ready yet. That is the
/// normal state right after a camera opens, not an error.
pub trait FrameSampling: Send + Sync {
    /// Tiny fixed-resolution frame for motion comparison.
    fn sample_low_res(&self) -> Option<Frame>;

    /// Bounded-width JPEG for remote classification.
    fn sample_for_submission(&self) -> Option<EncodedImage>;

    /// Source-resolution frame for decoders.
    fn sample_frame(&self) -> Option<Frame>;
}

impl<T: FrameSampling + ?Sized> FrameSampling for Arc<T> {
    fn sample_low_res(&self) -> Option<Frame> {
        (**self).sample_low_res()
    }

    fn sample_for_submission(&self) -> Option<EncodedImage> {
        (**self).sample_for_submission()
    }

    fn sample_frame(&self) -> Option<Frame> {
        (**self).sample_frame()
    }
}

pub struct FrameSampler<S> {
    source: S,
    config: SamplerConfig,
}

impl<S: VideoSource> FrameSampler<S> {
    pub fn new(source: S, config: SamplerConfig) -> Self {
        Self { source, config }
    }

    fn grab(&self) -> Option<Frame> {
        if !self.source.is_ready() {
            return None;
        }
        self.source.current_frame().filter(|f| !f.is_empty())
    }
}

impl<S: VideoSource> FrameSampling for FrameSampler<S> {
    fn sample_low_res(&self) -> Option<Frame> {
        let frame = self.grab()?;
        let (captured_at_ms, seq) = (frame.captured_at_ms, frame.seq);
        let image = to_image(frame)?;
        let small = imageops::resize(
            &image,
            self.config.motion_width,
            self.config.motion_height,
            FilterType::Nearest,
        );
        from_image(small, captured_at_ms, seq)
    }

    fn sample_for_submission(&self) -> Option<EncodedImage> {
        let frame = self.grab()?;
        let captured_at_ms = frame.captured_at_ms;
        let (width, height) = fit_within(frame.width, frame.height, self.config.max_submission_width);
        let mut image = to_image(frame)?;
        if width != image.width() || height != image.height() {
            image = imageops::resize(&image, width, height, FilterType::Triangle);
        }

        match encode_jpeg(image, self.config.jpeg_quality) {
            Ok(bytes) => {
                debug!(width, height, bytes = bytes.len(), "encoded frame for submission");
                Some(EncodedImage {
                    bytes,
                    width,
                    height,
                    captured_at_ms,
                })
            }
            Err(e) => {
                warn!(error = %e, "failed to encode frame as JPEG, skipping");
                None
            }
        }
    }

    fn sample_frame(&self) -> Option<Frame> {
        self.grab()
    }
}

/// Proportionally shrink `width` x `height` so the width is at most `max_width`.
/// Never upscales; dimensions never collapse to zero.
pub fn fit_within(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width || width == 0 {
        return (width, height);
    }
    let scaled = (height as u64 * max_width as u64 + width as u64 / 2) / width as u64;
    (max_width, (scaled as u32).max(1))
}

fn to_image(frame: Frame) -> Option<RgbaImage> {
    RgbaImage::from_raw(frame.width, frame.height, frame.rgba)
}

fn from_image(image: RgbaImage, captured_at_ms: i64, seq: u64) -> Option<Frame> {
    let (width, height) = image.dimensions();
    Frame::new(width, height, image.into_raw(), captured_at_ms, seq).ok()
}

fn encode_jpeg(image: RgbaImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    // JPEG has no alpha channel.
    let rgb = DynamicImage::ImageRgba8(image).to_rgb8();
    let mut buf = Cursor::new(Vec::new());
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(&rgb)?;
    Ok(buf.into_inner())
}
