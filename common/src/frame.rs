/// A single RGBA8 camera frame with capture metadata.
///
/// Pixel layout is tightly packed rows of `[r, g, b, a]`, so
/// `rgba.len() == width * height * 4` always holds for a constructed frame.
/// Frames are plain owned values: samplers hand out copies, never views into
/// a buffer that the next draw would overwrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
    pub captured_at_ms: i64,
    pub seq: u64,
}

const BYTES_PER_PIXEL: usize = 4;

impl Frame {
    pub fn new(
        width: u32,
        height: u32,
        rgba: Vec<u8>,
        captured_at_ms: i64,
        seq: u64,
    ) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize * BYTES_PER_PIXEL;
        if rgba.len() != expected {
            return Err(FrameError::BufferSize {
                got: rgba.len(),
                expected,
            });
        }
        Ok(Self {
            width,
            height,
            rgba,
            captured_at_ms,
            seq,
        })
    }

    /// A uniform opaque gray frame.
    pub fn solid(width: u32, height: u32, gray: u8) -> Self {
        let pixels = width as usize * height as usize;
        let mut rgba = Vec::with_capacity(pixels * BYTES_PER_PIXEL);
        for _ in 0..pixels {
            rgba.extend_from_slice(&[gray, gray, gray, 255]);
        }
        Self {
            width,
            height,
            rgba,
            captured_at_ms: chrono::Utc::now().timestamp_millis(),
            seq: 0,
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.pixel_count() == 0
    }

    pub fn same_size(&self, other: &Frame) -> bool {
        self.width == other.width && self.height == other.height
    }

    /// Per-pixel luma as the plain channel mean `(r + g + b) / 3`, alpha ignored.
    pub fn luma(&self) -> impl Iterator<Item = f64> + '_ {
        self.rgba
            .chunks_exact(BYTES_PER_PIXEL)
            .map(|px| (px[0] as f64 + px[1] as f64 + px[2] as f64) / 3.0)
    }

    /// Integer luma plane, one byte per pixel, for decoders that want grayscale input.
    pub fn luma8(&self) -> Vec<u8> {
        self.rgba
            .chunks_exact(BYTES_PER_PIXEL)
            .map(|px| ((px[0] as u16 + px[1] as u16 + px[2] as u16) / 3) as u8)
            .collect()
    }
}

/// A compressed frame ready to be submitted to a remote classifier.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at_ms: i64,
}

impl EncodedImage {
    pub fn content_type(&self) -> &'static str {
        "image/jpeg"
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame buffer has {got} bytes, expected {expected}")]
    BufferSize { got: usize, expected: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_rejects_wrong_buffer_length() {
        let result = Frame::new(2, 2, vec![0; 15], 0, 0);
        assert!(matches!(
            result,
            Err(FrameError::BufferSize { got: 15, expected: 16 })
        ));
    }

    #[test]
    fn solid_frame_has_uniform_luma() {
        let frame = Frame::solid(4, 3, 120);
        assert_eq!(frame.pixel_count(), 12);
        assert!(frame.luma().all(|l| l == 120.0));
        assert!(frame.luma8().iter().all(|&l| l == 120));
    }

    #[test]
    fn luma_averages_channels_and_ignores_alpha() {
        let frame = Frame::new(1, 1, vec![30, 60, 90, 0], 1708300000000, 7).unwrap();
        assert_eq!(frame.luma().collect::<Vec<_>>(), vec![60.0]);
        assert_eq!(frame.seq, 7);
    }

    #[test]
    fn zero_sized_frame_is_empty() {
        let frame = Frame::new(0, 10, Vec::new(), 0, 0).unwrap();
        assert!(frame.is_empty());
    }

    #[test]
    fn encoded_image_is_jpeg() {
        let image = EncodedImage {
            bytes: vec![0xFF, 0xD8, 0xFF, 0xE0],
            width: 1,
            height: 1,
            captured_at_ms: 0,
        };
        assert_eq!(image.content_type(), "image/jpeg");
        assert_eq!(image.len(), 4);
    }
}
