use async_trait::async_trait;
use live_scan_common::frame::Frame;
use rxing::{Exceptions, RXingResult};
use serde::Serialize;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BarcodeFormat {
    QrCode,
    Ean13,
    Ean8,
    UpcA,
    UpcE,
    Code128,
    Code39,
    Code93,
    Itf,
    Codabar,
    DataMatrix,
    Pdf417,
    Aztec,
    Unknown,
}

impl BarcodeFormat {
    /// Every format the rxing decoder can report.
    pub const ALL: [BarcodeFormat; 13] = [
        BarcodeFormat::QrCode,
        BarcodeFormat::Ean13,
        BarcodeFormat::Ean8,
        BarcodeFormat::UpcA,
        BarcodeFormat::UpcE,
        BarcodeFormat::Code128,
        BarcodeFormat::Code39,
        BarcodeFormat::Code93,
        BarcodeFormat::Itf,
        BarcodeFormat::Codabar,
        BarcodeFormat::DataMatrix,
        BarcodeFormat::Pdf417,
        BarcodeFormat::Aztec,
    ];
}

impl From<&rxing::BarcodeFormat> for BarcodeFormat {
    fn from(format: &rxing::BarcodeFormat) -> Self {
        use rxing::BarcodeFormat as R;
        match format {
            R::QR_CODE => Self::QrCode,
            R::EAN_13 => Self::Ean13,
            R::EAN_8 => Self::Ean8,
            R::UPC_A => Self::UpcA,
            R::UPC_E => Self::UpcE,
            R::CODE_128 => Self::Code128,
            R::CODE_39 => Self::Code39,
            R::CODE_93 => Self::Code93,
            R::ITF => Self::Itf,
            R::CODABAR => Self::Codabar,
            R::DATA_MATRIX => Self::DataMatrix,
            R::PDF_417 => Self::Pdf417,
            R::AZTEC => Self::Aztec,
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BarcodeDetection {
    pub raw_value: String,
    pub format: BarcodeFormat,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("barcode decoder failed: {0}")]
    Decoder(String),
    #[error("barcode decode task failed: {0}")]
    Task(String),
}

/// Per-frame barcode detection.
///
/// Finding nothing is `Ok(vec![])`, the normal outcome for most frames.
#[async_trait]
pub trait BarcodeDecoder: Send + Sync + 'static {
    /// Formats this decoder can report, or `None` while it is still
    /// initialising.
    fn supported_formats(&self) -> Option<Vec<BarcodeFormat>>;

    async fn detect(&self, frame: Frame) -> Result<Vec<BarcodeDetection>, DecodeError>;
}

/// Multi-format decoder over `rxing`, run on the blocking pool.
pub struct RxingDecoder {
    formats: Vec<BarcodeFormat>,
}

impl RxingDecoder {
    pub fn new() -> Self {
        Self::with_formats(BarcodeFormat::ALL.to_vec())
    }

    /// Only report detections in `formats`.
    pub fn with_formats(formats: Vec<BarcodeFormat>) -> Self {
        Self { formats }
    }
}

impl Default for RxingDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BarcodeDecoder for RxingDecoder {
    fn supported_formats(&self) -> Option<Vec<BarcodeFormat>> {
        Some(self.formats.clone())
    }

    async fn detect(&self, frame: Frame) -> Result<Vec<BarcodeDetection>, DecodeError> {
        let detections = tokio::task::spawn_blocking(move || decode_frame(&frame))
            .await
            .map_err(|e| DecodeError::Task(e.to_string()))??;
        Ok(detections
            .into_iter()
            .filter(|d| self.formats.contains(&d.format))
            .collect())
    }
}

fn decode_frame(frame: &Frame) -> Result<Vec<BarcodeDetection>, DecodeError> {
    if frame.is_empty() {
        return Ok(Vec::new());
    }
    match rxing::helpers::detect_multiple_in_luma(frame.luma8(), frame.width, frame.height) {
        Ok(results) => Ok(results.iter().map(to_detection).collect()),
        Err(Exceptions::NotFoundException(_)) => Ok(Vec::new()),
        Err(e) => {
            debug!(error = %e, "rxing decode error");
            Err(DecodeError::Decoder(e.to_string()))
        }
    }
}

fn to_detection(result: &RXingResult) -> BarcodeDetection {
    let format = BarcodeFormat::from(result.getBarcodeFormat());
    if format == BarcodeFormat::Unknown {
        warn!(format = ?result.getBarcodeFormat(), "decoded barcode in unmapped format");
    }
    BarcodeDetection {
        raw_value: result.getText().to_string(),
        format,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_rxing_formats() {
        assert_eq!(BarcodeFormat::from(&rxing::BarcodeFormat::QR_CODE), BarcodeFormat::QrCode);
        assert_eq!(BarcodeFormat::from(&rxing::BarcodeFormat::EAN_13), BarcodeFormat::Ean13);
        assert_eq!(BarcodeFormat::from(&rxing::BarcodeFormat::UPC_A), BarcodeFormat::UpcA);
    }

    #[test]
    fn default_decoder_is_ready_with_all_formats() {
        let decoder = RxingDecoder::new();
        assert_eq!(decoder.supported_formats().unwrap().len(), BarcodeFormat::ALL.len());
    }

    #[test]
    fn detection_serializes_camel_case() {
        let d = BarcodeDetection {
            raw_value: "4006381333931".into(),
            format: BarcodeFormat::Ean13,
        };
        assert_eq!(
            serde_json::to_string(&d).unwrap(),
            r#"{"rawValue":"4006381333931","format":"ean13"}"#
        );
    }

    #[tokio::test]
    async fn blank_frame_has_no_barcodes() {
        let decoder = RxingDecoder::new();
        let detections = decoder.detect(Frame::solid(320, 240, 255)).await.unwrap();
        assert!(detections.is_empty());
    }
}
