use bytes::BytesMut;
use chrono::Utc;
use futures_util::StreamExt;
use live_scan_common::frame::{Frame, FrameError};
use live_scan_scanner::sampler::VideoSource;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";

const INITIAL_BACKOFF: Duration = Duration::from_secs(2);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP connection failed: {0}")]
    HttpConnect(reqwest::Error),
    #[error("HTTP stream error: {0}")]
    HttpStream(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(u16),
    #[error("failed to decode JPEG: {0}")]
    Decode(#[from] image::ImageError),
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// The most recent decoded camera frame, shared between the stream task and
/// the samplers.
pub struct LatestFrame {
    tx: watch::Sender<Option<Frame>>,
}

impl LatestFrame {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn publish(&self, frame: Frame) {
        self.tx.send_replace(Some(frame));
    }

    /// Wait until the first frame has arrived.
    pub async fn ready(&self) {
        let mut rx = self.tx.subscribe();
        // sender is owned by self, so the channel never closes
        let _ = rx.wait_for(Option::is_some).await;
    }
}

impl Default for LatestFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl VideoSource for LatestFrame {
    fn is_ready(&self) -> bool {
        self.tx.borrow().is_some()
    }

    fn current_frame(&self) -> Option<Frame> {
        self.tx.borrow().clone()
    }
}

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental splitter for `multipart/x-mixed-replace` MJPEG bodies.
pub struct MjpegParser {
    buffer: BytesMut,
    state: ParseState,
    scan_from: usize,
}

impl MjpegParser {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            scan_from: 0,
        }
    }

    /// Feed one network chunk; returns every JPEG body it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Vec<u8>> {
        self.buffer.extend_from_slice(chunk);
        let mut jpegs = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // Keep a tail in case the boundary spans chunks
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.scan_from = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    if let Some(pos) = find_subsequence(&self.buffer[self.scan_from..], BOUNDARY) {
                        let jpeg_end = self.scan_from + pos;
                        // Strip trailing \r\n before boundary
                        let end = if jpeg_end >= 2
                            && self.buffer[jpeg_end - 2] == b'\r'
                            && self.buffer[jpeg_end - 1] == b'\n'
                        {
                            jpeg_end - 2
                        } else {
                            jpeg_end
                        };
                        let jpeg = self.buffer[..end].to_vec();
                        let _ = self.buffer.split_to(jpeg_end + BOUNDARY.len());
                        if !jpeg.is_empty() {
                            jpegs.push(jpeg);
                        }
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        self.scan_from = self.buffer.len().saturating_sub(BOUNDARY.len());
                        break;
                    }
                }
            }
        }
        jpegs
    }
}

impl Default for MjpegParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Decode a JPEG into an RGBA frame stamped with the current time.
pub fn decode_jpeg(jpeg: &[u8], seq: u64) -> Result<Frame, SourceError> {
    let rgba = image::load_from_memory(jpeg)?.to_rgba8();
    let (width, height) = rgba.dimensions();
    Ok(Frame::new(
        width,
        height,
        rgba.into_raw(),
        Utc::now().timestamp_millis(),
        seq,
    )?)
}

/// Follow the MJPEG stream forever, publishing each decoded frame.
/// Reconnects with exponential backoff on failure.
pub async fn run_mjpeg_source(stream_url: &str, latest: &LatestFrame) {
    let mut backoff = INITIAL_BACKOFF;
    let mut seq: u64 = 0;

    loop {
        info!(url = stream_url, "connecting to MJPEG stream");
        match consume_stream(stream_url, latest, &mut seq).await {
            Ok(()) => {
                info!("stream ended cleanly, reconnecting");
                backoff = INITIAL_BACKOFF;
            }
            Err(e) => {
                error!(error = %e, "stream error, reconnecting in {:?}", backoff);
            }
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn consume_stream(url: &str, latest: &LatestFrame, seq: &mut u64) -> Result<(), SourceError> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(SourceError::HttpConnect)?;
    let response = client.get(url).send().await.map_err(SourceError::HttpConnect)?;

    if !response.status().is_success() {
        return Err(SourceError::HttpStatus(response.status().as_u16()));
    }

    info!(status = %response.status(), "connected to MJPEG stream");

    let mut byte_stream = response.bytes_stream();
    let mut parser = MjpegParser::new();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(SourceError::HttpStream)?;
        for jpeg in parser.push(&chunk) {
            *seq += 1;
            match decode_jpeg(&jpeg, *seq) {
                Ok(frame) => {
                    debug!(seq = *seq, width = frame.width, height = frame.height, "frame received");
                    latest.publish(frame);
                }
                Err(e) => warn!(error = %e, seq = *seq, bytes = jpeg.len(), "dropping undecodable frame"),
            }
        }
    }

    Ok(())
}

/// Polling-based fallback: periodically fetch single frames.
pub async fn run_polling_source(frame_url: &str, latest: &LatestFrame, interval: Duration) {
    let client = reqwest::Client::new();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut seq: u64 = 0;

    loop {
        ticker.tick().await;

        match client.get(frame_url).send().await {
            Ok(resp) if resp.status().is_success() => {
                let jpeg = match resp.bytes().await {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        warn!(error = %e, "failed to read camera frame body");
                        continue;
                    }
                };
                seq += 1;
                match decode_jpeg(&jpeg, seq) {
                    Ok(frame) => latest.publish(frame),
                    Err(e) => warn!(error = %e, seq, "dropping undecodable frame"),
                }
            }
            Ok(resp) => {
                warn!(status = %resp.status(), "non-success response from camera");
            }
            Err(e) => {
                warn!(error = %e, "failed to fetch camera frame");
            }
        }
    }
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
