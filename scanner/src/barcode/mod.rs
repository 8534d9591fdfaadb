mod cooldown;
mod decoder;

pub use cooldown::DetectionCooldown;
pub use decoder::{BarcodeDecoder, BarcodeDetection, BarcodeFormat, DecodeError, RxingDecoder};

use std::sync::Arc;
use std::time::Duration;

use live_scan_common::config::BarcodeConfig;
use serde::Serialize;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::sampler::FrameSampling;

const DETECTION_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BarcodeStatus {
    Idle,
    Initializing,
    Scanning,
    /// The decoder cannot run here. Terminal; the caller should offer
    /// manual entry instead.
    Unsupported,
}

#[derive(Debug, Clone, Serialize)]
pub struct BarcodeSnapshot {
    pub status: BarcodeStatus,
    pub last: Option<BarcodeDetection>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BarcodeStartError {
    #[error("barcode decoder supports no formats")]
    Unsupported,
    #[error("barcode decoder did not finish initialising")]
    NotInitialized,
}

/// Continuous per-frame barcode decoding with duplicate suppression.
///
/// While started, grabs a full-resolution frame every `frame_interval` and
/// runs the decoder on it. A reported value opens a cooldown window during
/// which no frames are captured at all.
pub struct BarcodeScanner<D, S> {
    shared: Arc<Shared<D, S>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

struct Shared<D, S> {
    decoder: D,
    sampler: S,
    frame_interval: Duration,
    cooldown: Mutex<DetectionCooldown>,
    init_retry_delay: Duration,
    snapshots: watch::Sender<BarcodeSnapshot>,
    detections: broadcast::Sender<BarcodeDetection>,
}

impl<D, S> BarcodeScanner<D, S>
where
    D: BarcodeDecoder,
    S: FrameSampling + 'static,
{
    pub fn new(decoder: D, sampler: S, config: &BarcodeConfig) -> Self {
        let (snapshots, _) = watch::channel(BarcodeSnapshot {
            status: BarcodeStatus::Idle,
            last: None,
        });
        let (detections, _) = broadcast::channel(DETECTION_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                decoder,
                sampler,
                frame_interval: config.frame_interval(),
                cooldown: Mutex::new(DetectionCooldown::new(config.cooldown())),
                init_retry_delay: config.init_retry_delay(),
                snapshots,
                detections,
            }),
            worker: Mutex::new(None),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<BarcodeSnapshot> {
        self.shared.snapshots.subscribe()
    }

    pub fn detections(&self) -> broadcast::Receiver<BarcodeDetection> {
        self.shared.detections.subscribe()
    }

    pub fn snapshot(&self) -> BarcodeSnapshot {
        self.shared.snapshots.borrow().clone()
    }

    pub fn status(&self) -> BarcodeStatus {
        self.shared.snapshots.borrow().status
    }

    /// Begin decoding frames. No-op if already scanning.
    ///
    /// A decoder still initialising gets one retry after `init_retry_delay`.
    /// Failing that, or reporting no formats, the scanner becomes
    /// [`BarcodeStatus::Unsupported`] for good.
    pub async fn start(&self) -> Result<(), BarcodeStartError> {
        let mut worker = self.worker.lock().await;
        match self.status() {
            BarcodeStatus::Scanning => return Ok(()),
            BarcodeStatus::Unsupported => return Err(BarcodeStartError::Unsupported),
            BarcodeStatus::Idle | BarcodeStatus::Initializing => {}
        }
        self.shared.set_status(BarcodeStatus::Initializing);

        let formats = match self.shared.decoder.supported_formats() {
            Some(formats) => formats,
            None => {
                debug!(
                    delay_ms = self.shared.init_retry_delay.as_millis() as u64,
                    "barcode decoder not ready, retrying once"
                );
                tokio::time::sleep(self.shared.init_retry_delay).await;
                match self.shared.decoder.supported_formats() {
                    Some(formats) => formats,
                    None => {
                        warn!("barcode decoder never initialised, scanning unsupported");
                        self.shared.set_status(BarcodeStatus::Unsupported);
                        return Err(BarcodeStartError::NotInitialized);
                    }
                }
            }
        };
        if formats.is_empty() {
            warn!("barcode decoder supports no formats, scanning unsupported");
            self.shared.set_status(BarcodeStatus::Unsupported);
            return Err(BarcodeStartError::Unsupported);
        }

        let mut cooldown = self.shared.cooldown.lock().await;
        if let Some(previous) = cooldown.last_value() {
            debug!(previous, "forgetting last reported barcode");
        }
        cooldown.reset();
        drop(cooldown);
        self.shared.snapshots.send_modify(|s| {
            s.status = BarcodeStatus::Scanning;
            s.last = None;
        });
        info!(formats = ?formats, "barcode scanning started");

        let shared = Arc::clone(&self.shared);
        *worker = Some(tokio::spawn(async move { shared.run().await }));
        Ok(())
    }

    /// Stop decoding. Safe to call repeatedly; an unsupported scanner stays
    /// unsupported.
    pub async fn stop(&self) {
        let handle = self.worker.lock().await.take();
        let Some(handle) = handle else {
            return;
        };
        handle.abort();
        if self.status() == BarcodeStatus::Scanning {
            self.shared.set_status(BarcodeStatus::Idle);
            info!("barcode scanning stopped");
        }
    }
}

impl<D, S> Drop for BarcodeScanner<D, S> {
    fn drop(&mut self) {
        if let Some(handle) = self.worker.get_mut().take() {
            handle.abort();
        }
    }
}

impl<D, S> Shared<D, S>
where
    D: BarcodeDecoder,
    S: FrameSampling + 'static,
{
    fn set_status(&self, status: BarcodeStatus) {
        self.snapshots.send_modify(|s| s.status = status);
    }

    async fn run(&self) {
        let mut ticker = tokio::time::interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            self.scan_frame().await;
        }
    }

    async fn scan_frame(&self) {
        if self.cooldown.lock().await.is_cooling(Instant::now()) {
            return;
        }
        let Some(frame) = self.sampler.sample_frame() else {
            return;
        };

        let detections = match self.decoder.detect(frame).await {
            Ok(detections) => detections,
            Err(e) => {
                debug!(error = %e, "barcode decode attempt failed");
                return;
            }
        };

        let now = Instant::now();
        let mut cooldown = self.cooldown.lock().await;
        for detection in detections {
            if !cooldown.offer(&detection.raw_value, now) {
                continue;
            }
            info!(
                value = %detection.raw_value,
                format = ?detection.format,
                "barcode detected"
            );
            self.snapshots.send_modify(|s| s.last = Some(detection.clone()));
            let _ = self.detections.send(detection);
        }
    }
}
