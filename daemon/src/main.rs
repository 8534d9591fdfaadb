mod api;
mod source;

use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use live_scan_common::config::{ClassifierConfig, Config};
use live_scan_scanner::barcode::{BarcodeScanner, RxingDecoder};
use live_scan_scanner::classify::{FoodAnalysis, HttpClassifier, VehicleSpotting};
use live_scan_scanner::sampler::FrameSampler;
use live_scan_scanner::session::{ScanEvent, ScanSession};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use crate::api::{AppState, SharedSampler};
use crate::source::LatestFrame;

#[tokio::main]
async fn main() {
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = match Config::load(&config_path) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {e}", config_path.display());
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.logging.level.parse().unwrap_or_default()),
        )
        .init();

    info!(
        stream = config.stream.url,
        mode = config.stream.mode,
        domain = config.daemon.domain,
        "starting live-scan daemon"
    );

    let latest = Arc::new(LatestFrame::new());
    spawn_source(&config, Arc::clone(&latest));
    let warmup = Arc::clone(&latest);
    tokio::spawn(async move {
        warmup.ready().await;
        info!("first camera frame received");
    });

    let sampler: SharedSampler = Arc::new(FrameSampler::new(
        Arc::clone(&latest),
        config.sampler.clone(),
    ));

    match config.daemon.domain.as_str() {
        "food" => serve::<FoodAnalysis>("food", &config.food, &config, sampler).await,
        "vehicle" => serve::<VehicleSpotting>("vehicle", &config.vehicle, &config, sampler).await,
        other => {
            error!(domain = other, "unknown scan domain, expected 'food' or 'vehicle'");
            std::process::exit(1);
        }
    }
}

fn spawn_source(config: &Config, latest: Arc<LatestFrame>) {
    match config.stream.mode.as_str() {
        "polling" => {
            let url = format!(
                "{}?quality={}",
                config.stream.url.replace("/stream", "/frame"),
                config.stream.quality
            );
            let interval = Duration::from_secs_f64(1.0 / config.stream.fps);
            tokio::spawn(async move { source::run_polling_source(&url, &latest, interval).await });
        }
        _ => {
            let url = format!(
                "{}?quality={}&fps={}",
                config.stream.url, config.stream.quality, config.stream.fps
            );
            tokio::spawn(async move { source::run_mjpeg_source(&url, &latest).await });
        }
    }
}

async fn serve<T>(name: &str, classifier_config: &ClassifierConfig, config: &Config, sampler: SharedSampler)
where
    T: DeserializeOwned + Serialize + Clone + Send + Sync + Debug + 'static,
{
    let classifier = match HttpClassifier::<T>::new(name, classifier_config) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "failed to build classifier client");
            std::process::exit(1);
        }
    };
    info!(
        classifier = name,
        endpoint = classifier_config.endpoint,
        min_scan_interval_ms = classifier_config.min_scan_interval_ms,
        "classifier ready"
    );

    let state = Arc::new(AppState {
        scan: ScanSession::from_config(
            classifier,
            Arc::clone(&sampler),
            &config.motion,
            classifier_config,
        ),
        barcode: BarcodeScanner::new(RxingDecoder::new(), sampler, &config.barcode),
    });

    spawn_event_log(&state);

    if config.daemon.autostart {
        info!("autostart enabled, starting scan session");
        state.scan.start().await;
    }

    let app = api::router(Arc::clone(&state));
    let addr = format!("0.0.0.0:{}", config.daemon.port);
    info!(addr, "control API starting");

    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        eprintln!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "control API stopped");
        std::process::exit(1);
    }
}

/// Log scan events and barcode detections as they happen.
fn spawn_event_log<T>(state: &Arc<AppState<HttpClassifier<T>>>)
where
    T: DeserializeOwned + Serialize + Clone + Send + Sync + Debug + 'static,
{
    let classifier = state.scan.classifier_name().to_string();
    let mut events = state.scan.events();
    let mut snapshots = state.scan.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(ScanEvent::Locked { ticket }) => {
                    let snapshot = snapshots.borrow_and_update().clone();
                    info!(%classifier, ticket, result = ?snapshot.result, "scan result locked");
                }
                Ok(ScanEvent::Failed { ticket, reason }) => {
                    warn!(%classifier, ticket, reason, "scan attempt failed");
                }
                Ok(event) => info!(?event, "scan event"),
                Err(RecvError::Lagged(missed)) => warn!(missed, "scan event log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    let mut detections = state.barcode.detections();
    tokio::spawn(async move {
        loop {
            match detections.recv().await {
                Ok(detection) => info!(
                    value = %detection.raw_value,
                    format = ?detection.format,
                    "barcode ready for lookup"
                ),
                Err(RecvError::Lagged(missed)) => warn!(missed, "barcode log fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });
}
