use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use live_scan_scanner::barcode::{BarcodeScanner, RxingDecoder};
use live_scan_scanner::classify::Classifier;
use live_scan_scanner::sampler::FrameSampler;
use live_scan_scanner::session::ScanSession;
use serde::Serialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::source::LatestFrame;

pub type SharedSampler = Arc<FrameSampler<Arc<LatestFrame>>>;

pub struct AppState<C: Classifier> {
    pub scan: ScanSession<C, SharedSampler>,
    pub barcode: BarcodeScanner<RxingDecoder, SharedSampler>,
}

#[derive(Debug, Serialize)]
struct LockResponse<R> {
    result: Option<R>,
}

pub fn router<C>(state: Arc<AppState<C>>) -> Router
where
    C: Classifier,
    C::Output: Serialize,
{
    Router::new()
        .route("/scan", get(scan_snapshot::<C>))
        .route("/scan/start", post(scan_start::<C>))
        .route("/scan/stop", post(scan_stop::<C>))
        .route("/scan/lock", post(scan_lock::<C>))
        .route("/scan/rescan", post(scan_rescan::<C>))
        .route("/barcode", get(barcode_snapshot::<C>))
        .route("/barcode/start", post(barcode_start::<C>))
        .route("/barcode/stop", post(barcode_stop::<C>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// GET /scan
async fn scan_snapshot<C>(State(state): State<Arc<AppState<C>>>) -> Response
where
    C: Classifier,
    C::Output: Serialize,
{
    Json(state.scan.snapshot()).into_response()
}

/// POST /scan/start
async fn scan_start<C>(State(state): State<Arc<AppState<C>>>) -> Response
where
    C: Classifier,
    C::Output: Serialize,
{
    state.scan.start().await;
    Json(state.scan.snapshot()).into_response()
}

/// POST /scan/stop
async fn scan_stop<C>(State(state): State<Arc<AppState<C>>>) -> Response
where
    C: Classifier,
    C::Output: Serialize,
{
    state.scan.stop().await;
    Json(state.scan.snapshot()).into_response()
}

/// POST /scan/lock: commit to the current reading
async fn scan_lock<C>(State(state): State<Arc<AppState<C>>>) -> Response
where
    C: Classifier,
    C::Output: Serialize,
{
    let result = state.scan.lock_result().await;
    Json(LockResponse { result }).into_response()
}

/// POST /scan/rescan: 409 while stopped or a call is in flight
async fn scan_rescan<C>(State(state): State<Arc<AppState<C>>>) -> Response
where
    C: Classifier,
    C::Output: Serialize,
{
    if state.scan.rescan().await {
        (StatusCode::ACCEPTED, Json(state.scan.snapshot())).into_response()
    } else {
        (
            StatusCode::CONFLICT,
            Json(json!({ "error": "session stopped or classification in flight" })),
        )
            .into_response()
    }
}

/// GET /barcode
async fn barcode_snapshot<C: Classifier>(State(state): State<Arc<AppState<C>>>) -> Response {
    Json(state.barcode.snapshot()).into_response()
}

/// POST /barcode/start: 501 when the decoder is unsupported
async fn barcode_start<C: Classifier>(State(state): State<Arc<AppState<C>>>) -> Response {
    match state.barcode.start().await {
        Ok(()) => Json(state.barcode.snapshot()).into_response(),
        Err(e) => {
            warn!(error = %e, "barcode scanning unavailable");
            (
                StatusCode::NOT_IMPLEMENTED,
                Json(json!({ "error": e.to_string(), "status": state.barcode.status() })),
            )
                .into_response()
        }
    }
}

/// POST /barcode/stop
async fn barcode_stop<C: Classifier>(State(state): State<Arc<AppState<C>>>) -> Response {
    state.barcode.stop().await;
    info!("barcode scanning stopped via API");
    Json(state.barcode.snapshot()).into_response()
}
