//! HTTP trigger
//!
//! Endpoints:
//! - POST /               - Run one import for `{ fileId, filePath, fileName }`
//! - POST /process-import - Same handler, explicit path
//! - GET  /health         - Health check
//!
//! CORS is permissive; OPTIONS preflight is answered by the layer.

use crate::commit::CommittedMetric;
use crate::pipeline::{ImportPipeline, ImportRequest};
use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

#[derive(Clone)]
struct AppState {
    pipeline: Arc<ImportPipeline>,
}

// ============================================================================
// Response types
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    ok: bool,
    version: &'static str,
}

#[derive(Serialize)]
struct ImportData<'a> {
    metrics: &'a [CommittedMetric],
}

#[derive(Serialize)]
struct ImportResponse<'a> {
    success: bool,
    data: ImportData<'a>,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

fn error_response(status: StatusCode, error: String) -> Response {
    (status, Json(ErrorResponse { error })).into_response()
}

// ============================================================================
// Handlers
// ============================================================================

async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn import_handler(
    State(state): State<AppState>,
    payload: Result<Json<ImportRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(body) => body,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };

    let job = match request.into_job() {
        Ok(job) => job,
        Err(e) => return error_response(e.status_code(), e.to_string()),
    };

    match state.pipeline.run(&job).await {
        Ok(outcome) => Json(ImportResponse {
            success: true,
            data: ImportData {
                metrics: &outcome.report.metrics,
            },
        })
        .into_response(),
        Err(e) => error_response(e.status_code(), e.to_string()),
    }
}

pub fn router(pipeline: Arc<ImportPipeline>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", post(import_handler))
        .route("/process-import", post(import_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(AppState { pipeline })
}
