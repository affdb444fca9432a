use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use edurisk_core::{ErrorKind, IndicatorSpec, Pipeline, PipelineError, PipelineResult, RawMetrics};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    kind: &'static str,
    message: String,
}

/// HTTP status for each pipeline failure.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::MissingMetric | ErrorKind::InvalidMetricType | ErrorKind::MetricOutOfRange => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        ErrorKind::ClassificationTimeout | ErrorKind::GenerationTimeout => {
            StatusCode::GATEWAY_TIMEOUT
        }
        ErrorKind::ClassificationUnavailable
        | ErrorKind::GenerationUnavailable
        | ErrorKind::GenerationMalformed
        | ErrorKind::PlanQualityExhausted => StatusCode::BAD_GATEWAY,
        ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        let kind = err.kind();
        Self {
            status: status_for(kind),
            kind: kind.as_str(),
            message: err.to_string(),
        }
    }
}

/// Bodies that are not a JSON object of metrics never reach the pipeline.
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            kind: "invalid_input",
            message: rejection.body_text(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({
            "error": { "kind": self.kind, "message": self.message }
        });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub predictor: String,
    pub generator: String,
    pub cached_plans: usize,
    pub in_flight: usize,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(pipeline: Arc<Pipeline>) -> Router {
    Router::new()
        .route("/api/assess", post(assess))
        .route("/api/indicators", get(list_indicators))
        .route("/api/health", get(health))
        .layer(CorsLayer::permissive())
        .with_state(pipeline)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(pipeline: Arc<Pipeline>, bind: &str, port: u16) -> Result<()> {
    let app = build_router(pipeline);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("edurisk serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("edurisk serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Dropping this future (client disconnect) abandons the assessment.
async fn assess(
    State(pipeline): State<Arc<Pipeline>>,
    body: Result<Json<RawMetrics>, JsonRejection>,
) -> Result<Json<PipelineResult>, AppError> {
    let Json(raw) = body.map_err(|rejection| {
        tracing::warn!(error = %rejection.body_text(), "rejected assessment body");
        AppError::from(rejection)
    })?;
    match pipeline.submit(&raw).await {
        Ok(result) => Ok(Json(result)),
        Err(e) => {
            tracing::warn!(kind = %e.kind(), error = %e, "assessment failed");
            Err(e.into())
        }
    }
}

async fn list_indicators(State(pipeline): State<Arc<Pipeline>>) -> Json<Vec<IndicatorSpec>> {
    Json(pipeline.indicators().to_vec())
}

async fn health(State(pipeline): State<Arc<Pipeline>>) -> Json<HealthResponse> {
    let cache = pipeline.cache();
    Json(HealthResponse {
        status: "ok",
        predictor: pipeline.predictor_name().to_string(),
        generator: pipeline.generator_name().to_string(),
        cached_plans: cache.ready_len(),
        in_flight: cache.in_flight_len(),
    })
}
