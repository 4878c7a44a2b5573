use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::error::{FeedbackError, HistoryError, ScoringError};
use crate::feedback::{FeedbackRequest, FeedbackStore};
use crate::history::ScoreHistoryEntry;
use crate::metrics::Metrics;
use crate::orchestrator::{
    CalibrationReport, Orchestrator, PersistenceStatus, ScoreRequest, ScoringState,
    TextSweepRequest, TextSweepResponse,
};
use crate::types::ScoreResult;

/// Default page size for `/term/{term}/history`.
pub const DEFAULT_HISTORY_LIMIT: usize = 50;

#[derive(Clone)]
pub struct AppState {
    pub app_name: String,
    pub orchestrator: Arc<Orchestrator>,
    pub feedback: Arc<dyn FeedbackStore>,
    pub metrics: Option<PrometheusHandle>,
}

pub fn create_router(state: AppState) -> Router {
    let metrics_router = state
        .metrics
        .clone()
        .map(|handle| Metrics { handle }.router());

    let mut router = Router::new()
        .route("/health", get(health))
        .route("/score/term", post(score_term))
        .route("/score/text", post(score_text))
        .route("/term/{term}/history", get(term_history))
        .route("/feedback", post(submit_feedback))
        .route("/admin/reload-weights", post(admin_reload_weights))
        .route("/admin/calibrate", post(admin_calibrate))
        .with_state(state);

    if let Some(m) = metrics_router {
        router = router.merge(m);
    }
    router.layer(CorsLayer::very_permissive())
}

// ------------------------------------------------------------
// Errors
// ------------------------------------------------------------

#[derive(Debug)]
pub enum ApiError {
    /// 422
    InvalidInput(String),
    /// 503
    Unavailable(String),
    /// 500
    Internal(String),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match self {
            ApiError::InvalidInput(m) => (StatusCode::UNPROCESSABLE_ENTITY, m),
            ApiError::Unavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m),
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m),
        };
        (status, Json(ErrorBody { error: msg })).into_response()
    }
}

impl From<ScoringError> for ApiError {
    fn from(e: ScoringError) -> Self {
        ApiError::InvalidInput(e.to_string())
    }
}

impl From<HistoryError> for ApiError {
    fn from(e: HistoryError) -> Self {
        ApiError::Unavailable(e.to_string())
    }
}

impl From<FeedbackError> for ApiError {
    fn from(e: FeedbackError) -> Self {
        match e {
            FeedbackError::Invalid(m) => ApiError::InvalidInput(m),
            FeedbackError::Unavailable(m) => ApiError::Unavailable(m),
        }
    }
}

// ------------------------------------------------------------
// Handlers
// ------------------------------------------------------------

#[derive(Serialize)]
struct HealthResp {
    status: &'static str,
    app: String,
    version: &'static str,
    labeler: &'static str,
    weights_version: String,
    history_backend: &'static str,
}

async fn health(State(state): State<AppState>) -> Json<HealthResp> {
    let o = &state.orchestrator;
    Json(HealthResp {
        status: "ok",
        app: state.app_name.clone(),
        version: env!("CARGO_PKG_VERSION"),
        labeler: o.labeler_name(),
        weights_version: o.weights().current().version.clone(),
        history_backend: o.history_store().backend(),
    })
}

#[derive(Serialize)]
struct ScoreTermResp {
    #[serde(flatten)]
    result: ScoreResult,
    #[serde(flatten)]
    state: ScoringState,
    persistence: PersistenceStatus,
}

async fn score_term(
    State(state): State<AppState>,
    Json(body): Json<ScoreRequest>,
) -> Result<Json<ScoreTermResp>, ApiError> {
    let outcome = state.orchestrator.score_term(body).await?;
    Ok(Json(ScoreTermResp {
        result: outcome.result,
        state: outcome.state,
        persistence: outcome.persistence,
    }))
}

async fn score_text(
    State(state): State<AppState>,
    Json(body): Json<TextSweepRequest>,
) -> Result<Json<TextSweepResponse>, ApiError> {
    Ok(Json(state.orchestrator.sweep_text(body).await?))
}

#[derive(Deserialize)]
struct HistoryQuery {
    #[serde(default)]
    locale: Option<String>,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Serialize)]
struct HistoryResp {
    term: String,
    locale: Option<String>,
    items: Vec<ScoreHistoryEntry>,
}

async fn term_history(
    State(state): State<AppState>,
    Path(term): Path<String>,
    Query(q): Query<HistoryQuery>,
) -> Result<Json<HistoryResp>, ApiError> {
    let limit = q.limit.unwrap_or(DEFAULT_HISTORY_LIMIT);
    let items = state
        .orchestrator
        .history(&term, q.locale.as_deref(), limit)
        .await?;
    Ok(Json(HistoryResp {
        term: crate::text::normalize_term(&term),
        locale: q.locale,
        items,
    }))
}

#[derive(Serialize)]
struct FeedbackResp {
    id: u64,
}

async fn submit_feedback(
    State(state): State<AppState>,
    Json(body): Json<FeedbackRequest>,
) -> Result<(StatusCode, Json<FeedbackResp>), ApiError> {
    let id = state.feedback.submit(body).await?;
    Ok((StatusCode::CREATED, Json(FeedbackResp { id })))
}

#[derive(Serialize)]
struct ReloadResp {
    version: String,
}

async fn admin_reload_weights(State(state): State<AppState>) -> Result<Json<ReloadResp>, ApiError> {
    match state.orchestrator.weights().reload_now() {
        Ok(w) => Ok(Json(ReloadResp {
            version: w.version.clone(),
        })),
        Err(e) => {
            warn!(error = %e, "weights reload rejected");
            Err(ApiError::InvalidInput(format!("{e:#}")))
        }
    }
}

async fn admin_calibrate(
    State(state): State<AppState>,
) -> Result<Json<CalibrationReport>, ApiError> {
    state
        .orchestrator
        .calibrate()
        .await
        .map(Json)
        .map_err(|e| ApiError::Internal(format!("{e:#}")))
}
