// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod api;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod feedback;
pub mod fusion;
pub mod history;
pub mod labels;
pub mod metrics;
pub mod orchestrator;
pub mod spectral;
pub mod text;
pub mod types;

// ---- Re-exports for stable public API ----
pub use crate::api::create_router;
pub use crate::error::{FeedbackError, HistoryError, LabelError, ScoringError};
pub use crate::orchestrator::{Orchestrator, ScoreRequest, ScoringOutcome};
pub use crate::types::{ScoreResult, Warning};

use axum::Router;

/// Build the router from `config/eigenslur.toml` + environment, without metrics.
pub async fn app() -> anyhow::Result<Router> {
    app_with(config::Settings::load()?).await
}

/// Build the router from explicit settings, without metrics.
pub async fn app_with(settings: config::Settings) -> anyhow::Result<Router> {
    let runtime = bootstrap::Runtime::from_settings(settings).await?;
    Ok(create_router(runtime.state(None)))
}
