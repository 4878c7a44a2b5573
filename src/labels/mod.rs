//! # Label Aggregator
//! Per-context labels from a pluggable backend, reduced to aggregate statistics.
//!
//! Backends implement [`ContextLabeler`]. Which one runs is decided by
//! configuration in [`build_labeler`]:
//! - `heuristic`: deterministic keyword rules, no I/O.
//! - `remote`: OpenAI-compatible chat completions, wrapped in [`CachingLabeler`].

pub mod aggregate;
pub mod cache;
pub mod heuristic;
pub mod remote;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::labeler::{LabelerConfig, LabelerMode};
use crate::error::LabelError;
use crate::text::Context;

pub use aggregate::{LabelAggregates, LabelAggregator, LabelOutcome};
pub use cache::CachingLabeler;
pub use heuristic::HeuristicLabeler;
pub use remote::RemoteClassifierLabeler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Individual,
    Group,
    None,
    Unknown,
}

/// Label for one context. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextLabel {
    pub targetedness: f64,
    pub severity: f64,
    pub is_quoted: bool,
    pub is_reclaimed: bool,
    pub target_type: TargetType,
    pub confidence: f64,
    /// Backend tag, e.g. `heuristic_v1`.
    pub source: String,
}

impl ContextLabel {
    /// Rejects labels whose numeric fields are outside [0, 1] or non-finite.
    pub fn validated(self) -> Result<Self, LabelError> {
        for (name, v) in [
            ("targetedness", self.targetedness),
            ("severity", self.severity),
            ("confidence", self.confidence),
        ] {
            if !v.is_finite() || !(0.0..=1.0).contains(&v) {
                return Err(LabelError::Malformed(format!("{name} out of range: {v}")));
            }
        }
        Ok(self)
    }
}

/// A labeling backend. Called once per context; must be safe to call
/// concurrently.
#[async_trait]
pub trait ContextLabeler: Send + Sync {
    async fn label(
        &self,
        term: &str,
        context: &Context,
        locale: &str,
    ) -> Result<ContextLabel, LabelError>;

    /// Backend name for diagnostics.
    fn name(&self) -> &'static str;
}

pub type DynLabeler = Arc<dyn ContextLabeler>;

/// Factory: build a labeler according to config.
///
/// * `heuristic` → [`HeuristicLabeler`].
/// * `remote` with a resolvable API key → [`RemoteClassifierLabeler`] behind
///   [`CachingLabeler`] (daily limit + cache).
/// * `remote` without a key → heuristic, with a warning.
pub fn build_labeler(config: &LabelerConfig) -> anyhow::Result<DynLabeler> {
    match config.mode {
        LabelerMode::Heuristic => {
            info!(labeler = "heuristic", "labeler selected");
            Ok(Arc::new(HeuristicLabeler::default()))
        }
        LabelerMode::Remote => {
            let Some(api_key) = config.resolve_api_key() else {
                warn!(
                    provider = %config.provider,
                    "remote labeler configured without an API key, falling back to heuristic"
                );
                return Ok(Arc::new(HeuristicLabeler::default()));
            };
            let remote = RemoteClassifierLabeler::new(
                &config.base_url,
                &config.model,
                api_key,
                std::time::Duration::from_secs(config.timeout_secs),
            )?;
            info!(
                labeler = "remote",
                model = %config.model,
                daily_limit = config.daily_limit,
                "labeler selected"
            );
            Ok(Arc::new(
                CachingLabeler::new(remote, config.cache_dir.clone(), config.daily_limit)
                    .with_memory_capacity(config.memory_cache_capacity),
            ))
        }
    }
}
