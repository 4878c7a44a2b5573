//! # Scoring Orchestrator
//! Sequences one scoring pass: prepare → {spectral ∥ labels} → fuse → persist.
//!
//! Only invalid input ends a pass early. Degenerate signals, failed labels and
//! failed or slow history writes become warnings on the returned result. Once
//! the pass reaches `FUSED` the history write runs in a detached task, so
//! dropping the caller's future cannot lose the score.

pub mod inflight;
pub mod state;
pub mod sweep;

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use metrics::{counter, histogram};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{HistoryError, ScoringError};
use crate::fusion::{self, FusionInput, WeightsHandle};
use crate::history::{HistoryStore, ScoreHistoryEntry};
use crate::labels::{DynLabeler, LabelAggregator};
use crate::spectral::{SpectralConfig, SpectralEngine, SpectralSignals};
use crate::text::{self, Context};
use crate::types::{ScoreResult, Warning, Warnings};

pub use inflight::{InFlightKey, InFlightMap};
pub use state::{FailureKind, PersistenceStatus, ScoringOutcome, ScoringState, Transitions};
pub use sweep::{TextSweepItem, TextSweepRequest, TextSweepResponse};

/// Upper bound for history queries.
pub const MAX_HISTORY_LIMIT: usize = 200;
/// How many recent results calibration looks at.
pub const CALIBRATION_WINDOW: usize = 1000;

pub fn default_locale() -> String {
    "en-US".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreRequest {
    pub term: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    pub contexts: Vec<String>,
    #[serde(default)]
    pub trend_velocity: f64,
}

impl ScoreRequest {
    pub fn new(term: impl Into<String>, contexts: Vec<String>) -> Self {
        Self {
            term: term.into(),
            locale: default_locale(),
            contexts,
            trend_velocity: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Used when a request carries a blank locale.
    pub default_locale: String,
    pub label_concurrency: usize,
    pub persist_timeout: Duration,
    pub spectral: SpectralConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_locale: default_locale(),
            label_concurrency: 4,
            persist_timeout: Duration::from_millis(2000),
            spectral: SpectralConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationReport {
    pub applied: bool,
    pub samples: usize,
    pub version: String,
    pub review_threshold: f64,
    pub block_threshold: f64,
}

pub struct Orchestrator {
    spectral: Arc<SpectralEngine>,
    labels: LabelAggregator,
    weights: Arc<WeightsHandle>,
    history: Arc<dyn HistoryStore>,
    inflight: InFlightMap,
    default_locale: String,
    persist_timeout: Duration,
}

/// SHA-256 over the sorted, normalized contexts: equal for any ordering of the
/// same context set.
pub fn context_fingerprint(contexts: &[Context]) -> String {
    let mut normalized: Vec<String> = contexts.iter().map(|c| c.tokens.join(" ")).collect();
    normalized.sort();
    let mut h = Sha256::new();
    for n in &normalized {
        h.update(n.as_bytes());
        h.update([0u8]);
    }
    h.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

impl Orchestrator {
    pub fn new(
        config: OrchestratorConfig,
        labeler: DynLabeler,
        weights: Arc<WeightsHandle>,
        history: Arc<dyn HistoryStore>,
    ) -> Self {
        Self {
            spectral: Arc::new(SpectralEngine::new(config.spectral)),
            labels: LabelAggregator::new(labeler, config.label_concurrency),
            weights,
            history,
            inflight: InFlightMap::new(),
            default_locale: config.default_locale,
            persist_timeout: config.persist_timeout,
        }
    }

    pub fn weights(&self) -> &Arc<WeightsHandle> {
        &self.weights
    }

    pub fn history_store(&self) -> &Arc<dyn HistoryStore> {
        &self.history
    }

    pub fn inflight(&self) -> &InFlightMap {
        &self.inflight
    }

    pub fn labeler_name(&self) -> &'static str {
        self.labels.labeler_name()
    }

    fn locale_or_default(&self, locale: &str) -> String {
        let l = locale.trim();
        if l.is_empty() {
            self.default_locale.clone()
        } else {
            l.to_string()
        }
    }

    /// Run one scoring pass.
    pub async fn score_term(&self, request: ScoreRequest) -> Result<ScoringOutcome, ScoringError> {
        let started = Instant::now();
        let mut transitions = Transitions::default();

        // RECEIVED -> TOKENIZED | FAILED
        let prepared = if !request.trend_velocity.is_finite() {
            Err(ScoringError::InvalidInput(
                "trend_velocity must be a finite number".to_string(),
            ))
        } else {
            text::prepare(&request.term, &request.contexts)
        };
        let prepared = match prepared {
            Ok(p) => p,
            Err(e) => {
                transitions.advance(ScoringState::Failed(FailureKind::InvalidInput));
                counter!("scoring_failures_total").increment(1);
                warn!(error = %e, "scoring rejected");
                return Err(e);
            }
        };
        transitions.advance(ScoringState::Tokenized);

        let locale = self.locale_or_default(&request.locale);
        let fingerprint = context_fingerprint(&prepared.contexts);
        let mut gate = self
            .inflight
            .acquire(InFlightKey::new(prepared.term.clone(), locale.clone()))
            .await;

        // {SIGNALS_COMPUTED || LABELS_AGGREGATED}
        let cached = gate.cached(&fingerprint);
        let signals_reused = cached.is_some();
        let spectral_branch = async {
            match cached {
                Some(s) => s,
                None => self.compute_signals(&prepared.term_tokens, &prepared.contexts).await,
            }
        };
        let label_branch = self
            .labels
            .aggregate(&prepared.term, &prepared.contexts, &locale);
        let (signals, labels) = tokio::join!(spectral_branch, label_branch);
        transitions.advance(ScoringState::SignalsComputed);
        transitions.advance(ScoringState::LabelsAggregated);

        let mut warnings = Warnings::new();
        if prepared.anchored_count() == 0 {
            warnings.push(Warning::TermNotFound);
        }
        if signals.any_degenerate() {
            counter!("spectral_degenerate_total").increment(1);
            warnings.push(Warning::SpectralDegenerate);
        }
        if labels.failures_majority() {
            warnings.push(Warning::LabelFailuresMajority);
        }
        if labels.no_usable_labels() {
            warnings.push(Warning::NoUsableLabels);
        }

        // FUSED
        let weights = self.weights.current();
        let input = FusionInput {
            lambda_graph: signals.lambda_graph,
            lambda_ctx: signals.lambda_ctx,
            severity_mean: labels.severity_mean,
            targetedness_mean: labels.targetedness_mean,
            reclaimed_rate: labels.reclaimed_rate,
            trend_velocity: request.trend_velocity,
            sample_count: labels.sample_count,
            mean_label_confidence: labels.mean_confidence,
            usable_labels: !labels.no_usable_labels(),
        };
        let fused = fusion::fuse(&input, &weights);
        let mut result = ScoreResult {
            term: prepared.term.clone(),
            locale,
            score: fused.score,
            confidence: fused.confidence,
            band: fused.band,
            lambda_ctx: signals.lambda_ctx,
            lambda_graph: signals.lambda_graph,
            severity_mean: labels.severity_mean,
            targetedness_mean: labels.targetedness_mean,
            reclaimed_rate: labels.reclaimed_rate,
            trend_velocity: request.trend_velocity,
            sample_count: labels.sample_count,
            warnings,
            model_version: fused.model_version,
            timestamp: Utc::now(),
        };
        transitions.advance(ScoringState::Fused);
        gate.store(fingerprint, signals);
        drop(gate);

        // FUSED -> PERSISTED
        let persistence = self.persist(&result).await;
        match &persistence {
            PersistenceStatus::Confirmed { .. } => transitions.advance(ScoringState::Persisted),
            PersistenceStatus::Failed { .. } => {
                result.warnings.push(Warning::PersistenceFailed);
                transitions.advance(ScoringState::Persisted);
            }
            PersistenceStatus::Unconfirmed => result.warnings.push(Warning::PersistenceUnconfirmed),
        }

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        counter!("scoring_runs_total").increment(1);
        histogram!("scoring_duration_ms").record(elapsed_ms);
        info!(
            term = %result.term,
            locale = %result.locale,
            score = result.score,
            band = result.band.as_str(),
            confidence = result.confidence,
            contexts = prepared.contexts.len(),
            warnings = result.warnings.len(),
            signals_reused,
            elapsed_ms,
            "term scored"
        );

        Ok(ScoringOutcome {
            state: transitions.current(),
            result,
            persistence,
            transitions,
            signals_reused,
        })
    }

    /// Spectral branch on the blocking pool. A panicked task degrades to zeros.
    async fn compute_signals(&self, term_tokens: &[String], contexts: &[Context]) -> SpectralSignals {
        let engine = Arc::clone(&self.spectral);
        let term_tokens = term_tokens.to_vec();
        let contexts = contexts.to_vec();
        let sample_count = contexts.iter().filter(|c| c.is_anchored()).count();
        match tokio::task::spawn_blocking(move || engine.compute(&term_tokens, &contexts)).await {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "spectral task failed, using degenerate signals");
                SpectralSignals {
                    sample_count,
                    ctx_degenerate: true,
                    graph_degenerate: true,
                    ..SpectralSignals::default()
                }
            }
        }
    }

    /// Hand the result to the history store in a detached task and wait at most
    /// `persist_timeout` for confirmation.
    async fn persist(&self, result: &ScoreResult) -> PersistenceStatus {
        let history = Arc::clone(&self.history);
        let to_store = result.clone();
        let write = tokio::spawn(async move { history.append(&to_store).await });

        match tokio::time::timeout(self.persist_timeout, write).await {
            Ok(Ok(Ok(id))) => {
                debug!(id, backend = self.history.backend(), "score persisted");
                PersistenceStatus::Confirmed { id }
            }
            Ok(Ok(Err(e))) => {
                counter!("persistence_failures_total").increment(1);
                warn!(error = %e, backend = self.history.backend(), "score not persisted");
                PersistenceStatus::Failed {
                    reason: e.to_string(),
                }
            }
            Ok(Err(join_err)) => {
                counter!("persistence_failures_total").increment(1);
                warn!(error = %join_err, "history task failed");
                PersistenceStatus::Failed {
                    reason: join_err.to_string(),
                }
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.persist_timeout.as_millis() as u64,
                    "history write still pending, result returned unconfirmed"
                );
                PersistenceStatus::Unconfirmed
            }
        }
    }

    /// Newest-first history for a term; `limit` is clamped to 1..=200.
    pub async fn history(
        &self,
        term: &str,
        locale: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ScoreHistoryEntry>, HistoryError> {
        let term = text::normalize_term(term);
        let locale = locale.map(str::trim).filter(|l| !l.is_empty());
        self.history
            .query(&term, locale, limit.clamp(1, MAX_HISTORY_LIMIT))
            .await
    }

    /// Derive and install a calibrated weights snapshot from recent history.
    /// With too few samples nothing changes and `applied` is false.
    pub async fn calibrate(&self) -> anyhow::Result<CalibrationReport> {
        let recent = self.history.recent(CALIBRATION_WINDOW).await?;
        let stats = fusion::HistoryStats::from_results(&recent);
        let current = self.weights.current();
        let (applied, snapshot) = match current.calibrate(&stats) {
            Some(next) => (true, self.weights.install(next)?),
            None => (false, current),
        };
        info!(
            samples = stats.len(),
            applied,
            version = %snapshot.version,
            "calibration finished"
        );
        Ok(CalibrationReport {
            applied,
            samples: stats.len(),
            version: snapshot.version.clone(),
            review_threshold: snapshot.review_threshold,
            block_threshold: snapshot.block_threshold,
        })
    }
}
