//! Versioned fusion weights with hot-reload from `config/fusion.toml`.
//!
//! TOML shape (every key optional, defaults shown):
//! ```toml
//! version = "fusion_v1"
//! b0 = -0.8
//! b1 = 0.9
//! b2 = 0.7
//! b3 = 1.1
//! b4 = 1.0
//! b5 = 0.9
//! b6 = 0.4
//! review_threshold = 0.35
//! block_threshold = 0.65
//! confidence_floor = 0.05
//! sample_saturation = 20
//! ```
//!
//! A snapshot is never mutated. Reloading or calibrating builds a new
//! `Arc<FusionWeights>` and swaps it in; requests already holding the old one
//! finish with it.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::SystemTime,
};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::history::ScoreHistoryEntry;

/// Calibration needs at least this many samples to derive signal quantiles.
pub const MIN_QUANTILE_SAMPLES: usize = 40;
/// ...and this many to retune the band thresholds.
pub const MIN_THRESHOLD_SAMPLES: usize = 80;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalQuantiles {
    pub ctx_p50: f64,
    pub ctx_p90: f64,
    pub graph_p50: f64,
    pub graph_p90: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionWeights {
    pub version: String,
    pub b0: f64,
    pub b1: f64,
    pub b2: f64,
    pub b3: f64,
    pub b4: f64,
    pub b5: f64,
    pub b6: f64,
    pub review_threshold: f64,
    pub block_threshold: f64,
    pub confidence_floor: f64,
    pub sample_saturation: usize,
    pub quantiles: Option<SignalQuantiles>,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            version: "fusion_v1".to_string(),
            b0: -0.8,
            b1: 0.9,
            b2: 0.7,
            b3: 1.1,
            b4: 1.0,
            b5: 0.9,
            b6: 0.4,
            review_threshold: 0.35,
            block_threshold: 0.65,
            confidence_floor: 0.05,
            sample_saturation: 20,
            quantiles: None,
        }
    }
}

impl FusionWeights {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.version.trim().is_empty() {
            anyhow::bail!("fusion weights: version must not be empty");
        }
        let coeffs = [
            self.b0, self.b1, self.b2, self.b3, self.b4, self.b5, self.b6,
        ];
        if coeffs.iter().any(|c| !c.is_finite()) {
            anyhow::bail!("fusion weights: coefficients must be finite");
        }
        let (t1, t2) = (self.review_threshold, self.block_threshold);
        if !(t1 > 0.0 && t1 < 1.0 && t2 > 0.0 && t2 < 1.0) {
            anyhow::bail!("fusion weights: thresholds must lie in (0, 1), got {t1} / {t2}");
        }
        if t1 >= t2 {
            anyhow::bail!("fusion weights: review_threshold ({t1}) must be < block_threshold ({t2})");
        }
        if !(0.0..1.0).contains(&self.confidence_floor) {
            anyhow::bail!(
                "fusion weights: confidence_floor must be in [0, 1), got {}",
                self.confidence_floor
            );
        }
        if self.sample_saturation == 0 {
            anyhow::bail!("fusion weights: sample_saturation must be > 0");
        }
        if let Some(q) = &self.quantiles {
            let all = [q.ctx_p50, q.ctx_p90, q.graph_p50, q.graph_p90];
            if all.iter().any(|v| !v.is_finite() || *v < 0.0) {
                anyhow::bail!("fusion weights: quantiles must be finite and non-negative");
            }
        }
        Ok(())
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let w: FusionWeights = toml::from_str(s).context("parse fusion weights TOML")?;
        w.validate()?;
        Ok(w)
    }

    /// Load and validate (no caching).
    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let s = fs::read_to_string(path)
            .with_context(|| format!("read fusion weights from {}", path.display()))?;
        Self::from_toml_str(&s)
    }

    /// Version without any previous calibration suffix.
    pub fn base_version(&self) -> &str {
        self.version
            .split_once("+cal")
            .map(|(base, _)| base)
            .unwrap_or(&self.version)
    }

    /// Derive a new snapshot from history statistics, or `None` when there are
    /// too few samples to say anything.
    ///
    /// Quantiles need [`MIN_QUANTILE_SAMPLES`]; thresholds move only with
    /// [`MIN_THRESHOLD_SAMPLES`], blending 70% of the current value with 30% of
    /// the observed score quantile.
    pub fn calibrate(&self, stats: &HistoryStats) -> Option<FusionWeights> {
        let n = stats.len();
        if n < MIN_QUANTILE_SAMPLES {
            return None;
        }
        let mut next = self.clone();
        next.version = format!("{}+cal{}", self.base_version(), n);
        next.quantiles = Some(SignalQuantiles {
            ctx_p50: quantile(&stats.lambda_ctx, 0.5),
            ctx_p90: quantile(&stats.lambda_ctx, 0.9),
            graph_p50: quantile(&stats.lambda_graph, 0.5),
            graph_p90: quantile(&stats.lambda_graph, 0.9),
        });

        if n >= MIN_THRESHOLD_SAMPLES {
            let p70 = quantile(&stats.scores, 0.7);
            let p90 = quantile(&stats.scores, 0.9);
            let review = (0.7 * self.review_threshold + 0.3 * p70).clamp(0.2, 0.75);
            let min_block = review + 0.08;
            let block = (0.7 * self.block_threshold + 0.3 * p90)
                .max(min_block)
                .clamp(min_block, 0.95);
            next.review_threshold = review;
            next.block_threshold = block;
        }
        Some(next)
    }
}

/// Signal and score samples gathered from recent history.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct HistoryStats {
    pub lambda_ctx: Vec<f64>,
    pub lambda_graph: Vec<f64>,
    pub scores: Vec<f64>,
}

impl HistoryStats {
    /// Non-finite entries are skipped.
    pub fn from_results(entries: &[ScoreHistoryEntry]) -> Self {
        let mut s = Self::default();
        for e in entries {
            let r = &e.result;
            if r.lambda_ctx.is_finite() && r.lambda_graph.is_finite() && r.score.is_finite() {
                s.lambda_ctx.push(r.lambda_ctx);
                s.lambda_graph.push(r.lambda_graph);
                s.scores.push(r.score);
            }
        }
        s
    }

    pub fn len(&self) -> usize {
        self.scores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scores.is_empty()
    }
}

/// Linear-interpolation quantile (the usual "type 7" definition).
pub fn quantile(values: &[f64], q: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let pos = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

/// Hot-reload handle: hands out the current snapshot, re-reading the file when
/// its mtime changes. Invalid files are logged and ignored.
#[derive(Debug)]
pub struct WeightsHandle {
    path: Option<PathBuf>,
    inner: RwLock<State>,
}

#[derive(Debug)]
struct State {
    weights: Arc<FusionWeights>,
    last_modified: Option<SystemTime>,
}

impl WeightsHandle {
    /// Fixed snapshot, no file behind it.
    pub fn fixed(weights: FusionWeights) -> Self {
        Self {
            path: None,
            inner: RwLock::new(State {
                weights: Arc::new(weights),
                last_modified: None,
            }),
        }
    }

    /// Watch `path`. Starts from defaults when the file is missing or invalid.
    pub fn watching(path: impl Into<PathBuf>) -> Self {
        let handle = Self {
            path: Some(path.into()),
            inner: RwLock::new(State {
                weights: Arc::new(FusionWeights::default()),
                last_modified: None,
            }),
        };
        handle.current();
        handle
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Latest snapshot, reloading first if the file changed.
    pub fn current(&self) -> Arc<FusionWeights> {
        let Some(path) = &self.path else {
            return self.snapshot();
        };
        let mtime = match fs::metadata(path).and_then(|m| m.modified()) {
            Ok(m) => m,
            Err(_) => return self.snapshot(),
        };
        let changed = self
            .inner
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .last_modified
            != Some(mtime);
        if !changed {
            return self.snapshot();
        }

        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        // Double-check in case of races.
        if guard.last_modified != Some(mtime) {
            guard.last_modified = Some(mtime);
            match FusionWeights::load_from_file(path) {
                Ok(w) => {
                    info!(version = %w.version, path = %path.display(), "fusion weights loaded");
                    guard.weights = Arc::new(w);
                }
                Err(e) => {
                    warn!(error = %e, kept = %guard.weights.version, "fusion weights reload rejected");
                }
            }
        }
        Arc::clone(&guard.weights)
    }

    /// Force a re-read regardless of mtime.
    pub fn reload_now(&self) -> anyhow::Result<Arc<FusionWeights>> {
        let path = self
            .path
            .as_ref()
            .context("weights handle has no backing file")?;
        let w = FusionWeights::load_from_file(path)?;
        let mtime = fs::metadata(path).and_then(|m| m.modified()).ok();
        let w = Arc::new(w);
        let mut guard = self.inner.write().unwrap_or_else(|p| p.into_inner());
        guard.weights = Arc::clone(&w);
        guard.last_modified = mtime;
        info!(version = %w.version, "fusion weights reloaded on request");
        Ok(w)
    }

    /// Swap in a new snapshot (e.g. from calibration).
    pub fn install(&self, weights: FusionWeights) -> anyhow::Result<Arc<FusionWeights>> {
        weights.validate()?;
        let w = Arc::new(weights);
        self.inner
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .weights = Arc::clone(&w);
        info!(version = %w.version, "fusion weights installed");
        Ok(w)
    }

    fn snapshot(&self) -> Arc<FusionWeights> {
        Arc::clone(&self.inner.read().unwrap_or_else(|p| p.into_inner()).weights)
    }
}
