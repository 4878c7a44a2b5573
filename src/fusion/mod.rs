//! # Fusion Engine
//! Pure mapping from (signals, label aggregates, weights snapshot) to
//! (score, confidence, band). No I/O, no randomness, no hidden state.
//!
//! ```text
//! f(x)  = tanh(ln(1 + max(x, 0)))
//! score = sigmoid(b0 + b1*f(lambda_graph) + b2*f(lambda_ctx)
//!                 + b3*severity_mean + b4*targetedness_mean
//!                 - b5*reclaimed_rate + b6*trend_velocity)
//! ```
//!
//! When the snapshot carries calibrated quantiles for a signal, `f` is blended
//! with a logistic of the signal's position between its p50 and p90.

pub mod weights;

use serde::{Deserialize, Serialize};

pub use weights::{FusionWeights, HistoryStats, SignalQuantiles, WeightsHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Band {
    Monitor,
    Review,
    Block,
}

impl Band {
    pub fn as_str(&self) -> &'static str {
        match self {
            Band::Monitor => "monitor",
            Band::Review => "review",
            Band::Block => "block",
        }
    }
}

/// Everything the formula reads, already validated by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FusionInput {
    pub lambda_graph: f64,
    pub lambda_ctx: f64,
    pub severity_mean: f64,
    pub targetedness_mean: f64,
    pub reclaimed_rate: f64,
    pub trend_velocity: f64,
    pub sample_count: usize,
    pub mean_label_confidence: f64,
    /// False when every label call failed.
    pub usable_labels: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FusionOutput {
    pub score: f64,
    pub confidence: f64,
    pub band: Band,
    /// Pre-sigmoid value, kept for diagnostics.
    pub linear: f64,
    pub model_version: String,
}

/// NaN maps to 0.
pub fn clamp01(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Logistic function, stable for large |x|.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

/// `tanh(ln(1 + max(x, 0)))`, mapping [0, inf) onto [0, 1).
pub fn compress(x: f64) -> f64 {
    let x = if x.is_nan() { 0.0 } else { x.max(0.0) };
    x.ln_1p().tanh()
}

/// Compressed signal, blended with its calibrated position when quantiles exist.
pub fn signal_feature(x: f64, p50_p90: Option<(f64, f64)>) -> f64 {
    let baseline = compress(x);
    match p50_p90 {
        Some((p50, p90)) if p90 > p50 => {
            let spread = (p90 - p50).max(1e-6);
            let z = (x - p50) / spread;
            clamp01(0.45 * baseline + 0.55 * sigmoid(1.2 * z))
        }
        _ => baseline,
    }
}

/// `floor + (1 - floor) * mean_conf * sqrt(min(n, sat) / sat)`.
pub fn confidence(input: &FusionInput, weights: &FusionWeights) -> f64 {
    let floor = clamp01(weights.confidence_floor);
    if input.sample_count == 0 || !input.usable_labels {
        return floor;
    }
    let saturation = weights.sample_saturation.max(1) as f64;
    let coverage = ((input.sample_count as f64).min(saturation) / saturation).sqrt();
    clamp01(floor + (1.0 - floor) * clamp01(input.mean_label_confidence) * coverage)
}

/// `score < t1` → monitor, `t1 <= score < t2` → review, else block.
pub fn band_for(score: f64, weights: &FusionWeights) -> Band {
    if score >= weights.block_threshold {
        Band::Block
    } else if score >= weights.review_threshold {
        Band::Review
    } else {
        Band::Monitor
    }
}

pub fn fuse(input: &FusionInput, weights: &FusionWeights) -> FusionOutput {
    let q = weights.quantiles.as_ref();
    let graph = signal_feature(input.lambda_graph, q.map(|q| (q.graph_p50, q.graph_p90)));
    let ctx = signal_feature(input.lambda_ctx, q.map(|q| (q.ctx_p50, q.ctx_p90)));

    let linear = weights.b0
        + weights.b1 * graph
        + weights.b2 * ctx
        + weights.b3 * clamp01(input.severity_mean)
        + weights.b4 * clamp01(input.targetedness_mean)
        - weights.b5 * clamp01(input.reclaimed_rate)
        + weights.b6 * input.trend_velocity;

    let score = clamp01(sigmoid(linear));
    FusionOutput {
        score,
        confidence: confidence(input, weights),
        band: band_for(score, weights),
        linear,
        model_version: weights.version.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input() -> FusionInput {
        FusionInput {
            lambda_graph: 3.88,
            lambda_ctx: 0.5,
            severity_mean: 0.11,
            targetedness_mean: 0.29,
            reclaimed_rate: 1.0 / 3.0,
            trend_velocity: 0.0,
            sample_count: 3,
            mean_label_confidence: 0.5667,
            usable_labels: true,
        }
    }

    #[test]
    fn compress_is_bounded_and_monotone() {
        assert_eq!(compress(0.0), 0.0);
        assert_eq!(compress(-5.0), 0.0);
        assert_eq!(compress(f64::NAN), 0.0);
        assert!(compress(1.0) < compress(2.0));
        assert!(compress(1e12) <= 1.0);
    }

    #[test]
    fn sigmoid_is_stable_at_extremes() {
        assert_eq!(sigmoid(0.0), 0.5);
        assert!(sigmoid(1000.0) <= 1.0 && sigmoid(1000.0) > 0.99);
        assert!(sigmoid(-1000.0) >= 0.0 && sigmoid(-1000.0) < 0.01);
    }

    #[test]
    fn reference_inputs_land_in_review() {
        let out = fuse(&input(), &FusionWeights::default());
        assert!((out.score - 0.60).abs() < 0.02, "score {}", out.score);
        assert_eq!(out.band, Band::Review);
        assert!((out.confidence - 0.258).abs() < 0.005, "conf {}", out.confidence);
        assert_eq!(out.model_version, "fusion_v1");
    }

    #[test]
    fn fuse_is_deterministic() {
        let w = FusionWeights::default();
        let a = fuse(&input(), &w);
        let b = fuse(&input(), &w);
        assert_eq!(a.score.to_bits(), b.score.to_bits());
        assert_eq!(a.confidence.to_bits(), b.confidence.to_bits());
    }

    #[test]
    fn extreme_trend_stays_bounded() {
        let w = FusionWeights::default();
        for tv in [-1e300, 1e300, f64::MAX, f64::MIN] {
            let out = fuse(
                &FusionInput {
                    trend_velocity: tv,
                    ..input()
                },
                &w,
            );
            assert!((0.0..=1.0).contains(&out.score));
            assert!((0.0..=1.0).contains(&out.confidence));
        }
    }

    #[test]
    fn band_is_monotonic_in_score() {
        let w = FusionWeights::default();
        let mut last = Band::Monitor;
        for i in 0..=1000 {
            let b = band_for(i as f64 / 1000.0, &w);
            assert!(b >= last);
            last = b;
        }
        assert_eq!(band_for(0.3499, &w), Band::Monitor);
        assert_eq!(band_for(0.35, &w), Band::Review);
        assert_eq!(band_for(0.65, &w), Band::Block);
    }

    #[test]
    fn confidence_monotone_and_saturating() {
        let w = FusionWeights::default();
        let at = |n: usize, c: f64| {
            confidence(
                &FusionInput {
                    sample_count: n,
                    mean_label_confidence: c,
                    ..input()
                },
                &w,
            )
        };
        assert_eq!(at(0, 0.9), w.confidence_floor);
        let mut prev = 0.0;
        for n in 0..40 {
            let c = at(n, 0.7);
            assert!(c >= prev);
            prev = c;
        }
        assert_eq!(at(20, 0.7), at(35, 0.7));
        assert!(at(10, 0.4) <= at(10, 0.8));
        assert!((at(20, 1.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn no_usable_labels_gives_floor() {
        let w = FusionWeights::default();
        let c = confidence(
            &FusionInput {
                usable_labels: false,
                ..input()
            },
            &w,
        );
        assert_eq!(c, w.confidence_floor);
    }

    #[test]
    fn quantiles_blend_signal() {
        let plain = signal_feature(2.0, None);
        let blended = signal_feature(2.0, Some((1.0, 3.0)));
        assert_ne!(plain, blended);
        // inverted quantiles fall back to the plain curve
        assert_eq!(signal_feature(2.0, Some((3.0, 1.0))), plain);
    }
}
