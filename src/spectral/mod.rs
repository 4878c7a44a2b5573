//! # Spectral Signal Engine
//! Two eigenvalue signals over the contexts of a term:
//! - `lambda_ctx`: dominant eigenvalue of the covariance of hashed context windows.
//! - `lambda_graph`: spectral radius of the co-occurrence neighbourhood of the term.
//!
//! Synchronous and CPU-bound; callers run it on the blocking pool. Never fails:
//! anything unusable comes back as `0.0` with the matching degenerate flag.

pub mod features;
pub mod graph;
pub mod power;

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::text::Context;
use features::{feature_row, CovarianceOperator};
use graph::{CooccurrenceGraph, ShiftedAdjacency};
use power::dominant_eigenvalue;

/// Covariance traces at or below this count as zero variance.
pub const VARIANCE_EPSILON: f64 = 1e-12;

pub const DEFAULT_STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "for", "from", "had", "has",
    "have", "he", "her", "his", "i", "if", "in", "into", "is", "it", "its", "me", "my", "of", "on",
    "or", "our", "she", "that", "the", "their", "them", "they", "this", "to", "was", "we", "were",
    "with", "you", "your",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpectralConfig {
    pub feature_dim: usize,
    pub context_window: usize,
    pub cooccurrence_window: usize,
    pub min_token_len: usize,
    /// Radius of the term's neighbourhood in the co-occurrence graph.
    pub graph_hops: usize,
    pub stopwords: BTreeSet<String>,
}

impl Default for SpectralConfig {
    fn default() -> Self {
        Self {
            feature_dim: 256,
            context_window: 4,
            cooccurrence_window: 6,
            min_token_len: 2,
            graph_hops: 2,
            stopwords: DEFAULT_STOPWORDS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalEstimate {
    pub value: f64,
    pub degenerate: bool,
}

impl SignalEstimate {
    fn degenerate() -> Self {
        Self {
            value: 0.0,
            degenerate: true,
        }
    }

    /// NaN, infinite or negative estimates collapse to a degenerate zero.
    fn clamped(raw: f64) -> Self {
        if raw.is_finite() && raw >= 0.0 {
            Self {
                value: raw,
                degenerate: false,
            }
        } else {
            Self::degenerate()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SpectralSignals {
    pub lambda_ctx: f64,
    pub lambda_graph: f64,
    /// Contexts containing the term.
    pub sample_count: usize,
    pub ctx_degenerate: bool,
    pub graph_degenerate: bool,
}

impl SpectralSignals {
    pub fn any_degenerate(&self) -> bool {
        self.ctx_degenerate || self.graph_degenerate
    }
}

#[derive(Debug, Clone, Default)]
pub struct SpectralEngine {
    config: SpectralConfig,
}

impl SpectralEngine {
    pub fn new(config: SpectralConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SpectralConfig {
        &self.config
    }

    pub fn compute(&self, term_tokens: &[String], contexts: &[Context]) -> SpectralSignals {
        let ctx = self.context_signal(term_tokens, contexts);
        let graph = self.graph_signal(term_tokens, contexts);
        let sample_count = contexts.iter().filter(|c| c.is_anchored()).count();
        debug!(
            lambda_ctx = ctx.value,
            lambda_graph = graph.value,
            ctx_degenerate = ctx.degenerate,
            graph_degenerate = graph.degenerate,
            sample_count,
            "spectral signals computed"
        );
        SpectralSignals {
            lambda_ctx: ctx.value,
            lambda_graph: graph.value,
            sample_count,
            ctx_degenerate: ctx.degenerate,
            graph_degenerate: graph.degenerate,
        }
    }

    /// Dominant covariance eigenvalue of the context feature matrix.
    pub fn context_signal(&self, term_tokens: &[String], contexts: &[Context]) -> SignalEstimate {
        if contexts.len() < 2 || self.config.feature_dim == 0 {
            return SignalEstimate::degenerate();
        }
        let rows: Vec<Vec<f64>> = contexts
            .iter()
            .map(|c| {
                feature_row(
                    c,
                    term_tokens.len(),
                    self.config.context_window,
                    self.config.feature_dim,
                )
            })
            .collect();
        let op = CovarianceOperator::new(rows, self.config.feature_dim);
        let trace = op.trace();
        if !trace.is_finite() || trace <= VARIANCE_EPSILON {
            return SignalEstimate::degenerate();
        }
        SignalEstimate::clamped(dominant_eigenvalue(&op).value)
    }

    /// Spectral radius of the term's neighbourhood, `graph_hops` edges out,
    /// in the co-occurrence graph of the contexts that contain it.
    pub fn graph_signal(&self, term_tokens: &[String], contexts: &[Context]) -> SignalEstimate {
        if term_tokens.is_empty() || !contexts.iter().any(Context::is_anchored) {
            return SignalEstimate::degenerate();
        }
        let graph = CooccurrenceGraph::build(
            contexts.iter().filter(|c| c.is_anchored()),
            term_tokens,
            self.config.cooccurrence_window,
            self.config.min_token_len,
            &self.config.stopwords,
        )
        .ego(term_tokens, self.config.graph_hops);
        if graph.edge_count() == 0 {
            return SignalEstimate::degenerate();
        }
        SignalEstimate::clamped(dominant_eigenvalue(&ShiftedAdjacency(&graph)).value - 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::prepare;

    fn signals(term: &str, raw: &[&str]) -> SpectralSignals {
        let owned: Vec<String> = raw.iter().map(|s| s.to_string()).collect();
        let p = prepare(term, &owned).unwrap();
        SpectralEngine::default().compute(&p.term_tokens, &p.contexts)
    }

    #[test]
    fn single_context_is_ctx_degenerate() {
        let s = signals("slur1", &["You are a slur1 and nobody wants you here."]);
        assert_eq!(s.lambda_ctx, 0.0);
        assert!(s.ctx_degenerate);
        // one context still has a graph
        assert!(s.lambda_graph > 0.0);
        assert!(!s.graph_degenerate);
    }

    #[test]
    fn stopword_only_contexts_are_graph_degenerate() {
        let s = signals("xx", &["the and of to xx", "you we they xx"]);
        assert_eq!(s.lambda_graph, 0.0);
        assert!(s.graph_degenerate);
    }

    #[test]
    fn identical_contexts_have_zero_variance() {
        let s = signals("term", &["a term here", "a term here", "a term here"]);
        assert_eq!(s.lambda_ctx, 0.0);
        assert!(s.ctx_degenerate);
    }

    #[test]
    fn absent_term_yields_zero_signals() {
        let s = signals("missing", &["alpha beta gamma", "delta epsilon zeta"]);
        assert_eq!(s.sample_count, 0);
        assert_eq!(s.lambda_ctx, 0.0);
        assert!(s.ctx_degenerate);
        assert_eq!(s.lambda_graph, 0.0);
        assert!(s.graph_degenerate);
    }

    #[test]
    fn unrelated_contexts_do_not_feed_the_graph() {
        let alone = signals("slur1", &["slur1 alpha", "slur1 alpha"]);
        let padded = signals(
            "slur1",
            &[
                "slur1 alpha",
                "slur1 alpha",
                "gamma delta epsilon zeta eta theta iota kappa",
            ],
        );
        // one edge of weight 2: radius 2
        assert!((alone.lambda_graph - 2.0).abs() < 1e-6, "got {}", alone.lambda_graph);
        assert!((padded.lambda_graph - alone.lambda_graph).abs() < 1e-9);
    }

    #[test]
    fn reordering_contexts_does_not_move_signals() {
        let a = signals(
            "slur1",
            &[
                "You are a slur1 and nobody wants you here.",
                "They quoted 'slur1' in a documentary.",
                "We reclaimed slur1 in our own community.",
            ],
        );
        let b = signals(
            "slur1",
            &[
                "We reclaimed slur1 in our own community.",
                "You are a slur1 and nobody wants you here.",
                "They quoted 'slur1' in a documentary.",
            ],
        );
        assert!((a.lambda_ctx - b.lambda_ctx).abs() < 1e-9);
        assert!((a.lambda_graph - b.lambda_graph).abs() < 1e-9);
        assert!(a.lambda_ctx > 0.0 && a.lambda_graph > 0.0);
    }
}
