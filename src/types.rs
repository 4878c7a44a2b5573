//! Result types shared by the orchestrator, the history store and the HTTP layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fusion::Band;

/// Recoverable condition attached to a result. Serialized as a snake_case tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Warning {
    TermNotFound,
    SpectralDegenerate,
    LabelFailuresMajority,
    NoUsableLabels,
    PersistenceFailed,
    PersistenceUnconfirmed,
}

impl Warning {
    pub fn as_str(&self) -> &'static str {
        match self {
            Warning::TermNotFound => "term_not_found",
            Warning::SpectralDegenerate => "spectral_degenerate",
            Warning::LabelFailuresMajority => "label_failures_majority",
            Warning::NoUsableLabels => "no_usable_labels",
            Warning::PersistenceFailed => "persistence_failed",
            Warning::PersistenceUnconfirmed => "persistence_unconfirmed",
        }
    }
}

impl std::fmt::Display for Warning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Insertion-ordered, duplicate-free warning list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Warnings(Vec<Warning>);

impl Warnings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `w` unless already present.
    pub fn push(&mut self, w: Warning) {
        if !self.0.contains(&w) {
            self.0.push(w);
        }
    }

    pub fn contains(&self, w: Warning) -> bool {
        self.0.contains(&w)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Warning> {
        self.0.iter()
    }

    pub fn as_slice(&self) -> &[Warning] {
        &self.0
    }
}

impl Extend<Warning> for Warnings {
    fn extend<T: IntoIterator<Item = Warning>>(&mut self, iter: T) {
        for w in iter {
            self.push(w);
        }
    }
}

/// Outcome of one scoring pass. The only scoring entity that is persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreResult {
    pub term: String,
    pub locale: String,
    pub score: f64,
    pub confidence: f64,
    pub band: Band,
    pub lambda_ctx: f64,
    pub lambda_graph: f64,
    pub severity_mean: f64,
    pub targetedness_mean: f64,
    pub reclaimed_rate: f64,
    pub trend_velocity: f64,
    pub sample_count: usize,
    pub warnings: Warnings,
    pub model_version: String,
    pub timestamp: DateTime<Utc>,
}

impl ScoreResult {
    /// Equality on everything except the timestamp.
    pub fn same_values(&self, other: &ScoreResult) -> bool {
        self.term == other.term
            && self.locale == other.locale
            && self.score == other.score
            && self.confidence == other.confidence
            && self.band == other.band
            && self.lambda_ctx == other.lambda_ctx
            && self.lambda_graph == other.lambda_graph
            && self.severity_mean == other.severity_mean
            && self.targetedness_mean == other.targetedness_mean
            && self.reclaimed_rate == other.reclaimed_rate
            && self.trend_velocity == other.trend_velocity
            && self.sample_count == other.sample_count
            && self.warnings == other.warnings
            && self.model_version == other.model_version
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn warnings_keep_first_insertion_order() {
        let mut w = Warnings::new();
        w.push(Warning::SpectralDegenerate);
        w.push(Warning::TermNotFound);
        w.push(Warning::SpectralDegenerate);
        assert_eq!(
            w.as_slice(),
            &[Warning::SpectralDegenerate, Warning::TermNotFound]
        );
    }

    #[test]
    fn warnings_serialize_as_tags() {
        let mut w = Warnings::new();
        w.extend([Warning::NoUsableLabels, Warning::PersistenceUnconfirmed]);
        let json = serde_json::to_string(&w).unwrap();
        assert_eq!(json, r#"["no_usable_labels","persistence_unconfirmed"]"#);
        assert_eq!(Warning::LabelFailuresMajority.to_string(), "label_failures_majority");
    }
}
