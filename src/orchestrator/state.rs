//! Scoring pass state machine.
//!
//! ```text
//! RECEIVED -> TOKENIZED -> {SIGNALS_COMPUTED || LABELS_AGGREGATED} -> FUSED -> PERSISTED
//!     \-> FAILED(invalid_input)
//! ```
//! A pass whose history write does not finish in time stays in `FUSED`.

use serde::Serialize;

use crate::types::ScoreResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    InvalidInput,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "failure")]
pub enum ScoringState {
    Received,
    Tokenized,
    SignalsComputed,
    LabelsAggregated,
    Fused,
    Persisted,
    Failed(FailureKind),
}

impl ScoringState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScoringState::Persisted | ScoringState::Failed(_))
    }

    /// Legal single-step moves. The two branch states may complete in either order.
    pub fn can_advance_to(&self, next: ScoringState) -> bool {
        use ScoringState::*;
        matches!(
            (self, next),
            (Received, Tokenized)
                | (Received, Failed(_))
                | (Tokenized, SignalsComputed)
                | (Tokenized, LabelsAggregated)
                | (SignalsComputed, LabelsAggregated)
                | (LabelsAggregated, SignalsComputed)
                | (SignalsComputed, Fused)
                | (LabelsAggregated, Fused)
                | (Fused, Persisted)
        )
    }
}

/// Ordered record of the states a pass went through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Transitions(Vec<ScoringState>);

impl Default for Transitions {
    fn default() -> Self {
        Self(vec![ScoringState::Received])
    }
}

impl Transitions {
    pub fn current(&self) -> ScoringState {
        self.0.last().copied().unwrap_or(ScoringState::Received)
    }

    /// Appends `next`. An illegal move is a programming error and is only
    /// checked in debug builds.
    pub fn advance(&mut self, next: ScoringState) {
        debug_assert!(
            self.current().can_advance_to(next),
            "illegal transition {:?} -> {:?}",
            self.current(),
            next
        );
        tracing::debug!(from = ?self.current(), to = ?next, "scoring state");
        self.0.push(next);
    }

    pub fn as_slice(&self) -> &[ScoringState] {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum PersistenceStatus {
    Confirmed { id: u64 },
    Failed { reason: String },
    /// The write was still running when `persist_timeout` elapsed. It keeps
    /// running in the background.
    Unconfirmed,
}

/// Result of one pass together with how it ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoringOutcome {
    pub result: ScoreResult,
    pub state: ScoringState,
    pub persistence: PersistenceStatus,
    pub transitions: Transitions,
    /// True when the spectral signals were taken from a preceding identical pass.
    pub signals_reused: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_is_legal() {
        let mut t = Transitions::default();
        for s in [
            ScoringState::Tokenized,
            ScoringState::LabelsAggregated,
            ScoringState::SignalsComputed,
            ScoringState::Fused,
            ScoringState::Persisted,
        ] {
            t.advance(s);
        }
        assert!(t.current().is_terminal());
        assert_eq!(t.as_slice().len(), 6);
    }

    #[test]
    fn cannot_skip_fusion() {
        assert!(!ScoringState::Tokenized.can_advance_to(ScoringState::Persisted));
        assert!(!ScoringState::Fused.can_advance_to(ScoringState::Failed(FailureKind::InvalidInput)));
        assert!(ScoringState::Received.can_advance_to(ScoringState::Failed(FailureKind::InvalidInput)));
        assert!(!ScoringState::Fused.is_terminal());
    }

    #[test]
    fn serializes_with_tags() {
        let s = serde_json::to_value(ScoringState::Failed(FailureKind::InvalidInput)).unwrap();
        assert_eq!(s["state"], "failed");
        assert_eq!(s["failure"], "invalid_input");
        let p = serde_json::to_value(PersistenceStatus::Confirmed { id: 7 }).unwrap();
        assert_eq!(p["status"], "confirmed");
        assert_eq!(p["id"], 7);
    }
}
