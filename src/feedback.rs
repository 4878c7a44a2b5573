//! Reviewer feedback on scored terms.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FeedbackError;
use crate::fusion::Band;
use crate::text::normalize_term;

pub const MAX_NOTES_CHARS: usize = 4000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackType {
    FalsePositive,
    FalseNegative,
    PolicyOverride,
    Other,
}

fn default_locale() -> String {
    "en-US".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRequest {
    pub term: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    pub feedback_type: FeedbackType,
    #[serde(default)]
    pub proposed_band: Option<Band>,
    #[serde(default)]
    pub proposed_score: Option<f64>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl FeedbackRequest {
    pub fn validate(&self) -> Result<(), FeedbackError> {
        if normalize_term(&self.term).is_empty() {
            return Err(FeedbackError::Invalid("term must not be empty".into()));
        }
        if self.locale.trim().is_empty() {
            return Err(FeedbackError::Invalid("locale must not be empty".into()));
        }
        if let Some(s) = self.proposed_score {
            if !s.is_finite() || !(0.0..=1.0).contains(&s) {
                return Err(FeedbackError::Invalid(format!(
                    "proposed_score must be within [0, 1], got {s}"
                )));
            }
        }
        if let Some(notes) = &self.notes {
            let n = notes.chars().count();
            if n > MAX_NOTES_CHARS {
                return Err(FeedbackError::Invalid(format!(
                    "notes exceed {MAX_NOTES_CHARS} characters ({n})"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackRecord {
    pub id: u64,
    pub term: String,
    pub locale: String,
    pub feedback_type: FeedbackType,
    pub proposed_band: Option<Band>,
    pub proposed_score: Option<f64>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait FeedbackStore: Send + Sync {
    /// Validate and store; returns the new id.
    async fn submit(&self, request: FeedbackRequest) -> Result<u64, FeedbackError>;

    /// Newest first.
    async fn list(&self, term: &str, limit: usize) -> Result<Vec<FeedbackRecord>, FeedbackError>;
}

#[derive(Debug, Default)]
pub struct InMemoryFeedback {
    inner: Mutex<Vec<FeedbackRecord>>,
}

impl InMemoryFeedback {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl FeedbackStore for InMemoryFeedback {
    async fn submit(&self, request: FeedbackRequest) -> Result<u64, FeedbackError> {
        request.validate()?;
        let mut v = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let id = v.len() as u64 + 1;
        v.push(FeedbackRecord {
            id,
            term: normalize_term(&request.term),
            locale: request.locale,
            feedback_type: request.feedback_type,
            proposed_band: request.proposed_band,
            proposed_score: request.proposed_score,
            notes: request.notes,
            created_at: Utc::now(),
        });
        Ok(id)
    }

    async fn list(&self, term: &str, limit: usize) -> Result<Vec<FeedbackRecord>, FeedbackError> {
        let term = normalize_term(term);
        let v = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        Ok(v.iter()
            .rev()
            .filter(|r| r.term == term)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> FeedbackRequest {
        FeedbackRequest {
            term: "Slur1".into(),
            locale: "en-US".into(),
            feedback_type: FeedbackType::FalsePositive,
            proposed_band: Some(Band::Monitor),
            proposed_score: Some(0.2),
            notes: Some("reclaimed in context".into()),
        }
    }

    #[tokio::test]
    async fn submit_assigns_ids_and_normalizes_term() {
        let store = InMemoryFeedback::new();
        assert_eq!(store.submit(req()).await.unwrap(), 1);
        assert_eq!(store.submit(req()).await.unwrap(), 2);
        let rows = store.list("slur1", 10).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, 2);
        assert_eq!(rows[0].term, "slur1");
    }

    #[test]
    fn validation_rules() {
        assert!(req().validate().is_ok());
        let mut r = req();
        r.proposed_score = Some(1.5);
        assert!(matches!(r.validate(), Err(FeedbackError::Invalid(_))));
        let mut r = req();
        r.notes = Some("x".repeat(MAX_NOTES_CHARS + 1));
        assert!(r.validate().is_err());
        let mut r = req();
        r.notes = Some("ř".repeat(MAX_NOTES_CHARS));
        assert!(r.validate().is_ok());
        let mut r = req();
        r.term = "   ".into();
        assert!(r.validate().is_err());
    }

    #[test]
    fn feedback_type_wire_names() {
        let r: FeedbackRequest = serde_json::from_str(
            r#"{"term":"x1","feedback_type":"policy_override","proposed_band":"block"}"#,
        )
        .unwrap();
        assert_eq!(r.feedback_type, FeedbackType::PolicyOverride);
        assert_eq!(r.proposed_band, Some(Band::Block));
        assert_eq!(r.locale, "en-US");
    }
}
