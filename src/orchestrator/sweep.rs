//! Text sweep: score every candidate term that occurs in a block of free text.
//! The contexts for a term are the sentences that contain it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{default_locale, Orchestrator, ScoreRequest};
use crate::error::ScoringError;
use crate::fusion::Band;
use crate::text::{contains_sequence, normalize, split_sentences};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSweepRequest {
    pub text: String,
    #[serde(default = "default_locale")]
    pub locale: String,
    pub candidate_terms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSweepItem {
    pub term: String,
    pub score: f64,
    pub confidence: f64,
    pub band: Band,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextSweepResponse {
    pub locale: String,
    /// Distinct candidates that occur in the text.
    pub terms_found: usize,
    /// Distinct candidates that do not occur (or normalize to nothing).
    pub skipped: usize,
    pub results: Vec<TextSweepItem>,
}

impl Orchestrator {
    /// Fails only when `text` is blank. Each found term runs the full pipeline,
    /// including persistence.
    pub async fn sweep_text(
        &self,
        request: TextSweepRequest,
    ) -> Result<TextSweepResponse, ScoringError> {
        if request.text.trim().is_empty() {
            return Err(ScoringError::InvalidInput(
                "text must not be empty".to_string(),
            ));
        }
        let locale = self.locale_or_default(&request.locale);
        let sentences: Vec<(String, Vec<String>)> = split_sentences(&request.text)
            .into_iter()
            .map(|s| {
                let tokens = normalize(&s);
                (s, tokens)
            })
            .collect();

        // distinct by canonical form, first spelling wins
        let mut seen = BTreeSet::new();
        let mut candidates = Vec::new();
        let mut skipped = 0usize;
        for raw in &request.candidate_terms {
            let tokens = normalize(raw);
            if tokens.is_empty() {
                skipped += 1;
                continue;
            }
            if seen.insert(tokens.join(" ")) {
                candidates.push(tokens);
            }
        }

        let mut results = Vec::new();
        for term_tokens in candidates {
            let term = term_tokens.join(" ");
            let contexts: Vec<String> = sentences
                .iter()
                .filter(|(_, tokens)| contains_sequence(tokens, &term_tokens))
                .map(|(s, _)| s.clone())
                .collect();
            if contexts.is_empty() {
                debug!(term = %term, "sweep: term not in text");
                skipped += 1;
                continue;
            }

            let req = ScoreRequest {
                term: term.clone(),
                locale: locale.clone(),
                contexts,
                trend_velocity: 0.0,
            };
            match self.score_term(req).await {
                Ok(outcome) => results.push(TextSweepItem {
                    term: outcome.result.term,
                    score: outcome.result.score,
                    confidence: outcome.result.confidence,
                    band: outcome.result.band,
                }),
                Err(e) => {
                    warn!(term = %term, error = %e, "sweep: term skipped");
                    skipped += 1;
                }
            }
        }

        info!(
            locale = %locale,
            terms_found = results.len(),
            skipped,
            "text sweep finished"
        );
        Ok(TextSweepResponse {
            locale,
            terms_found: results.len(),
            skipped,
            results,
        })
    }
}
