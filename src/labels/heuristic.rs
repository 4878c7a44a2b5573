//! Deterministic keyword labeler. Works on the normalized tokens of a context,
//! plus the raw text for quotation marks, `@` mentions and `!`.

use async_trait::async_trait;

use super::{ContextLabel, ContextLabeler, TargetType};
use crate::error::LabelError;
use crate::text::{contains_sequence, normalize, Context};

pub const SOURCE_TAG: &str = "heuristic_v1";

#[derive(Debug, Clone)]
pub struct HeuristicLabeler {
    pub second_person_cues: Vec<&'static str>,
    /// Multi-word cues are matched as token sequences.
    pub group_cues: Vec<&'static str>,
    /// Matched as token prefixes (`hate` also hits `hateful`).
    pub aggression_cues: Vec<&'static str>,
    pub reclaim_cues: Vec<&'static str>,
}

impl Default for HeuristicLabeler {
    fn default() -> Self {
        Self {
            second_person_cues: vec!["you", "your", "yourself"],
            group_cues: vec!["they", "them", "those people"],
            aggression_cues: vec![
                "hate",
                "kill",
                "attack",
                "destroy",
                "worthless",
                "disgusting",
                "stupid",
                "filthy",
            ],
            reclaim_cues: vec!["we", "our", "ours", "us", "reclaim", "reclaimed", "reclaiming"],
        }
    }
}

fn clamp01(v: f64) -> f64 {
    v.clamp(0.0, 1.0)
}

impl HeuristicLabeler {
    /// Pure labeling rules; the async trait method only wraps this.
    pub fn label_sync(&self, term: &str, context: &Context) -> ContextLabel {
        let tokens = &context.tokens;
        let has = |cue: &str| tokens.iter().any(|t| t == cue);

        let term_norm = normalize(term).join(" ");
        let raw = context.raw.to_lowercase();
        let is_quoted = [
            format!("\"{term_norm}\""),
            format!("'{term_norm}'"),
            format!("\u{201c}{term_norm}\u{201d}"),
            format!("\u{2018}{term_norm}\u{2019}"),
        ]
        .iter()
        .any(|q| raw.contains(q.as_str()));

        let mut targeted_hits = self.second_person_cues.iter().filter(|c| has(**c)).count();
        if raw.contains('@') {
            targeted_hits += 1;
        }
        let group_hit = self
            .group_cues
            .iter()
            .any(|cue| contains_sequence(tokens, &normalize(cue)));
        let aggression_hits = self
            .aggression_cues
            .iter()
            .filter(|cue| tokens.iter().any(|t| t.starts_with(**cue)))
            .count();
        let reclaim_hits = self.reclaim_cues.iter().filter(|c| has(**c)).count();

        let mut targetedness = 0.2 + 0.25 * targeted_hits as f64;
        if group_hit {
            targetedness += 0.15;
        }
        if is_quoted {
            targetedness *= 0.75;
        }

        let mut severity = 0.15 + 0.17 * aggression_hits as f64;
        if context.raw.contains('!') {
            severity += 0.05;
        }
        if is_quoted {
            severity *= 0.65;
        }

        let is_reclaimed = reclaim_hits >= 2 && context.is_anchored();
        if is_reclaimed {
            severity *= 0.55;
            targetedness *= 0.8;
        }

        let mut confidence = 0.58 + (0.04 * (targeted_hits + aggression_hits) as f64).min(0.25);
        if is_quoted && targeted_hits == 0 {
            confidence -= 0.08;
        }

        let target_type = if targeted_hits > 0 {
            TargetType::Individual
        } else if group_hit {
            TargetType::Group
        } else {
            TargetType::None
        };

        ContextLabel {
            targetedness: clamp01(targetedness),
            severity: clamp01(severity),
            is_quoted,
            is_reclaimed,
            target_type,
            confidence: clamp01(confidence),
            source: SOURCE_TAG.to_string(),
        }
    }
}

#[async_trait]
impl ContextLabeler for HeuristicLabeler {
    async fn label(
        &self,
        term: &str,
        context: &Context,
        _locale: &str,
    ) -> Result<ContextLabel, LabelError> {
        Ok(self.label_sync(term, context))
    }

    fn name(&self) -> &'static str {
        "heuristic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(term: &str, raw: &str) -> ContextLabel {
        let ctx = Context::new(raw, &normalize(term));
        HeuristicLabeler::default().label_sync(term, &ctx)
    }

    #[test]
    fn second_person_is_targeted_individual() {
        let l = label("slur1", "You are a slur1 and nobody wants you here.");
        assert_eq!(l.target_type, TargetType::Individual);
        assert!((l.targetedness - 0.45).abs() < 1e-12);
        assert!((l.severity - 0.15).abs() < 1e-12);
        assert!((l.confidence - 0.62).abs() < 1e-12);
        assert!(!l.is_quoted && !l.is_reclaimed);
    }

    #[test]
    fn quoted_group_mention_is_dampened() {
        let l = label("slur1", "They quoted 'slur1' in a documentary.");
        assert!(l.is_quoted);
        assert_eq!(l.target_type, TargetType::Group);
        assert!((l.targetedness - 0.35 * 0.75).abs() < 1e-12);
        assert!((l.severity - 0.15 * 0.65).abs() < 1e-12);
        assert!((l.confidence - 0.50).abs() < 1e-12);
    }

    #[test]
    fn in_group_usage_is_reclaimed() {
        let l = label("slur1", "We reclaimed slur1 in our own community.");
        assert!(l.is_reclaimed);
        assert!((l.severity - 0.15 * 0.55).abs() < 1e-12);
        assert!((l.targetedness - 0.2 * 0.8).abs() < 1e-12);
    }

    #[test]
    fn reclaim_requires_the_term() {
        let l = label("slur1", "We reclaimed our own words.");
        assert!(!l.is_reclaimed);
    }

    #[test]
    fn aggression_raises_severity() {
        let l = label("slur1", "I hate you, you worthless slur1!");
        // hate + worthless, plus the exclamation
        assert!((l.severity - (0.15 + 0.34 + 0.05)).abs() < 1e-12);
        assert!(l.severity > label("slur1", "a slur1 here").severity);
    }

    #[test]
    fn outputs_stay_in_unit_interval() {
        let l = label(
            "x1",
            "@you your yourself x1 hate kill attack destroy worthless disgusting stupid filthy!!!",
        );
        for v in [l.targetedness, l.severity, l.confidence] {
            assert!((0.0..=1.0).contains(&v));
        }
    }
}
