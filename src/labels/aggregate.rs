//! Bounded-concurrency labeling and order-stable reduction.

use std::sync::Arc;

use metrics::counter;
use serde::Serialize;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use super::{ContextLabel, DynLabeler};
use crate::error::LabelError;
use crate::text::{context_digest, Context};

/// Result of labeling one context, in input order.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelOutcome {
    pub anchored: bool,
    pub result: Result<ContextLabel, LabelError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct LabelAggregates {
    pub severity_mean: f64,
    pub targetedness_mean: f64,
    pub reclaimed_rate: f64,
    pub mean_confidence: f64,
    /// Successful labels on contexts that contain the term.
    pub sample_count: usize,
    pub successes: usize,
    pub failures: usize,
    pub total: usize,
}

impl LabelAggregates {
    pub fn failures_majority(&self) -> bool {
        self.failures * 2 > self.total
    }

    pub fn no_usable_labels(&self) -> bool {
        self.successes == 0
    }
}

/// Means over successful labels, accumulated in slice order.
pub fn reduce(outcomes: &[LabelOutcome]) -> LabelAggregates {
    let mut agg = LabelAggregates {
        total: outcomes.len(),
        ..LabelAggregates::default()
    };
    let (mut sev, mut tgt, mut rec, mut conf) = (0.0, 0.0, 0.0, 0.0);

    for outcome in outcomes {
        match &outcome.result {
            Ok(label) => {
                agg.successes += 1;
                if outcome.anchored {
                    agg.sample_count += 1;
                }
                sev += label.severity;
                tgt += label.targetedness;
                conf += label.confidence;
                if label.is_reclaimed {
                    rec += 1.0;
                }
            }
            Err(_) => agg.failures += 1,
        }
    }

    if agg.successes > 0 {
        let n = agg.successes as f64;
        agg.severity_mean = sev / n;
        agg.targetedness_mean = tgt / n;
        agg.reclaimed_rate = rec / n;
        agg.mean_confidence = conf / n;
    }
    agg
}

pub struct LabelAggregator {
    labeler: DynLabeler,
    concurrency: usize,
}

impl LabelAggregator {
    /// `concurrency` is clamped to at least 1.
    pub fn new(labeler: DynLabeler, concurrency: usize) -> Self {
        Self {
            labeler,
            concurrency: concurrency.max(1),
        }
    }

    pub fn labeler_name(&self) -> &'static str {
        self.labeler.name()
    }

    /// Label every context (at most `concurrency` calls in flight) and return
    /// the outcomes in context order.
    pub async fn label_all(
        &self,
        term: &str,
        contexts: &[Context],
        locale: &str,
    ) -> Vec<LabelOutcome> {
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let term: Arc<str> = Arc::from(term);
        let locale: Arc<str> = Arc::from(locale);

        let handles: Vec<_> = contexts
            .iter()
            .cloned()
            .map(|ctx| {
                let labeler = Arc::clone(&self.labeler);
                let semaphore = Arc::clone(&semaphore);
                let term = Arc::clone(&term);
                let locale = Arc::clone(&locale);
                tokio::spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| LabelError::Unavailable(e.to_string()))?;
                    labeler.label(&term, &ctx, &locale).await?.validated()
                })
            })
            .collect();

        let mut outcomes = Vec::with_capacity(contexts.len());
        for (ctx, handle) in contexts.iter().zip(handles) {
            let result = match handle.await {
                Ok(r) => r,
                Err(join_err) => Err(LabelError::Unavailable(format!(
                    "labeling task failed: {join_err}"
                ))),
            };
            if let Err(e) = &result {
                counter!("label_failures_total").increment(1);
                warn!(
                    labeler = self.labeler.name(),
                    context = %context_digest(&ctx.raw),
                    error = %e,
                    "label failed, context excluded"
                );
            }
            outcomes.push(LabelOutcome {
                anchored: ctx.is_anchored(),
                result,
            });
        }
        outcomes
    }

    pub async fn aggregate(&self, term: &str, contexts: &[Context], locale: &str) -> LabelAggregates {
        let outcomes = self.label_all(term, contexts, locale).await;
        let agg = reduce(&outcomes);
        debug!(
            successes = agg.successes,
            failures = agg.failures,
            sample_count = agg.sample_count,
            "labels aggregated"
        );
        agg
    }
}
