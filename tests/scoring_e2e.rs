// tests/scoring_e2e.rs

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use eigenslur::error::{HistoryError, LabelError};
use eigenslur::fusion::{Band, FusionWeights, WeightsHandle};
use eigenslur::history::{HistoryStore, InMemoryHistory, ScoreHistoryEntry};
use eigenslur::labels::{ContextLabel, ContextLabeler, DynLabeler, HeuristicLabeler};
use eigenslur::orchestrator::{
    Orchestrator, OrchestratorConfig, PersistenceStatus, ScoreRequest, ScoringState,
};
use eigenslur::text::Context;
use eigenslur::types::{ScoreResult, Warning};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

fn slur1_contexts() -> Vec<String> {
    vec![
        "You are a slur1 and nobody wants you here.".to_string(),
        "They quoted 'slur1' in a documentary.".to_string(),
        "We reclaimed slur1 in our own community.".to_string(),
    ]
}

fn build(labeler: DynLabeler, history: Arc<dyn HistoryStore>, persist_ms: u64) -> Orchestrator {
    let config = OrchestratorConfig {
        persist_timeout: Duration::from_millis(persist_ms),
        ..OrchestratorConfig::default()
    };
    Orchestrator::new(
        config,
        labeler,
        Arc::new(WeightsHandle::fixed(FusionWeights::default())),
        history,
    )
}

fn heuristic() -> Orchestrator {
    build(
        Arc::new(HeuristicLabeler::default()),
        Arc::new(InMemoryHistory::with_capacity(100)),
        2000,
    )
}

#[tokio::test]
async fn slur1_reference_case() {
    let o = heuristic();
    let out = o
        .score_term(ScoreRequest::new("slur1", slur1_contexts()))
        .await
        .expect("scoring failed");
    let r = &out.result;

    assert!(matches!(r.band, Band::Monitor | Band::Review), "band {:?}", r.band);
    assert!((r.reclaimed_rate - 1.0 / 3.0).abs() < 0.01);
    assert!(r.confidence > 0.0 && r.confidence < 1.0);
    assert!((0.0..=1.0).contains(&r.score));
    assert!(r.lambda_ctx > 0.0 && r.lambda_graph > 0.0);
    assert_eq!(r.sample_count, 3);
    assert!(r.warnings.is_empty(), "warnings {:?}", r.warnings);
    assert_eq!(r.model_version, "fusion_v1");

    assert_eq!(out.state, ScoringState::Persisted);
    assert!(matches!(out.persistence, PersistenceStatus::Confirmed { .. }));
    assert_eq!(out.transitions.as_slice().first(), Some(&ScoringState::Received));

    let stored = o.history("slur1", Some("en-US"), 10).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].result.score, r.score);
}

#[tokio::test]
async fn absent_term_is_flagged_not_fatal() {
    let o = heuristic();
    let out = o
        .score_term(ScoreRequest::new(
            "slur9",
            vec![
                "Nothing relevant in here at all.".to_string(),
                "Another sentence about gardening.".to_string(),
            ],
        ))
        .await
        .unwrap();
    let r = &out.result;
    assert!(r.warnings.contains(Warning::TermNotFound));
    assert!(r.warnings.contains(Warning::SpectralDegenerate));
    assert_eq!(r.sample_count, 0);
    assert_eq!(r.lambda_ctx, 0.0);
    // unrelated text around the term must not produce a graph signal
    assert_eq!(r.lambda_graph, 0.0);
    assert_eq!(r.band, Band::Monitor);
    assert_eq!(r.confidence, FusionWeights::default().confidence_floor);
}

#[tokio::test]
async fn single_context_is_degenerate_not_fatal() {
    let o = heuristic();
    let out = o
        .score_term(ScoreRequest::new(
            "slur1",
            vec!["You are a slur1 and nobody wants you here.".to_string()],
        ))
        .await
        .unwrap();
    assert_eq!(out.result.lambda_ctx, 0.0);
    assert!(out.result.warnings.contains(Warning::SpectralDegenerate));
    assert_eq!(out.state, ScoringState::Persisted);
}

#[tokio::test]
async fn permuted_contexts_give_same_signals() {
    let o = heuristic();
    let base = o
        .score_term(ScoreRequest::new("slur1", slur1_contexts()))
        .await
        .unwrap()
        .result;

    let mut rng = StdRng::seed_from_u64(7);
    for _ in 0..5 {
        let mut shuffled = slur1_contexts();
        shuffled.push("Some unrelated slur1 chatter with friends.".to_string());
        shuffled.shuffle(&mut rng);
        let mut reference = slur1_contexts();
        reference.push("Some unrelated slur1 chatter with friends.".to_string());

        let a = o
            .score_term(ScoreRequest::new("slur1", reference))
            .await
            .unwrap()
            .result;
        let b = o
            .score_term(ScoreRequest::new("slur1", shuffled))
            .await
            .unwrap()
            .result;
        for (x, y) in [
            (a.lambda_ctx, b.lambda_ctx),
            (a.lambda_graph, b.lambda_graph),
            (a.severity_mean, b.severity_mean),
            (a.targetedness_mean, b.targetedness_mean),
            (a.reclaimed_rate, b.reclaimed_rate),
            (a.score, b.score),
        ] {
            assert!((x - y).abs() < 1e-9, "{x} vs {y}");
        }
    }
    assert!(base.lambda_ctx > 0.0);
}

#[tokio::test]
async fn invalid_input_is_rejected() {
    let o = heuristic();
    assert!(o
        .score_term(ScoreRequest::new("   ", slur1_contexts()))
        .await
        .is_err());
    assert!(o
        .score_term(ScoreRequest::new("slur1", vec!["  ".to_string()]))
        .await
        .is_err());
    assert!(o.history("slur1", None, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_identical_requests_match() {
    let o = Arc::new(heuristic());
    let a = {
        let o = Arc::clone(&o);
        tokio::spawn(async move { o.score_term(ScoreRequest::new("slur1", slur1_contexts())).await })
    };
    let b = {
        let o = Arc::clone(&o);
        tokio::spawn(async move { o.score_term(ScoreRequest::new("slur1", slur1_contexts())).await })
    };
    let (a, b) = (a.await.unwrap().unwrap(), b.await.unwrap().unwrap());
    assert!(a.result.same_values(&b.result));
    // the second request waits for the first and reuses its signals
    assert_eq!(
        [a.signals_reused, b.signals_reused].iter().filter(|r| **r).count(),
        1
    );
    assert!(o.inflight().is_empty());
    assert_eq!(o.history("slur1", None, 10).await.unwrap().len(), 2);
}

// ------------------------------------------------------------
// Failing collaborators
// ------------------------------------------------------------

struct BrokenHistory;

#[async_trait]
impl HistoryStore for BrokenHistory {
    async fn append(&self, _result: &ScoreResult) -> Result<u64, HistoryError> {
        Err(HistoryError::Unavailable("disk on fire".into()))
    }
    async fn query(
        &self,
        _term: &str,
        _locale: Option<&str>,
        _limit: usize,
    ) -> Result<Vec<ScoreHistoryEntry>, HistoryError> {
        Err(HistoryError::Unavailable("disk on fire".into()))
    }
    async fn recent(&self, _limit: usize) -> Result<Vec<ScoreHistoryEntry>, HistoryError> {
        Ok(Vec::new())
    }
    fn backend(&self) -> &'static str {
        "broken"
    }
}

/// Takes far longer than the orchestrator waits, then succeeds.
struct SlowHistory {
    inner: InMemoryHistory,
    delay: Duration,
}

#[async_trait]
impl HistoryStore for SlowHistory {
    async fn append(&self, result: &ScoreResult) -> Result<u64, HistoryError> {
        tokio::time::sleep(self.delay).await;
        self.inner.append(result).await
    }
    async fn query(
        &self,
        term: &str,
        locale: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ScoreHistoryEntry>, HistoryError> {
        self.inner.query(term, locale, limit).await
    }
    async fn recent(&self, limit: usize) -> Result<Vec<ScoreHistoryEntry>, HistoryError> {
        self.inner.recent(limit).await
    }
    fn backend(&self) -> &'static str {
        "slow"
    }
}

#[tokio::test]
async fn persistence_failure_still_returns_result() {
    let o = build(
        Arc::new(HeuristicLabeler::default()),
        Arc::new(BrokenHistory),
        2000,
    );
    let out = o
        .score_term(ScoreRequest::new("slur1", slur1_contexts()))
        .await
        .unwrap();
    assert!(out.result.warnings.contains(Warning::PersistenceFailed));
    assert_eq!(out.state, ScoringState::Persisted);
    assert!(matches!(out.persistence, PersistenceStatus::Failed { .. }));
}

#[tokio::test]
async fn slow_persistence_is_unconfirmed_but_lands() {
    let history = Arc::new(SlowHistory {
        inner: InMemoryHistory::with_capacity(10),
        delay: Duration::from_millis(300),
    });
    let o = build(Arc::new(HeuristicLabeler::default()), history.clone(), 20);
    let out = o
        .score_term(ScoreRequest::new("slur1", slur1_contexts()))
        .await
        .unwrap();
    assert!(out.result.warnings.contains(Warning::PersistenceUnconfirmed));
    assert_eq!(out.state, ScoringState::Fused);
    assert_eq!(out.persistence, PersistenceStatus::Unconfirmed);

    // the detached write completes on its own
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(history.inner.recent(10).await.unwrap().len(), 1);
}

#[tokio::test]
async fn dropping_the_caller_after_fusion_keeps_the_write() {
    let history = Arc::new(SlowHistory {
        inner: InMemoryHistory::with_capacity(10),
        delay: Duration::from_millis(300),
    });
    let o = build(Arc::new(HeuristicLabeler::default()), history.clone(), 5000);
    // give up long before the write finishes
    let _ = tokio::time::timeout(
        Duration::from_millis(150),
        o.score_term(ScoreRequest::new("slur1", slur1_contexts())),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(history.inner.recent(10).await.unwrap().len(), 1);
}

/// Fails every context whose text has an even number of tokens.
struct Flaky {
    calls: AtomicUsize,
    fail_all: bool,
}

#[async_trait]
impl ContextLabeler for Flaky {
    async fn label(
        &self,
        term: &str,
        context: &Context,
        _locale: &str,
    ) -> Result<ContextLabel, LabelError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all || context.tokens.len() % 2 == 0 {
            return Err(LabelError::Malformed("bad payload".into()));
        }
        Ok(HeuristicLabeler::default().label_sync(term, context))
    }
    fn name(&self) -> &'static str {
        "flaky"
    }
}

#[tokio::test]
async fn majority_label_failures_warn_and_continue() {
    let labeler = Arc::new(Flaky {
        calls: AtomicUsize::new(0),
        fail_all: false,
    });
    let o = build(
        labeler.clone(),
        Arc::new(InMemoryHistory::with_capacity(10)),
        2000,
    );
    // token counts: 2, 4, 3 -> two failures out of three
    let out = o
        .score_term(ScoreRequest::new(
            "slur1",
            vec![
                "you slur1".to_string(),
                "they said slur1 again".to_string(),
                "our slur1 here".to_string(),
            ],
        ))
        .await
        .unwrap();
    assert_eq!(labeler.calls.load(Ordering::SeqCst), 3);
    assert!(out.result.warnings.contains(Warning::LabelFailuresMajority));
    assert!(!out.result.warnings.contains(Warning::NoUsableLabels));
    assert_eq!(out.result.sample_count, 1);
}

#[tokio::test]
async fn no_usable_labels_uses_floor_confidence() {
    let o = build(
        Arc::new(Flaky {
            calls: AtomicUsize::new(0),
            fail_all: true,
        }),
        Arc::new(InMemoryHistory::with_capacity(10)),
        2000,
    );
    let out = o
        .score_term(ScoreRequest::new("slur1", slur1_contexts()))
        .await
        .unwrap();
    let r = &out.result;
    assert!(r.warnings.contains(Warning::NoUsableLabels));
    assert!(r.warnings.contains(Warning::LabelFailuresMajority));
    assert_eq!(r.confidence, FusionWeights::default().confidence_floor);
    assert_eq!(r.severity_mean, 0.0);
    assert_eq!(r.sample_count, 0);
    // spectral signals still drive the score
    assert!(r.lambda_graph > 0.0);
    assert!((0.0..=1.0).contains(&r.score));
}

#[tokio::test]
async fn calibration_installs_new_snapshot() {
    let o = heuristic();
    for i in 0..85 {
        let mut contexts = slur1_contexts();
        contexts.push(format!("Variant number {i} with slur1 and word{i}."));
        o.score_term(ScoreRequest::new("slur1", contexts))
            .await
            .unwrap();
    }
    let report = o.calibrate().await.unwrap();
    assert!(report.applied);
    assert_eq!(report.samples, 85);
    assert_eq!(report.version, "fusion_v1+cal85");
    assert!(report.review_threshold < report.block_threshold);
    assert_eq!(o.weights().current().version, "fusion_v1+cal85");

    let next = o
        .score_term(ScoreRequest::new("slur1", slur1_contexts()))
        .await
        .unwrap();
    assert_eq!(next.result.model_version, "fusion_v1+cal85");
}
