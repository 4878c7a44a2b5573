use axum::{routing::get, Router};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the global Prometheus recorder and describe the scoring metrics.
    /// Fails if a recorder is already installed in this process.
    pub fn init() -> anyhow::Result<Self> {
        // Use default buckets to avoid API differences across crate versions.
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| anyhow::anyhow!("prometheus: install recorder: {e}"))?;
        describe();
        Ok(Self { handle })
    }

    /// Returns a router exposing `/metrics` with the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

fn describe() {
    describe_counter!("scoring_runs_total", "Scoring passes that produced a result.");
    describe_counter!(
        "scoring_failures_total",
        "Scoring requests rejected as invalid input."
    );
    describe_counter!(
        "label_failures_total",
        "Per-context labeling calls that failed and were excluded."
    );
    describe_counter!(
        "spectral_degenerate_total",
        "Passes with at least one degenerate spectral signal."
    );
    describe_counter!(
        "persistence_failures_total",
        "History writes that returned an error."
    );
    describe_histogram!("scoring_duration_ms", "End-to-end scoring time in milliseconds.");
}
