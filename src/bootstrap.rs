// src/bootstrap.rs
use std::sync::Arc;

use anyhow::Context as _;
use metrics_exporter_prometheus::PrometheusHandle;
use tracing::info;

use crate::api::AppState;
use crate::config::Settings;
use crate::feedback::{FeedbackStore, InMemoryFeedback};
use crate::fusion::WeightsHandle;
use crate::history::{HistoryStore, InMemoryHistory, JsonlHistory};
use crate::labels::build_labeler;
use crate::orchestrator::Orchestrator;

/// Everything the HTTP layer needs, built from [`Settings`].
pub struct Runtime {
    pub settings: Settings,
    pub orchestrator: Arc<Orchestrator>,
    pub feedback: Arc<dyn FeedbackStore>,
}

impl Runtime {
    pub async fn from_settings(settings: Settings) -> anyhow::Result<Self> {
        settings.validate()?;
        let labeler = build_labeler(&settings.labeler).context("build labeler")?;
        let weights = Arc::new(WeightsHandle::watching(&settings.weights_path));

        let history: Arc<dyn HistoryStore> = match &settings.history.path {
            Some(path) => {
                let store = JsonlHistory::open(path, settings.history.capacity)
                    .await
                    .with_context(|| format!("open history file {}", path.display()))?;
                info!(path = %store.path().display(), "history file opened");
                Arc::new(store)
            }
            None => Arc::new(InMemoryHistory::with_capacity(settings.history.capacity)),
        };

        // Safe diagnostics only: never the API key.
        info!(
            app = %settings.app_name,
            labeler = labeler.name(),
            history = history.backend(),
            weights = %weights.current().version,
            weights_path = ?weights.path(),
            label_concurrency = settings.label_concurrency,
            "runtime ready"
        );

        let orchestrator = Arc::new(Orchestrator::new(
            settings.orchestrator(),
            labeler,
            weights,
            history,
        ));
        Ok(Self {
            settings,
            orchestrator,
            feedback: Arc::new(InMemoryFeedback::new()),
        })
    }

    pub fn state(&self, metrics: Option<PrometheusHandle>) -> AppState {
        AppState {
            app_name: self.settings.app_name.clone(),
            orchestrator: Arc::clone(&self.orchestrator),
            feedback: Arc::clone(&self.feedback),
            metrics,
        }
    }
}
