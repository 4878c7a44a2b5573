//! Service settings from `config/eigenslur.toml` plus `EIGENSLUR_*` overrides.
//!
//! Resolution order: built-in defaults, then the TOML file (path from
//! `EIGENSLUR_CONFIG_PATH`, default `config/eigenslur.toml`; a missing file is
//! fine), then environment overrides for the scalar knobs.

pub mod labeler;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};

use crate::orchestrator::OrchestratorConfig;
use crate::spectral::SpectralConfig;
use labeler::{LabelerConfig, LabelerMode};

pub const DEFAULT_CONFIG_PATH: &str = "config/eigenslur.toml";
pub const ENV_CONFIG_PATH: &str = "EIGENSLUR_CONFIG_PATH";
pub const ENV_PREFIX: &str = "EIGENSLUR_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    pub capacity: usize,
    /// JSON-lines file; in-memory only when absent.
    pub path: Option<PathBuf>,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            path: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app_name: String,
    pub default_locale: String,
    pub feature_dim: usize,
    pub context_window: usize,
    pub cooccurrence_window: usize,
    pub label_concurrency: usize,
    pub persist_timeout_ms: u64,
    pub weights_path: PathBuf,
    pub history: HistorySettings,
    pub labeler: LabelerConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "eigenslur".to_string(),
            default_locale: "en-US".to_string(),
            feature_dim: 256,
            context_window: 4,
            cooccurrence_window: 6,
            label_concurrency: 4,
            persist_timeout_ms: 2000,
            weights_path: PathBuf::from("config/fusion.toml"),
            history: HistorySettings::default(),
            labeler: LabelerConfig::default(),
        }
    }
}

impl Settings {
    /// Defaults → file → process environment.
    pub fn load() -> anyhow::Result<Self> {
        let path = std::env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut settings = Self::load_file_or_default(&path)?;
        settings.apply_env_overrides(|k| std::env::var(k).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load_file_or_default(path: &Path) -> anyhow::Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(s) => Self::from_toml_str(&s)
                .with_context(|| format!("parse settings from {}", path.display())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e).with_context(|| format!("read settings from {}", path.display())),
        }
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Apply `EIGENSLUR_*` overrides read through `lookup` (injected for tests).
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> anyhow::Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(&format!("{ENV_PREFIX}{name}"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        fn parse<T: std::str::FromStr>(name: &str, v: &str) -> anyhow::Result<T>
        where
            T::Err: std::fmt::Display,
        {
            v.parse::<T>()
                .map_err(|e| anyhow::anyhow!("{ENV_PREFIX}{name}={v:?}: {e}"))
        }

        if let Some(v) = get("DEFAULT_LOCALE") {
            self.default_locale = v;
        }
        if let Some(v) = get("FEATURE_DIM") {
            self.feature_dim = parse("FEATURE_DIM", &v)?;
        }
        if let Some(v) = get("CONTEXT_WINDOW") {
            self.context_window = parse("CONTEXT_WINDOW", &v)?;
        }
        if let Some(v) = get("COOCCURRENCE_WINDOW") {
            self.cooccurrence_window = parse("COOCCURRENCE_WINDOW", &v)?;
        }
        if let Some(v) = get("LABEL_CONCURRENCY") {
            self.label_concurrency = parse("LABEL_CONCURRENCY", &v)?;
        }
        if let Some(v) = get("PERSIST_TIMEOUT_MS") {
            self.persist_timeout_ms = parse("PERSIST_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = get("WEIGHTS_PATH") {
            self.weights_path = PathBuf::from(v);
        }
        if let Some(v) = get("HISTORY_PATH") {
            self.history.path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("HISTORY_CAPACITY") {
            self.history.capacity = parse("HISTORY_CAPACITY", &v)?;
        }
        if let Some(v) = get("LABELER_MODE") {
            self.labeler.mode = match v.to_ascii_lowercase().as_str() {
                "heuristic" => LabelerMode::Heuristic,
                "remote" => LabelerMode::Remote,
                other => anyhow::bail!("{ENV_PREFIX}LABELER_MODE: unknown mode {other:?}"),
            };
        }
        if let Some(v) = get("LABELER_MODEL") {
            self.labeler.model = v;
        }
        if let Some(v) = get("LABELER_BASE_URL") {
            self.labeler.base_url = v;
        }
        if let Some(v) = get("LABELER_DAILY_LIMIT") {
            self.labeler.daily_limit = parse("LABELER_DAILY_LIMIT", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_locale.trim().is_empty() {
            anyhow::bail!("default_locale must not be empty");
        }
        if self.feature_dim == 0 {
            anyhow::bail!("feature_dim must be > 0");
        }
        if self.context_window == 0 {
            anyhow::bail!("context_window must be > 0");
        }
        if self.cooccurrence_window < 2 {
            anyhow::bail!("cooccurrence_window must be >= 2");
        }
        if self.label_concurrency == 0 {
            anyhow::bail!("label_concurrency must be > 0");
        }
        if self.persist_timeout_ms == 0 {
            anyhow::bail!("persist_timeout_ms must be > 0");
        }
        if self.history.capacity == 0 {
            anyhow::bail!("history.capacity must be > 0");
        }
        self.labeler.validate()
    }

    pub fn spectral(&self) -> SpectralConfig {
        SpectralConfig {
            feature_dim: self.feature_dim,
            context_window: self.context_window,
            cooccurrence_window: self.cooccurrence_window,
            ..SpectralConfig::default()
        }
    }

    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            default_locale: self.default_locale.clone(),
            label_concurrency: self.label_concurrency,
            persist_timeout: Duration::from_millis(self.persist_timeout_ms),
            spectral: self.spectral(),
        }
    }
}
