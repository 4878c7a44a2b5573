// src/config/labeler.rs
use serde::{Deserialize, Serialize};
use std::{env, path::PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LabelerMode {
    #[default]
    Heuristic,
    Remote,
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_timeout_secs() -> u64 {
    20
}
fn default_daily_limit() -> u32 {
    500
}
fn default_memory_cache_capacity() -> usize {
    crate::labels::cache::MEMORY_CAPACITY
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelerConfig {
    #[serde(default)]
    pub mode: LabelerMode,
    /// Only "openai" (any OpenAI-compatible chat-completions endpoint) for now.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    /// "ENV" means: read from OPENAI_API_KEY
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Real backend calls per UTC day; cache hits are free.
    #[serde(default = "default_daily_limit")]
    pub daily_limit: u32,
    /// Optional on-disk cache of labels; in-memory only when absent.
    #[serde(default)]
    pub cache_dir: Option<PathBuf>,
    /// Labels kept in memory in front of `cache_dir`; oldest evicted first.
    #[serde(default = "default_memory_cache_capacity")]
    pub memory_cache_capacity: usize,
}

impl Default for LabelerConfig {
    fn default() -> Self {
        Self {
            mode: LabelerMode::default(),
            provider: default_provider(),
            model: default_model(),
            api_key: None,
            base_url: default_base_url(),
            timeout_secs: default_timeout_secs(),
            daily_limit: default_daily_limit(),
            cache_dir: None,
            memory_cache_capacity: default_memory_cache_capacity(),
        }
    }
}

impl LabelerConfig {
    /// The key to send, if any. "ENV" reads `OPENAI_API_KEY`; blank means none.
    pub fn resolve_api_key(&self) -> Option<String> {
        let raw = self.api_key.as_deref()?.trim();
        if raw.eq_ignore_ascii_case("env") {
            return env::var("OPENAI_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty());
        }
        if raw.is_empty() {
            None
        } else {
            Some(raw.to_string())
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let provider = self.provider.to_lowercase();
        if provider != "openai" {
            anyhow::bail!("Unsupported labeler provider in config: {provider}");
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("labeler.timeout_secs must be > 0");
        }
        if self.memory_cache_capacity == 0 {
            anyhow::bail!("labeler.memory_cache_capacity must be > 0");
        }
        Ok(())
    }
}
