//! Caching wrapper: content-addressed label cache + daily call limit.
//!
//! Labels are kept in a bounded in-memory map (oldest entry evicted first) in
//! front of the optional on-disk cache. Cache hits never count against the limit. Only successful backend calls are
//! cached and counted. The on-disk cache is optional and best-effort: a failed
//! write is logged and the label is still returned.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use super::{ContextLabel, ContextLabeler};
use crate::error::LabelError;
use crate::text::Context;

/// Default number of labels held in memory.
pub const MEMORY_CAPACITY: usize = 4096;

pub struct CachingLabeler<L: ContextLabeler> {
    inner: L,
    cache_dir: Option<PathBuf>,
    daily_limit_max: u32,
    memory: Mutex<MemoryCache>,
    counter: Mutex<DailyCounter>,
}

/// Insertion-ordered map; inserting past `capacity` drops the oldest key.
#[derive(Debug)]
struct MemoryCache {
    capacity: usize,
    entries: HashMap<String, ContextLabel>,
    order: VecDeque<String>,
}

impl MemoryCache {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get(&self, key: &str) -> Option<ContextLabel> {
        self.entries.get(key).cloned()
    }

    fn insert(&mut self, key: &str, label: ContextLabel) {
        if self.entries.insert(key.to_string(), label).is_some() {
            return;
        }
        self.order.push_back(key.to_string());
        while self.order.len() > self.capacity {
            if let Some(old) = self.order.pop_front() {
                self.entries.remove(&old);
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DailyCounter {
    date: NaiveDate,
    count: u32,
}

impl Default for DailyCounter {
    fn default() -> Self {
        Self {
            date: Utc::now().date_naive(),
            count: 0,
        }
    }
}

impl DailyCounter {
    fn roll(&mut self, today: NaiveDate) {
        if self.date != today {
            self.date = today;
            self.count = 0;
        }
    }
}

impl<L: ContextLabeler> CachingLabeler<L> {
    pub fn new(inner: L, cache_dir: Option<PathBuf>, daily_limit_max: u32) -> Self {
        let counter = cache_dir
            .as_deref()
            .and_then(load_daily_counter)
            .unwrap_or_default();
        Self {
            inner,
            cache_dir,
            daily_limit_max,
            memory: Mutex::new(MemoryCache::new(MEMORY_CAPACITY)),
            counter: Mutex::new(counter),
        }
    }

    /// Override how many labels stay in memory (at least 1).
    pub fn with_memory_capacity(mut self, capacity: usize) -> Self {
        self.memory = Mutex::new(MemoryCache::new(capacity));
        self
    }

    fn memory_lock(&self) -> std::sync::MutexGuard<'_, MemoryCache> {
        self.memory.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Backend calls made today.
    pub fn calls_today(&self) -> u32 {
        let mut g = self.counter.lock().unwrap_or_else(|p| p.into_inner());
        g.roll(Utc::now().date_naive());
        g.count
    }

    fn cache_key(&self, term: &str, context: &Context, locale: &str) -> String {
        let mut h = Sha256::new();
        for part in [self.inner.name(), term, locale, context.raw.as_str()] {
            h.update(part.as_bytes());
            h.update([0u8]);
        }
        h.finalize().iter().map(|b| format!("{b:02x}")).collect()
    }

    async fn lookup(&self, key: &str) -> Option<ContextLabel> {
        let cached = self.memory_lock().get(key);
        if cached.is_some() {
            return cached;
        }
        let dir = self.cache_dir.as_ref()?;
        let bytes = tokio::fs::read(cache_path(dir, key)).await.ok()?;
        let label: ContextLabel = serde_json::from_slice(&bytes).ok()?;
        self.memory_lock().insert(key, label.clone());
        Some(label)
    }

    async fn store(&self, key: &str, label: &ContextLabel) {
        self.memory_lock().insert(key, label.clone());
        if let Some(dir) = &self.cache_dir {
            if let Err(e) = write_cache_file(dir, key, label).await {
                warn!(error = %e, "label cache write failed");
            }
        }
    }

    /// Reserve one backend call; `false` when today's budget is spent.
    fn try_reserve(&self) -> bool {
        let mut g = self.counter.lock().unwrap_or_else(|p| p.into_inner());
        g.roll(Utc::now().date_naive());
        if g.count >= self.daily_limit_max {
            return false;
        }
        g.count = g.count.saturating_add(1);
        true
    }

    fn release(&self) {
        let mut g = self.counter.lock().unwrap_or_else(|p| p.into_inner());
        g.count = g.count.saturating_sub(1);
    }

    async fn persist_counter(&self) {
        let Some(dir) = &self.cache_dir else {
            return;
        };
        let snapshot = self
            .counter
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone();
        if let Err(e) = save_daily_counter(dir, &snapshot).await {
            warn!(error = %e, "daily counter write failed");
        }
    }
}

#[async_trait]
impl<L: ContextLabeler> ContextLabeler for CachingLabeler<L> {
    async fn label(
        &self,
        term: &str,
        context: &Context,
        locale: &str,
    ) -> Result<ContextLabel, LabelError> {
        let key = self.cache_key(term, context, locale);
        if let Some(hit) = self.lookup(&key).await {
            debug!(labeler = self.inner.name(), "label cache hit");
            return Ok(hit);
        }

        if !self.try_reserve() {
            return Err(LabelError::Unavailable(format!(
                "daily limit of {} calls reached",
                self.daily_limit_max
            )));
        }

        match self.inner.label(term, context, locale).await {
            Ok(fresh) => {
                self.store(&key, &fresh).await;
                self.persist_counter().await;
                Ok(fresh)
            }
            Err(e) => {
                self.release();
                Err(e)
            }
        }
    }

    fn name(&self) -> &'static str {
        self.inner.name()
    }
}

// ------------------------------------------------------------
// File helpers
// ------------------------------------------------------------

fn cache_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

async fn write_cache_file(dir: &Path, key: &str, value: &ContextLabel) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let path = cache_path(dir, key);
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_vec(value)?;
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(tmp, path).await
}

fn counter_path(dir: &Path) -> PathBuf {
    dir.join("daily_count.json")
}

fn load_daily_counter(dir: &Path) -> Option<DailyCounter> {
    let s = std::fs::read_to_string(counter_path(dir)).ok()?;
    serde_json::from_str(&s).ok()
}

async fn save_daily_counter(dir: &Path, dc: &DailyCounter) -> std::io::Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let p = counter_path(dir);
    let tmp = p.with_extension("json.tmp");
    tokio::fs::write(&tmp, serde_json::to_vec(dc)?).await?;
    tokio::fs::rename(tmp, p).await
}
