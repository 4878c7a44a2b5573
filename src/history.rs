//! Persisted score results, newest first per (term, locale).
//!
//! Two backends behind [`HistoryStore`]: a bounded in-memory ring and a JSON-lines
//! file that keeps the same ring as its read index.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

use crate::error::HistoryError;
use crate::types::ScoreResult;

/// Hard upper bound on the in-memory capacity.
pub const MAX_CAPACITY: usize = 100_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreHistoryEntry {
    pub id: u64,
    pub created_at: DateTime<Utc>,
    pub result: ScoreResult,
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Persist one result; returns its id.
    async fn append(&self, result: &ScoreResult) -> Result<u64, HistoryError>;

    /// Newest first. `locale = None` matches every locale.
    async fn query(
        &self,
        term: &str,
        locale: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ScoreHistoryEntry>, HistoryError>;

    /// Newest first, any term.
    async fn recent(&self, limit: usize) -> Result<Vec<ScoreHistoryEntry>, HistoryError>;

    fn backend(&self) -> &'static str;
}

#[derive(Debug)]
struct Ring {
    next_id: u64,
    entries: Vec<ScoreHistoryEntry>,
}

impl Ring {
    /// Append, then drop the oldest entries beyond `cap`.
    fn push_bounded(&mut self, entry: ScoreHistoryEntry, cap: usize) {
        self.entries.push(entry);
        if self.entries.len() > cap {
            let excess = self.entries.len() - cap;
            self.entries.drain(0..excess);
        }
    }
}

#[derive(Debug)]
pub struct InMemoryHistory {
    inner: Mutex<Ring>,
    cap: usize,
}

impl InMemoryHistory {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, MAX_CAPACITY);
        Self {
            inner: Mutex::new(Ring {
                next_id: 1,
                entries: Vec::with_capacity(cap.min(1024)),
            }),
            cap,
        }
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Ring> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn push_entry(&self, entry: ScoreHistoryEntry) {
        let mut ring = self.lock();
        ring.next_id = ring.next_id.max(entry.id + 1);
        ring.push_bounded(entry, self.cap);
    }

    fn insert(&self, result: &ScoreResult) -> ScoreHistoryEntry {
        let mut ring = self.lock();
        let entry = ScoreHistoryEntry {
            id: ring.next_id,
            created_at: Utc::now(),
            result: result.clone(),
        };
        ring.next_id += 1;
        ring.push_bounded(entry.clone(), self.cap);
        entry
    }

    fn select(&self, term: &str, locale: Option<&str>, limit: usize) -> Vec<ScoreHistoryEntry> {
        let ring = self.lock();
        ring.entries
            .iter()
            .rev()
            .filter(|e| e.result.term == term && locale.map_or(true, |l| e.result.locale == l))
            .take(limit)
            .cloned()
            .collect()
    }

    fn newest(&self, limit: usize) -> Vec<ScoreHistoryEntry> {
        let ring = self.lock();
        ring.entries.iter().rev().take(limit).cloned().collect()
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistory {
    async fn append(&self, result: &ScoreResult) -> Result<u64, HistoryError> {
        Ok(self.insert(result).id)
    }

    async fn query(
        &self,
        term: &str,
        locale: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ScoreHistoryEntry>, HistoryError> {
        Ok(self.select(term, locale, limit))
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ScoreHistoryEntry>, HistoryError> {
        Ok(self.newest(limit))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Append-only JSON-lines file; one [`ScoreHistoryEntry`] per line.
#[derive(Debug)]
pub struct JsonlHistory {
    path: PathBuf,
    index: InMemoryHistory,
    write_lock: tokio::sync::Mutex<()>,
}

impl JsonlHistory {
    /// Open (or create on first append) the file at `path`, loading up to
    /// `capacity` most recent entries. Unparseable lines are skipped.
    pub async fn open(path: impl Into<PathBuf>, capacity: usize) -> Result<Self, HistoryError> {
        let path = path.into();
        let index = InMemoryHistory::with_capacity(capacity);
        match tokio::fs::read_to_string(&path).await {
            Ok(body) => {
                let mut skipped = 0usize;
                for line in body.lines().filter(|l| !l.trim().is_empty()) {
                    match serde_json::from_str::<ScoreHistoryEntry>(line) {
                        Ok(entry) => index.push_entry(entry),
                        Err(_) => skipped += 1,
                    }
                }
                if skipped > 0 {
                    warn!(path = %path.display(), skipped, "history: unparseable lines skipped");
                }
                info!(path = %path.display(), loaded = index.len(), "history file loaded");
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(HistoryError::Io(e)),
        }
        Ok(Self {
            path,
            index,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl HistoryStore for JsonlHistory {
    async fn append(&self, result: &ScoreResult) -> Result<u64, HistoryError> {
        let _guard = self.write_lock.lock().await;
        let entry = {
            let ring = self.index.lock();
            ScoreHistoryEntry {
                id: ring.next_id,
                created_at: Utc::now(),
                result: result.clone(),
            }
        };
        let mut line = serde_json::to_string(&entry)?;
        line.push('\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        let id = entry.id;
        self.index.push_entry(entry);
        Ok(id)
    }

    async fn query(
        &self,
        term: &str,
        locale: Option<&str>,
        limit: usize,
    ) -> Result<Vec<ScoreHistoryEntry>, HistoryError> {
        Ok(self.index.select(term, locale, limit))
    }

    async fn recent(&self, limit: usize) -> Result<Vec<ScoreHistoryEntry>, HistoryError> {
        Ok(self.index.newest(limit))
    }

    fn backend(&self) -> &'static str {
        "jsonl"
    }
}
