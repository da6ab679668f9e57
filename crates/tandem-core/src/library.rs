//! Solution library: a persistent, fuzzy-matched cache of fixes learned from
//! past failures.
//!
//! Lookups rank by similarity rather than exact key match because error
//! fingerprints recur with small textual variation. Usage counters are
//! per-entry atomics so concurrent sessions never serialize on a store-wide
//! write lock just to record an outcome.

use crate::config::LibraryConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use tandem_common::category::ErrorCategory;
use tandem_common::protocol::Primitive;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("static pattern"));

/// Normalized signature of an error, used as the cache lookup key shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub category: ErrorCategory,
    pub selector_signature: String,
    pub url_signature: String,
}

impl Fingerprint {
    pub fn new(category: ErrorCategory, selector: Option<&str>, url: &str) -> Self {
        Self {
            category,
            selector_signature: normalize_selector(selector.unwrap_or("")),
            url_signature: normalize_url(url),
        }
    }
}

/// Collapse volatile fragments (ids, digit runs) so structurally identical
/// selectors produce the same signature.
fn normalize_selector(selector: &str) -> String {
    DIGIT_RUN
        .replace_all(&selector.to_lowercase(), "#")
        .into_owned()
}

/// Reduce a URL to host + path shape: scheme, query and digit runs dropped.
fn normalize_url(url: &str) -> String {
    let no_scheme = url.split("://").nth(1).unwrap_or(url);
    let no_query = no_scheme.split(['?', '#']).next().unwrap_or(no_scheme);
    DIGIT_RUN
        .replace_all(&no_query.to_lowercase(), "#")
        .trim_end_matches('/')
        .to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn parse(raw: &str) -> Option<RiskLevel> {
        match raw.to_lowercase().as_str() {
            "low" => Some(RiskLevel::Low),
            "medium" => Some(RiskLevel::Medium),
            "high" => Some(RiskLevel::High),
            _ => None,
        }
    }
}

/// A learned fix. Created on first synthesis; usage statistics live in the
/// library entry and are updated atomically on every reuse.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Solution {
    pub id: Uuid,
    pub fingerprint: Fingerprint,
    pub strategy: String,
    pub code: Vec<Primitive>,
    pub confidence: f64,
    pub estimated_success_rate: f64,
    pub risk: RiskLevel,
    pub explanation: String,
    pub created_at: DateTime<Utc>,
}

struct Entry {
    solution: Solution,
    successes: AtomicU32,
    failures: AtomicU32,
    last_used: AtomicI64,
}

impl Entry {
    fn new(solution: Solution) -> Self {
        Self {
            solution,
            successes: AtomicU32::new(0),
            failures: AtomicU32::new(0),
            last_used: AtomicI64::new(Utc::now().timestamp()),
        }
    }

    /// Laplace-smoothed so fresh entries are neither perfect nor hopeless.
    fn success_rate(&self) -> f64 {
        let s = self.successes.load(Ordering::Relaxed) as f64;
        let f = self.failures.load(Ordering::Relaxed) as f64;
        (s + 1.0) / (s + f + 2.0)
    }

    fn recency(&self, now: i64) -> f64 {
        let age_secs = (now - self.last_used.load(Ordering::Relaxed)).max(0) as f64;
        1.0 / (1.0 + age_secs / 86_400.0)
    }
}

/// A lookup hit with its ranking score.
#[derive(Debug, Clone)]
pub struct RankedSolution {
    pub solution: Solution,
    pub score: f64,
    pub successes: u32,
    pub failures: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct LibraryStats {
    pub entries: usize,
    pub total_successes: u64,
    pub total_failures: u64,
}

/// Snapshot of one entry for persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedSolution {
    pub solution: Solution,
    pub successes: u32,
    pub failures: u32,
    pub last_used: i64,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persistence backend contract: insert, bulk load, atomic counter update.
#[async_trait]
pub trait SolutionStore: Send + Sync {
    async fn insert(&self, record: &PersistedSolution) -> Result<(), StoreError>;
    async fn load_all(&self) -> Result<Vec<PersistedSolution>, StoreError>;
    async fn update_counters(&self, id: Uuid, success: bool) -> Result<(), StoreError>;
    async fn remove(&self, id: Uuid) -> Result<(), StoreError>;
}

/// Single-JSON-file backend. Mutations serialize on a file-level mutex; the
/// in-memory library stays lock-free for readers regardless.
pub struct FileSolutionStore {
    path: PathBuf,
    io_lock: tokio::sync::Mutex<()>,
}

impl FileSolutionStore {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            io_lock: tokio::sync::Mutex::new(()),
        }
    }

    async fn read_records(&self) -> Result<Vec<PersistedSolution>, StoreError> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = tokio::fs::read_to_string(&self.path).await?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        Ok(serde_json::from_str(&raw)?)
    }

    async fn write_records(&self, records: &[PersistedSolution]) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_string_pretty(records)?;
        tokio::fs::write(&self.path, raw).await?;
        Ok(())
    }
}

#[async_trait]
impl SolutionStore for FileSolutionStore {
    async fn insert(&self, record: &PersistedSolution) -> Result<(), StoreError> {
        let _guard = self.io_lock.lock().await;
        let mut records = self.read_records().await?;
        records.retain(|r| r.solution.id != record.solution.id);
        records.push(record.clone());
        self.write_records(&records).await
    }

    async fn load_all(&self) -> Result<Vec<PersistedSolution>, StoreError> {
        let _guard = self.io_lock.lock().await;
        self.read_records().await
    }

    async fn update_counters(&self, id: Uuid, success: bool) -> Result<(), StoreError> {
        let _guard = self.io_lock.lock().await;
        let mut records = self.read_records().await?;
        if let Some(record) = records.iter_mut().find(|r| r.solution.id == id) {
            if success {
                record.successes += 1;
            } else {
                record.failures += 1;
            }
            record.last_used = Utc::now().timestamp();
            self.write_records(&records).await?;
        }
        Ok(())
    }

    async fn remove(&self, id: Uuid) -> Result<(), StoreError> {
        let _guard = self.io_lock.lock().await;
        let mut records = self.read_records().await?;
        records.retain(|r| r.solution.id != id);
        self.write_records(&records).await
    }
}

pub struct SolutionLibrary {
    entries: RwLock<HashMap<Uuid, Arc<Entry>>>,
    capacity: usize,
    min_score: f64,
    store: Option<Arc<dyn SolutionStore>>,
}

impl SolutionLibrary {
    pub fn new(config: &LibraryConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: config.capacity,
            min_score: config.min_score,
            store: None,
        }
    }

    pub fn with_store(config: &LibraryConfig, store: Arc<dyn SolutionStore>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            capacity: config.capacity,
            min_score: config.min_score,
            store: Some(store),
        }
    }

    /// Hydrate from the persistence backend, counters included.
    pub async fn load(&self) -> Result<usize, StoreError> {
        let Some(store) = self.store.as_ref() else {
            return Ok(0);
        };
        let records = store.load_all().await?;
        let mut entries = self.entries.write();
        for record in records {
            let entry = Entry {
                successes: AtomicU32::new(record.successes),
                failures: AtomicU32::new(record.failures),
                last_used: AtomicI64::new(record.last_used),
                solution: record.solution,
            };
            entries.insert(entry.solution.id, Arc::new(entry));
        }
        Ok(entries.len())
    }

    /// Similarity-ranked lookup. Exact category match is a hard gate; within
    /// the category, selector shape, url shape, observed success rate and
    /// recency weigh in. Entries below the configured floor are dropped.
    pub fn find(&self, fingerprint: &Fingerprint) -> Vec<RankedSolution> {
        let now = Utc::now().timestamp();
        let entries = self.entries.read();
        let mut ranked: Vec<RankedSolution> = entries
            .values()
            .filter(|e| e.solution.fingerprint.category == fingerprint.category)
            .map(|e| {
                let selector_sim = strsim::normalized_levenshtein(
                    &e.solution.fingerprint.selector_signature,
                    &fingerprint.selector_signature,
                );
                let url_sim = strsim::normalized_levenshtein(
                    &e.solution.fingerprint.url_signature,
                    &fingerprint.url_signature,
                );
                let score = 0.5 * selector_sim
                    + 0.2 * url_sim
                    + 0.2 * e.success_rate()
                    + 0.1 * e.recency(now);
                RankedSolution {
                    solution: e.solution.clone(),
                    score,
                    successes: e.successes.load(Ordering::Relaxed),
                    failures: e.failures.load(Ordering::Relaxed),
                }
            })
            .filter(|r| r.score >= self.min_score)
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked
    }

    pub async fn store(&self, solution: Solution) -> Result<(), StoreError> {
        let record = PersistedSolution {
            successes: 0,
            failures: 0,
            last_used: Utc::now().timestamp(),
            solution: solution.clone(),
        };

        let evicted = {
            let mut entries = self.entries.write();
            entries.insert(solution.id, Arc::new(Entry::new(solution)));
            evict_over_capacity(&mut entries, self.capacity)
        };

        if let Some(store) = self.store.as_ref() {
            store.insert(&record).await?;
            for id in evicted {
                store.remove(id).await?;
            }
        }
        Ok(())
    }

    /// Atomic per-entry increments, never read-modify-write on shared state.
    pub async fn record_outcome(&self, id: Uuid, success: bool) {
        let entry = self.entries.read().get(&id).cloned();
        if let Some(entry) = entry {
            if success {
                entry.successes.fetch_add(1, Ordering::Relaxed);
            } else {
                entry.failures.fetch_add(1, Ordering::Relaxed);
            }
            entry
                .last_used
                .store(Utc::now().timestamp(), Ordering::Relaxed);
        }
        if let Some(store) = self.store.as_ref() {
            if let Err(e) = store.update_counters(id, success).await {
                warn!(%id, error = %e, "failed to persist solution outcome");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn stats(&self) -> LibraryStats {
        let entries = self.entries.read();
        LibraryStats {
            entries: entries.len(),
            total_successes: entries
                .values()
                .map(|e| e.successes.load(Ordering::Relaxed) as u64)
                .sum(),
            total_failures: entries
                .values()
                .map(|e| e.failures.load(Ordering::Relaxed) as u64)
                .sum(),
        }
    }
}

/// Capacity-bounded eviction: drop the entries with the lowest
/// success-rate x recency product until back under capacity.
fn evict_over_capacity(entries: &mut HashMap<Uuid, Arc<Entry>>, capacity: usize) -> Vec<Uuid> {
    if entries.len() <= capacity {
        return Vec::new();
    }
    let now = Utc::now().timestamp();
    let mut scored: Vec<(Uuid, f64)> = entries
        .iter()
        .map(|(id, e)| (*id, e.success_rate() * e.recency(now)))
        .collect();
    scored.sort_by(|a, b| a.1.total_cmp(&b.1));

    let excess = entries.len() - capacity;
    let evicted: Vec<Uuid> = scored.into_iter().take(excess).map(|(id, _)| id).collect();
    for id in &evicted {
        entries.remove(id);
    }
    evicted
}
