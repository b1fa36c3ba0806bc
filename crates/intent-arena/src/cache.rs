//! Caching layer for arbitration
//!
//! Provides concurrent caching for:
//! - Pairwise judgments (so repeated ambiguous utterances do not re-spend
//!   LLM budget)
//! - Utterance embeddings (so the semantic layer does not re-embed the same
//!   standardized text)
//!
//! Uses the moka crate for thread-safe, async-compatible caching with TTL
//! support.
//!
//! Author: hephaex@gmail.com

use intent_core::CacheConfig;
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Judgment Cache
// ============================================================================

/// Cache for reconciled pairwise judgments
///
/// Keyed by the unordered pair of intent codes plus a hash of the
/// utterance, so (A, B) and (B, A) share one entry.
#[derive(Clone)]
pub struct JudgmentCache {
    cache: Cache<JudgmentKey, CachedJudgment>,
    stats: Arc<CacheStats>,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct JudgmentKey {
    utterance_hash: u64,
    low: String,
    high: String,
}

impl JudgmentKey {
    fn new(utterance: &str, a: &str, b: &str) -> Self {
        let (low, high) = if a <= b { (a, b) } else { (b, a) };
        Self {
            utterance_hash: hash_text(utterance),
            low: low.to_string(),
            high: high.to_string(),
        }
    }
}

/// Stored outcome of one comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedJudgment {
    /// Intent code of the winner
    pub winner: String,
    pub confidence: f32,
}

impl JudgmentCache {
    /// Create a new judgment cache with default configuration
    pub fn new() -> Self {
        Self::with_config(&CacheConfig::default())
    }

    /// Create a new judgment cache with custom configuration
    pub fn with_config(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.judgment_max_capacity)
            .time_to_live(Duration::from_secs(config.judgment_ttl_seconds))
            .build();

        Self {
            cache,
            stats: Arc::new(CacheStats::new("judgment")),
        }
    }

    /// Look up the judgment for a pair, in either order
    pub async fn get(&self, utterance: &str, a: &str, b: &str) -> Option<CachedJudgment> {
        let key = JudgmentKey::new(utterance, a, b);
        let result = self.cache.get(&key).await;

        if result.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }

        result
    }

    /// Store the judgment for a pair
    pub async fn put(&self, utterance: &str, a: &str, b: &str, judgment: CachedJudgment) {
        let key = JudgmentKey::new(utterance, a, b);
        self.cache.insert(key, judgment).await;
        self.stats.record_write();
    }

    pub async fn contains(&self, utterance: &str, a: &str, b: &str) -> bool {
        self.cache
            .contains_key(&JudgmentKey::new(utterance, a, b))
    }

    /// Invalidate the judgment for a pair
    pub async fn invalidate(&self, utterance: &str, a: &str, b: &str) {
        let key = JudgmentKey::new(utterance, a, b);
        self.cache.invalidate(&key).await;
        self.stats.record_invalidation();
    }

    /// Clear all cached judgments
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        // Wait for all pending invalidations to complete
        self.cache.run_pending_tasks().await;
        self.stats.reset();
    }

    /// Get cache statistics
    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Get current cache size
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for JudgmentCache {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Embedding Cache
// ============================================================================

/// Cache for utterance embeddings
#[derive(Clone)]
pub struct EmbeddingCache {
    cache: Cache<u64, Vec<f32>>,
    stats: Arc<CacheStats>,
}

impl EmbeddingCache {
    /// Create a new embedding cache with default configuration
    pub fn new() -> Self {
        Self::with_config(&CacheConfig::default())
    }

    /// Create a new embedding cache with custom configuration
    pub fn with_config(config: &CacheConfig) -> Self {
        let cache = Cache::builder()
            .max_capacity(config.embedding_max_capacity)
            .time_to_live(Duration::from_secs(config.embedding_ttl_seconds))
            .build();

        Self {
            cache,
            stats: Arc::new(CacheStats::new("embedding")),
        }
    }

    /// Get an embedding from cache
    pub async fn get(&self, text: &str) -> Option<Vec<f32>> {
        let key = hash_text(text);
        let result = self.cache.get(&key).await;

        if result.is_some() {
            self.stats.record_hit();
        } else {
            self.stats.record_miss();
        }

        result
    }

    /// Store an embedding in cache
    pub async fn put(&self, text: &str, embedding: Vec<f32>) {
        let key = hash_text(text);
        self.cache.insert(key, embedding).await;
        self.stats.record_write();
    }

    pub async fn invalidate(&self, text: &str) {
        self.cache.invalidate(&hash_text(text)).await;
        self.stats.record_invalidation();
    }

    /// Clear all cached embeddings
    pub async fn clear(&self) {
        self.cache.invalidate_all();
        self.cache.run_pending_tasks().await;
        self.stats.reset();
    }

    /// Get cache statistics
    pub fn stats(&self) -> Arc<CacheStats> {
        Arc::clone(&self.stats)
    }

    /// Get current cache size
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Cache Statistics
// ============================================================================

/// Cache statistics tracker
///
/// Thread-safe counters for hits, misses, writes and invalidations.
#[derive(Debug)]
pub struct CacheStats {
    name: String,
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheStats {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            writes: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset all counters
    pub fn reset(&self) {
        self.hits.store(0, Ordering::Relaxed);
        self.misses.store(0, Ordering::Relaxed);
        self.writes.store(0, Ordering::Relaxed);
        self.invalidations.store(0, Ordering::Relaxed);
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Hits plus misses
    pub fn total_requests(&self) -> u64 {
        self.hits() + self.misses()
    }

    /// Hit rate (0.0 - 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.total_requests();
        if total == 0 {
            0.0
        } else {
            self.hits() as f64 / total as f64
        }
    }

    /// Snapshot as a serializable report
    pub fn report(&self) -> CacheStatsReport {
        CacheStatsReport {
            name: self.name.clone(),
            hits: self.hits(),
            misses: self.misses(),
            writes: self.writes(),
            invalidations: self.invalidations(),
            total_requests: self.total_requests(),
            hit_rate: self.hit_rate(),
        }
    }
}

/// Serializable cache statistics report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStatsReport {
    pub name: String,
    pub hits: u64,
    pub misses: u64,
    pub writes: u64,
    pub invalidations: u64,
    pub total_requests: u64,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
}

// ============================================================================
// Cache Manager
// ============================================================================

/// Both resolver caches, built from one [`CacheConfig`]
#[derive(Clone, Default)]
pub struct ResolverCaches {
    pub judgment: JudgmentCache,
    pub embedding: EmbeddingCache,
}

impl ResolverCaches {
    pub fn with_config(config: &CacheConfig) -> Self {
        Self {
            judgment: JudgmentCache::with_config(config),
            embedding: EmbeddingCache::with_config(config),
        }
    }

    /// Clear all caches
    pub async fn clear_all(&self) {
        self.judgment.clear().await;
        self.embedding.clear().await;
    }

    /// Statistics for all caches
    pub fn all_stats(&self) -> Vec<CacheStatsReport> {
        vec![
            self.judgment.stats().report(),
            self.embedding.stats().report(),
        ]
    }

    /// Reset counters without dropping entries
    pub fn reset_stats(&self) {
        self.judgment.stats().reset();
        self.embedding.stats().reset();
    }
}

// ============================================================================
// Utility Functions
// ============================================================================

/// Hash text to a 64-bit value for cache keys
///
/// Not cryptographically secure, but suitable for cache keys.
pub(crate) fn hash_text(text: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    text.hash(&mut hasher);
    hasher.finish()
}

// ============================================================================
// Tests
// ============================================================================
