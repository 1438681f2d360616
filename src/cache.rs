//! Similarity-based response cache.
//!
//! Keyed by a semantic fingerprint (an embedding vector): lookups return the
//! stored entry with the highest cosine similarity to the query fingerprint,
//! provided it clears the configured threshold. Capacity is enforced by
//! count-based LRU eviction; staleness by lazy TTL expiry on lookup.
//!
//! This is a best-effort accelerator, not a correctness-critical store: a
//! false miss costs latency, not correctness. Malformed fingerprints
//! (all-zero, NaN, wrong dimension) and poisoned locks are therefore treated
//! as misses — counted separately so a systematically corrupted embedding
//! path shows up in [`CacheStats::corrupt_misses`] instead of failing
//! silently.

use crate::backend::Payload;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Produces fingerprint vectors for request text.
///
/// Real embedding computation lives outside this crate; implementations of
/// this trait adapt whatever embedding source the process owner wires in.
pub trait Fingerprinter: Send + Sync {
    /// Compute the fingerprint for `text`.
    fn fingerprint(&self, text: &str) -> Vec<f64>;
}

/// Deterministic pseudo-embedding: hash each word, project via sin/cos of
/// hash values, normalise to a unit vector.
///
/// Identical texts map to identical fingerprints, so exact resubmissions
/// always clear any similarity threshold.
#[derive(Debug, Clone)]
pub struct HashProjectionFingerprinter {
    dim: usize,
}

impl HashProjectionFingerprinter {
    /// Create a fingerprinter producing vectors of the given dimension.
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

impl Fingerprinter for HashProjectionFingerprinter {
    fn fingerprint(&self, text: &str) -> Vec<f64> {
        if self.dim == 0 {
            return Vec::new();
        }
        let mut acc = vec![0.0f64; self.dim];
        let words: Vec<&str> = text.split_whitespace().collect();
        if words.is_empty() {
            return acc;
        }
        for word in &words {
            let mut h = DefaultHasher::new();
            word.hash(&mut h);
            let hv = h.finish();
            for (i, slot) in acc.iter_mut().enumerate() {
                let angle =
                    (hv.wrapping_add(i as u64) as f64) * std::f64::consts::PI / self.dim as f64;
                *slot += if i % 2 == 0 { angle.sin() } else { angle.cos() };
            }
        }
        let norm: f64 = acc.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm > 1e-9 {
            acc.iter_mut().for_each(|v| *v /= norm);
        }
        acc
    }
}

/// Cosine similarity, clamped to `[-1.0, 1.0]`.
///
/// Fail-soft: mismatched lengths, empty vectors, and zero magnitudes all
/// yield `0.0` rather than an error.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f64 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f64 = a.iter().map(|v| v * v).sum::<f64>().sqrt();
    let mag_b: f64 = b.iter().map(|v| v * v).sum::<f64>().sqrt();
    if mag_a < 1e-9 || mag_b < 1e-9 {
        return 0.0;
    }
    (dot / (mag_a * mag_b)).clamp(-1.0, 1.0)
}

/// A single cached response. Owned exclusively by the cache.
#[derive(Clone)]
struct CacheEntry {
    fingerprint: Vec<f64>,
    payload: Payload,
    confidence: f64,
    inserted_at: Instant,
    last_accessed: Instant,
    /// Monotonic insertion sequence; breaks similarity ties toward the
    /// most recently inserted entry.
    seq: u64,
}

/// Bounded similarity cache for responses.
pub struct ResponseCache {
    entries: RwLock<Vec<CacheEntry>>,
    max_size: usize,
    ttl: Duration,
    similarity_threshold: f64,
    seq: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
    expired: AtomicU64,
    corrupt_misses: AtomicU64,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Entries currently stored.
    pub entries: usize,
    /// Lookups that returned a payload.
    pub hits: u64,
    /// Lookups that found nothing above the threshold.
    pub misses: u64,
    /// Entries removed by TTL expiry.
    pub expired: u64,
    /// Lookups or inserts rejected because of malformed fingerprints or
    /// unusable lock state.
    pub corrupt_misses: u64,
}

impl ResponseCache {
    /// Create a cache.
    ///
    /// # Arguments
    ///
    /// * `max_size` — Entry capacity (count-based LRU beyond this).
    /// * `ttl_secs` — Entry lifetime in seconds; `0` disables TTL expiry.
    /// * `similarity_threshold` — Minimum cosine similarity for a hit.
    pub fn new(max_size: usize, ttl_secs: u64, similarity_threshold: f64) -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            max_size,
            ttl: Duration::from_secs(ttl_secs),
            similarity_threshold,
            seq: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            expired: AtomicU64::new(0),
            corrupt_misses: AtomicU64::new(0),
        }
    }

    /// Look up the best stored match for `fingerprint`.
    ///
    /// Expired entries are dropped before scanning. Returns the payload and
    /// confidence of the most similar live entry at or above the threshold;
    /// ties go to the most recently inserted. A hit refreshes the entry's
    /// LRU position.
    pub fn get(&self, fingerprint: &[f64]) -> Option<(Payload, f64)> {
        if !fingerprint_is_usable(fingerprint) {
            self.corrupt_misses.fetch_add(1, Ordering::Relaxed);
            warn!("cache lookup with malformed fingerprint, treating as miss");
            return None;
        }

        let mut guard = match self.entries.write() {
            Ok(g) => g,
            Err(_) => {
                self.corrupt_misses.fetch_add(1, Ordering::Relaxed);
                warn!("cache lock poisoned, treating as miss");
                return None;
            }
        };

        self.drop_expired(&mut guard);

        let mut best: Option<(usize, f64, u64)> = None;
        for (idx, entry) in guard.iter().enumerate() {
            if entry.fingerprint.len() != fingerprint.len() {
                continue;
            }
            let sim = cosine_similarity(fingerprint, &entry.fingerprint);
            let better = match best {
                None => true,
                Some((_, best_sim, best_seq)) => {
                    sim > best_sim || (sim == best_sim && entry.seq > best_seq)
                }
            };
            if better {
                best = Some((idx, sim, entry.seq));
            }
        }

        match best {
            Some((idx, sim, _)) if sim >= self.similarity_threshold => {
                guard[idx].last_accessed = Instant::now();
                let payload = guard[idx].payload.clone();
                let confidence = guard[idx].confidence;
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(similarity = sim, "cache hit");
                Some((payload, confidence))
            }
            _ => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                debug!("cache miss");
                None
            }
        }
    }

    /// Store a response under `fingerprint`.
    ///
    /// An identical fingerprint updates the existing entry in place. At
    /// capacity, the least-recently-used entry is evicted first. Malformed
    /// fingerprints are dropped silently — cache corruption never blocks
    /// request processing.
    pub fn put(&self, fingerprint: Vec<f64>, payload: Payload, confidence: f64) {
        if !fingerprint_is_usable(&fingerprint) {
            self.corrupt_misses.fetch_add(1, Ordering::Relaxed);
            warn!("refusing to cache malformed fingerprint");
            return;
        }

        let mut guard = match self.entries.write() {
            Ok(g) => g,
            Err(_) => {
                self.corrupt_misses.fetch_add(1, Ordering::Relaxed);
                warn!("cache lock poisoned, dropping insert");
                return;
            }
        };

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();

        if let Some(entry) = guard.iter_mut().find(|e| e.fingerprint == fingerprint) {
            entry.payload = payload;
            entry.confidence = confidence;
            entry.inserted_at = now;
            entry.last_accessed = now;
            entry.seq = seq;
            debug!("cache entry updated in place");
            return;
        }

        if self.max_size > 0 && guard.len() >= self.max_size {
            if let Some(lru_idx) = guard
                .iter()
                .enumerate()
                .min_by_key(|(_, e)| e.last_accessed)
                .map(|(i, _)| i)
            {
                guard.swap_remove(lru_idx);
                debug!("cache full, evicted least-recently-used entry");
            }
        }

        guard.push(CacheEntry {
            fingerprint,
            payload,
            confidence,
            inserted_at: now,
            last_accessed: now,
            seq,
        });
        debug!(entries = guard.len(), "response cached");
    }

    /// Remove expired entries now instead of waiting for the next lookup.
    ///
    /// Registered as a reclaim hook with the resource monitor.
    pub fn purge_expired(&self) {
        if let Ok(mut guard) = self.entries.write() {
            self.drop_expired(&mut guard);
        }
    }

    /// Remove everything.
    pub fn clear(&self) {
        if let Ok(mut guard) = self.entries.write() {
            guard.clear();
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.read().map(|g| g.len()).unwrap_or(0)
    }

    /// `true` when no entries are stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fraction of lookups that hit, in `[0.0, 1.0]`.
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits.load(Ordering::Relaxed);
        let total = hits + self.misses.load(Ordering::Relaxed);
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            expired: self.expired.load(Ordering::Relaxed),
            corrupt_misses: self.corrupt_misses.load(Ordering::Relaxed),
        }
    }

    fn drop_expired(&self, entries: &mut Vec<CacheEntry>) {
        if self.ttl.is_zero() {
            return;
        }
        let before = entries.len();
        entries.retain(|e| e.inserted_at.elapsed() <= self.ttl);
        let removed = before - entries.len();
        if removed > 0 {
            self.expired.fetch_add(removed as u64, Ordering::Relaxed);
            debug!(removed = removed, "expired cache entries dropped");
        }
    }
}

/// A fingerprint is usable when it is non-empty, finite, and not all zeros.
fn fingerprint_is_usable(fingerprint: &[f64]) -> bool {
    !fingerprint.is_empty()
        && fingerprint.iter().all(|v| v.is_finite())
        && fingerprint.iter().any(|v| *v != 0.0)
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

    use super::*;

    fn payload(text: &str) -> Payload {
        Payload {
            text: text.to_string(),
            confidence: 0.9,
        }
    }

    fn fp(text: &str) -> Vec<f64> {
        HashProjectionFingerprinter::new(64).fingerprint(text)
    }

    // -- fingerprinter -----------------------------------------------------

    #[test]
    fn test_fingerprint_deterministic() {
        assert_eq!(fp("hello world"), fp("hello world"));
    }

    #[test]
    fn test_fingerprint_dimension_matches_requested() {
        for dim in [1, 16, 64, 256] {
            assert_eq!(
                HashProjectionFingerprinter::new(dim).fingerprint("text").len(),
                dim
            );
        }
    }

    #[test]
    fn test_fingerprint_is_unit_vector() {
        let v = fp("normalise me please");
        let magnitude: f64 = v.iter().map(|x| x * x).sum::<f64>().sqrt();
        assert!((magnitude - 1.0).abs() < 1e-6, "magnitude was {magnitude}");
    }

    #[test]
    fn test_fingerprint_empty_text_is_zero_vector() {
        let v = fp("");
        assert!(v.iter().all(|x| x.abs() < f64::EPSILON));
    }

    // -- cosine ------------------------------------------------------------

    #[test]
    fn test_cosine_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_orthogonal_vectors_is_zero() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_mismatched_lengths_is_zero() {
        assert!(cosine_similarity(&[1.0, 2.0, 3.0], &[1.0, 2.0]).abs() < f64::EPSILON);
    }

    #[test]
    fn test_cosine_zero_magnitude_is_zero() {
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]).abs() < f64::EPSILON);
    }

    // -- round trip --------------------------------------------------------

    #[test]
    fn test_round_trip_same_fingerprint() {
        let cache = ResponseCache::new(10, 3600, 0.97);
        cache.put(fp("what is ai"), payload("answer"), 0.85);
        let (got, confidence) = cache.get(&fp("what is ai")).unwrap();
        assert_eq!(got.text, "answer");
        assert!((confidence - 0.85).abs() < f64::EPSILON);
    }

    #[test]
    fn test_dissimilar_fingerprint_misses() {
        let cache = ResponseCache::new(10, 3600, 0.97);
        cache.put(fp("what is ai"), payload("answer"), 0.85);
        assert!(cache
            .get(&fp("entirely unrelated gibberish xyzzy"))
            .is_none());
    }

    #[test]
    fn test_threshold_zero_returns_best_match() {
        let cache = ResponseCache::new(10, 3600, 0.0);
        cache.put(fp("alpha beta"), payload("first"), 0.5);
        cache.put(fp("gamma delta"), payload("second"), 0.6);
        let (got, _) = cache.get(&fp("alpha beta")).unwrap();
        assert_eq!(got.text, "first");
    }

    #[test]
    fn test_tie_breaks_toward_most_recent_insert() {
        let cache = ResponseCache::new(10, 3600, 0.97);
        // Identical fingerprints from different put calls: the in-place
        // update keeps one entry carrying the newest payload.
        cache.put(fp("same text"), payload("old"), 0.5);
        cache.put(fp("same text"), payload("new"), 0.6);
        assert_eq!(cache.len(), 1);
        let (got, confidence) = cache.get(&fp("same text")).unwrap();
        assert_eq!(got.text, "new");
        assert!((confidence - 0.6).abs() < f64::EPSILON);
    }

    // -- eviction ----------------------------------------------------------

    #[test]
    fn test_lru_eviction_at_capacity() {
        let cache = ResponseCache::new(3, 3600, 0.97);
        cache.put(fp("one"), payload("1"), 0.9);
        cache.put(fp("two"), payload("2"), 0.9);
        cache.put(fp("three"), payload("3"), 0.9);

        // Touch "one" and "two" so "three" becomes least-recently-used.
        assert!(cache.get(&fp("one")).is_some());
        assert!(cache.get(&fp("two")).is_some());

        cache.put(fp("four"), payload("4"), 0.9);

        assert_eq!(cache.len(), 3, "capacity must hold after eviction");
        assert!(cache.get(&fp("three")).is_none(), "LRU entry must be gone");
        assert!(cache.get(&fp("four")).is_some());
        assert!(cache.get(&fp("one")).is_some());
    }

    #[test]
    fn test_insert_beyond_capacity_leaves_exactly_max_entries() {
        let cache = ResponseCache::new(5, 3600, 0.97);
        for i in 0..6 {
            cache.put(fp(&format!("entry number {i}")), payload("x"), 0.9);
        }
        assert_eq!(cache.len(), 5);
    }

    // -- expiry ------------------------------------------------------------

    #[tokio::test]
    async fn test_ttl_expiry_on_lookup() {
        let cache = ResponseCache::new(10, 1, 0.97);
        cache.put(fp("ephemeral"), payload("x"), 0.9);
        assert!(cache.get(&fp("ephemeral")).is_some());

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(cache.get(&fp("ephemeral")).is_none());
        assert_eq!(cache.stats().expired, 1);
    }

    #[test]
    fn test_zero_ttl_disables_expiry() {
        let cache = ResponseCache::new(10, 0, 0.97);
        cache.put(fp("durable"), payload("x"), 0.9);
        cache.purge_expired();
        assert!(cache.get(&fp("durable")).is_some());
    }

    #[test]
    fn test_purge_expired_is_noop_on_fresh_entries() {
        let cache = ResponseCache::new(10, 3600, 0.97);
        cache.put(fp("fresh"), payload("x"), 0.9);
        cache.purge_expired();
        assert_eq!(cache.len(), 1);
    }

    // -- corruption fail-soft ----------------------------------------------

    #[test]
    fn test_all_zero_fingerprint_is_a_miss() {
        let cache = ResponseCache::new(10, 3600, 0.97);
        cache.put(fp("stored"), payload("x"), 0.9);
        assert!(cache.get(&vec![0.0; 64]).is_none());
        assert_eq!(cache.stats().corrupt_misses, 1);
    }

    #[test]
    fn test_nan_fingerprint_is_a_miss() {
        let cache = ResponseCache::new(10, 3600, 0.97);
        cache.put(fp("stored"), payload("x"), 0.9);
        let mut bad = fp("stored");
        bad[0] = f64::NAN;
        assert!(cache.get(&bad).is_none());
    }

    #[test]
    fn test_dimension_mismatch_is_a_miss() {
        let cache = ResponseCache::new(10, 3600, 0.97);
        cache.put(fp("stored"), payload("x"), 0.9);
        let short = HashProjectionFingerprinter::new(32).fingerprint("stored");
        assert!(cache.get(&short).is_none());
    }

    #[test]
    fn test_malformed_fingerprint_is_never_stored() {
        let cache = ResponseCache::new(10, 3600, 0.97);
        cache.put(vec![f64::NAN; 64], payload("x"), 0.9);
        cache.put(vec![0.0; 64], payload("y"), 0.9);
        assert!(cache.is_empty());
        assert_eq!(cache.stats().corrupt_misses, 2);
    }

    // -- counters ----------------------------------------------------------

    #[test]
    fn test_hit_rate_over_mixed_lookups() {
        let cache = ResponseCache::new(10, 3600, 0.97);
        cache.put(fp("known"), payload("x"), 0.9);
        assert!(cache.get(&fp("known")).is_some());
        assert!(cache.get(&fp("unknown gibberish")).is_none());
        let rate = cache.hit_rate();
        assert!((rate - 0.5).abs() < f64::EPSILON, "rate was {rate}");
    }

    #[test]
    fn test_initial_hit_rate_is_zero() {
        let cache = ResponseCache::new(10, 3600, 0.97);
        assert!(cache.hit_rate().abs() < f64::EPSILON);
    }

    #[test]
    fn test_clear_removes_all_entries() {
        let cache = ResponseCache::new(10, 3600, 0.97);
        for i in 0..5 {
            cache.put(fp(&format!("k{i}")), payload("v"), 0.9);
        }
        cache.clear();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_access_stays_within_capacity() {
        use std::sync::Arc;

        let cache = Arc::new(ResponseCache::new(100, 3600, 0.97));
        let mut handles = Vec::new();
        for t in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move {
                for i in 0..50 {
                    let key = format!("task {t} item {i}");
                    cache.put(fp(&key), payload(&key), 0.9);
                    let _ = cache.get(&fp(&key));
                }
            }));
        }
        for h in handles {
            h.await.unwrap_or(());
        }
        assert!(cache.len() <= 100);
    }
}
