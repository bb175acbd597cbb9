//! Semantic cache for inference responses.

use dashmap::DashMap;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

use switchyard_core::{
    config::CacheConfig,
    cosine_similarity,
    types::{Capability, InferenceRequest, InferenceResponse, ResponseStatus},
    EmbeddingGenerator,
};
use switchyard_governance::track_cache_lookup;

/// Cache entry with expiration and embedding.
#[derive(Debug, Clone)]
struct CacheEntry {
    /// Cached response.
    response: InferenceResponse,
    /// Embedding vector of the normalized prompt.
    embedding: Option<Vec<f32>>,
    /// Capabilities the producing request required.
    capabilities: BTreeSet<Capability>,
    created_at: Instant,
    ttl: Duration,
    /// Logical clock of the last access, for LRU eviction.
    last_access: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }

    fn serves(&self, request: &InferenceRequest) -> bool {
        request
            .requirements
            .capabilities
            .iter()
            .all(|c| self.capabilities.contains(c))
    }
}

/// How a cached response was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheMatch {
    Exact,
    Semantic,
}

/// Result of [`SemanticCache::lookup`].
#[derive(Debug, Default)]
pub struct CacheLookup {
    /// Cached response, already marked `cached`.
    pub hit: Option<(InferenceResponse, CacheMatch)>,
    /// Embedding computed during the lookup, reusable by `put_with_embedding`.
    pub embedding: Option<Vec<f32>>,
}

/// Cache statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub exact_hits: u64,
    pub semantic_hits: u64,
    pub misses: u64,
}

/// In-memory response cache.
///
/// Looks up the SHA-256 of the normalized prompt first and falls back to
/// cosine similarity over prompt embeddings. Embedding failures and
/// timeouts only disable the semantic path.
pub struct SemanticCache {
    entries: DashMap<String, CacheEntry>,
    embedder: Option<Arc<dyn EmbeddingGenerator>>,
    threshold: f32,
    ttl: Duration,
    capacity: usize,
    embedding_timeout: Duration,
    max_cacheable_temperature: f32,
    clock: AtomicU64,
    exact_hits: AtomicU64,
    semantic_hits: AtomicU64,
    misses: AtomicU64,
}

impl SemanticCache {
    /// Create an exact-match cache with default settings.
    pub fn new() -> Self {
        Self::from_config(&CacheConfig::default(), None)
    }

    /// Create a cache from configuration. Without an embedder (or with
    /// `enable_embeddings = false`) only exact matches are served.
    pub fn from_config(config: &CacheConfig, embedder: Option<Arc<dyn EmbeddingGenerator>>) -> Self {
        Self {
            entries: DashMap::new(),
            embedder: embedder.filter(|_| config.enable_embeddings),
            threshold: config.similarity_threshold.clamp(0.0, 1.0),
            ttl: config.ttl(),
            capacity: config.capacity.max(1),
            embedding_timeout: config.embedding_timeout(),
            max_cacheable_temperature: config.max_cacheable_temperature,
            clock: AtomicU64::new(0),
            exact_hits: AtomicU64::new(0),
            semantic_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Set the embedding generator.
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingGenerator>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Set the similarity threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Set the TTL for new entries.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Whether responses to `request` may be stored and served.
    ///
    /// Requests without a temperature are treated as deterministic.
    pub fn is_cacheable(&self, request: &InferenceRequest) -> bool {
        request
            .constraints
            .temperature
            .map_or(true, |t| t <= self.max_cacheable_temperature)
    }

    /// Cached response for `request`, if any.
    pub async fn get(&self, request: &InferenceRequest) -> Option<InferenceResponse> {
        self.lookup(request).await.hit.map(|(response, _)| response)
    }

    /// Exact lookup, then semantic lookup.
    pub async fn lookup(&self, request: &InferenceRequest) -> CacheLookup {
        if !self.is_cacheable(request) {
            return CacheLookup::default();
        }

        let key = request.cache_key();
        let now = Instant::now();

        // 1. Exact match (fast path)
        let exact = match self.entries.get_mut(&key) {
            Some(entry) if entry.is_expired(now) => {
                drop(entry);
                self.entries.remove(&key);
                None
            }
            Some(mut entry) if entry.serves(request) => {
                entry.last_access = self.tick();
                Some(entry.response.clone())
            }
            _ => None,
        };
        if let Some(response) = exact {
            self.exact_hits.fetch_add(1, Ordering::Relaxed);
            track_cache_lookup("exact");
            tracing::debug!(request_id = %request.request_id, "Semantic cache exact hit");
            return CacheLookup {
                hit: Some((self.mark_cached(response, request), CacheMatch::Exact)),
                embedding: None,
            };
        }

        // 2. Semantic match (slow path)
        let embedding = self.embed(request).await;
        if let Some(query) = &embedding {
            if let Some((key, similarity)) = self.best_match(query, request) {
                let response = self.entries.get_mut(&key).map(|mut entry| {
                    entry.last_access = self.tick();
                    entry.response.clone()
                });
                if let Some(response) = response {
                    self.semantic_hits.fetch_add(1, Ordering::Relaxed);
                    track_cache_lookup("semantic");
                    tracing::debug!(
                        request_id = %request.request_id,
                        similarity = similarity,
                        "Semantic cache fuzzy hit"
                    );
                    return CacheLookup {
                        hit: Some((self.mark_cached(response, request), CacheMatch::Semantic)),
                        embedding,
                    };
                }
            }
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        track_cache_lookup("miss");
        tracing::debug!(request_id = %request.request_id, "Semantic cache miss");
        CacheLookup {
            hit: None,
            embedding,
        }
    }

    /// Store a response, embedding the prompt if needed.
    pub async fn put(&self, request: &InferenceRequest, response: &InferenceResponse) {
        if !self.should_store(request, response) {
            return;
        }
        let embedding = self.embed(request).await;
        self.insert(request, response, embedding);
    }

    /// Store a response reusing an embedding computed during lookup.
    pub async fn put_with_embedding(
        &self,
        request: &InferenceRequest,
        response: &InferenceResponse,
        embedding: Option<Vec<f32>>,
    ) {
        if !self.should_store(request, response) {
            return;
        }
        let embedding = match embedding {
            Some(embedding) => Some(embedding),
            None => self.embed(request).await,
        };
        self.insert(request, response, embedding);
    }

    /// Drop expired entries.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| !entry.is_expired(now));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get cache statistics.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            exact_hits: self.exact_hits.load(Ordering::Relaxed),
            semantic_hits: self.semantic_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn should_store(&self, request: &InferenceRequest, response: &InferenceResponse) -> bool {
        response.status == ResponseStatus::Success
            && !response.cached
            && self.is_cacheable(request)
    }

    fn insert(
        &self,
        request: &InferenceRequest,
        response: &InferenceResponse,
        embedding: Option<Vec<f32>>,
    ) {
        let key = request.cache_key();
        let entry = CacheEntry {
            response: response.clone(),
            embedding,
            capabilities: request.requirements.capabilities.iter().copied().collect(),
            created_at: Instant::now(),
            ttl: self.ttl,
            last_access: self.tick(),
        };

        tracing::debug!(
            request_id = %request.request_id,
            model = %response.model_id,
            has_embedding = entry.embedding.is_some(),
            "Caching response"
        );

        self.entries.insert(key.clone(), entry);
        self.evict_over_capacity(&key);
    }

    fn evict_over_capacity(&self, keep: &str) {
        let now = Instant::now();
        if self.entries.len() > self.capacity {
            self.entries.retain(|_, entry| !entry.is_expired(now));
        }
        while self.entries.len() > self.capacity {
            let oldest = self
                .entries
                .iter()
                .filter(|entry| entry.key() != keep)
                .min_by_key(|entry| entry.last_access)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    tracing::debug!(key = %key, "Evicting least recently used cache entry");
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }

    /// Best live entry above the threshold, removing expired entries seen on the way.
    fn best_match(&self, query: &[f32], request: &InferenceRequest) -> Option<(String, f32)> {
        let now = Instant::now();
        let mut expired = Vec::new();
        let mut best: Option<(String, f32)> = None;

        for entry in self.entries.iter() {
            if entry.is_expired(now) {
                expired.push(entry.key().clone());
                continue;
            }
            if !entry.serves(request) {
                continue;
            }
            if let Some(stored) = &entry.embedding {
                let similarity = cosine_similarity(query, stored);
                let better = best.as_ref().map_or(true, |(_, s)| similarity > *s);
                if similarity >= self.threshold && better {
                    best = Some((entry.key().clone(), similarity));
                }
            }
        }

        for key in expired {
            self.entries.remove_if(&key, |_, entry| entry.is_expired(now));
        }
        best
    }

    async fn embed(&self, request: &InferenceRequest) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        let text = normalize(&request.prompt.render());

        match tokio::time::timeout(self.embedding_timeout, embedder.embed(&text)).await {
            Ok(Ok(embedding)) if !embedding.is_empty() => Some(embedding),
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Failed to generate embedding for cache");
                None
            }
            Err(_) => {
                tracing::warn!(
                    timeout_ms = self.embedding_timeout.as_millis() as u64,
                    "Embedding generation timed out"
                );
                None
            }
        }
    }

    fn mark_cached(&self, mut response: InferenceResponse, request: &InferenceRequest) -> InferenceResponse {
        response.request_id = request.request_id.clone();
        response.cached = true;
        response.latency_ms = 0;
        response.cost = 0.0;
        response
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }
}

impl Default for SemanticCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Normalize prompt text: lowercase, collapse whitespace.
fn normalize(text: &str) -> String {
    text.to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
