//! Mock collaborators for testing.
//!
//! Deterministic stand-ins for the embedding generator and the usage sink,
//! shared by unit and integration tests across the workspace.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use crate::{
    traits::{EmbeddingGenerator, UsageRecord, UsageReporter},
    Error, Result,
};

// =============================================================================
// Mock Embedding Generators
// =============================================================================

/// Embedder returning preassigned vectors per text.
///
/// Texts without an assigned vector get an empty embedding, which never
/// matches anything.
#[derive(Default)]
pub struct StaticEmbedder {
    vectors: Mutex<HashMap<String, Vec<f32>>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl StaticEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Assign a vector to a text.
    pub fn with_vector(self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.vectors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(text.into(), vector);
        self
    }

    /// Sleep before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of embed calls so far.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingGenerator for StaticEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let vectors = self.vectors.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(vectors.get(text).cloned().unwrap_or_default())
    }
}

/// Embedder that always fails.
#[derive(Default)]
pub struct FailingEmbedder;

#[async_trait]
impl EmbeddingGenerator for FailingEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
        Err(Error::internal("embedding service unavailable"))
    }
}

// =============================================================================
// Mock Usage Reporter
// =============================================================================

/// Usage sink that records every delivered report.
///
/// Can be scripted to fail the first `failures` deliveries.
#[derive(Default)]
pub struct RecordingUsageReporter {
    records: Mutex<Vec<UsageRecord>>,
    failures_left: AtomicUsize,
    attempts: AtomicUsize,
}

impl RecordingUsageReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the first `n` deliveries.
    pub fn failing_first(n: usize) -> Self {
        Self {
            failures_left: AtomicUsize::new(n),
            ..Default::default()
        }
    }

    /// Successfully delivered records.
    pub fn records(&self) -> Vec<UsageRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Delivery attempts, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl UsageReporter for RecordingUsageReporter {
    async fn notify_usage(&self, record: &UsageRecord) -> Result<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::internal("usage sink unavailable"));
        }
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::TokenUsage;

    #[tokio::test]
    async fn test_static_embedder() {
        let embedder = StaticEmbedder::new().with_vector("hello", vec![1.0, 0.0]);
        assert_eq!(embedder.embed("hello").await.unwrap(), vec![1.0, 0.0]);
        assert!(embedder.embed("other").await.unwrap().is_empty());
        assert_eq!(embedder.call_count(), 2);
    }

    #[tokio::test]
    async fn test_recording_reporter_fails_first() {
        let reporter = RecordingUsageReporter::failing_first(1);
        let record = UsageRecord {
            request_id: "r".into(),
            agent_id: "a".into(),
            model_id: "m".into(),
            provider_id: "p".into(),
            usage: TokenUsage::new(1, 2),
            cost: 0.0,
        };

        assert!(reporter.notify_usage(&record).await.is_err());
        assert!(reporter.notify_usage(&record).await.is_ok());
        assert_eq!(reporter.attempts(), 2);
        assert_eq!(reporter.records().len(), 1);
    }
}
