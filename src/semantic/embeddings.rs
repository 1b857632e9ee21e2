//! Batch embedding resolution with a content-addressed cache in front of a
//! remote provider.
//!
//! [`Embedder::resolve`] hashes every input, serves cache hits locally and sends
//! the remaining distinct texts to the provider in a single batch. The batch is
//! retried with exponential backoff; vectors are cached only once the whole
//! batch succeeded.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::clock::Clock;
use crate::retry::RetryPolicy;
use crate::semantic::cache::EmbeddingCache;
use crate::semantic::preprocess::content_hash;
use crate::store::StoreError;

/// Maps a batch of texts to one vector per text, in request order.
pub trait EmbeddingProvider {
    fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("Embedding provider failed: {0}")]
    Provider(String),

    #[error("Embedding request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Embedding provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Embedding provider returned {got} vectors for {expected} texts")]
    LengthMismatch { expected: usize, got: usize },

    #[error("VOYAGE_API_KEY not set in environment")]
    MissingApiKey,

    #[error("Embedding batch failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<EmbeddingError>,
    },

    #[error("Embedding cache error: {0}")]
    Store(#[from] StoreError),
}

impl EmbeddingError {
    /// Whether another attempt of the same request may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            EmbeddingError::Status { status, .. } => *status == 429 || *status >= 500,
            EmbeddingError::Http(_)
            | EmbeddingError::Provider(_)
            | EmbeddingError::LengthMismatch { .. } => true,
            EmbeddingError::MissingApiKey
            | EmbeddingError::RetriesExhausted { .. }
            | EmbeddingError::Store(_) => false,
        }
    }
}

pub struct Embedder {
    provider: Box<dyn EmbeddingProvider>,
    cache: EmbeddingCache,
    model: String,
    retry: RetryPolicy,
    clock: Arc<dyn Clock>,
}

impl Embedder {
    pub fn new(
        provider: Box<dyn EmbeddingProvider>,
        cache: EmbeddingCache,
        model: impl Into<String>,
        retry: RetryPolicy,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let model = model.into();
        log::debug!(
            "Embedder initialized: model={model} max_attempts={} backoff_base={:?}",
            retry.max_attempts,
            retry.base_delay
        );
        Self {
            provider,
            cache,
            model,
            retry,
            clock,
        }
    }

    /// Cached vector for `text`, without calling the provider.
    #[cfg(test)]
    pub fn cached(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        Ok(self.cache.get(&content_hash(text), &self.model)?)
    }

    /// Cached vector for an already computed content hash.
    pub fn cached_by_hash(&self, hash: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        Ok(self.cache.get(hash, &self.model)?)
    }

    /// Resolve one vector per input text, in input order.
    pub fn resolve(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let hashes: Vec<String> = texts.iter().map(|t| content_hash(t)).collect();

        let mut vectors: HashMap<&str, Vec<f32>> = HashMap::new();
        let mut queued: HashSet<&str> = HashSet::new();
        let mut missing_hashes: Vec<&str> = Vec::new();
        let mut missing_texts: Vec<String> = Vec::new();

        for (text, hash) in texts.iter().zip(&hashes) {
            if vectors.contains_key(hash.as_str()) || queued.contains(hash.as_str()) {
                continue;
            }
            match self.cache.get(hash, &self.model)? {
                Some(vector) => {
                    vectors.insert(hash, vector);
                }
                None => {
                    queued.insert(hash);
                    missing_hashes.push(hash);
                    missing_texts.push(text.clone());
                }
            }
        }

        if !missing_texts.is_empty() {
            log::info!(
                "Embedding needed: {}/{} texts",
                missing_texts.len(),
                texts.len()
            );
            let fresh = self.embed_batch(&missing_texts)?;
            for (hash, vector) in missing_hashes.into_iter().zip(fresh) {
                self.cache.set(hash, &self.model, &vector)?;
                vectors.insert(hash, vector);
            }
        }

        hashes
            .iter()
            .map(|hash| {
                vectors.get(hash.as_str()).cloned().ok_or_else(|| {
                    EmbeddingError::Provider(format!("no vector resolved for hash {hash}"))
                })
            })
            .collect()
    }

    pub fn resolve_one(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.resolve(&[text.to_string()])?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::Provider("no vector resolved".to_string()))
    }

    /// One provider call for `texts`, retried on transient failure.
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        log::info!(
            "Embedding batch start: count={} model={}",
            texts.len(),
            self.model
        );

        let result = self.retry.run_while(
            self.clock.as_ref(),
            "Embedding batch",
            |_| {
                let vectors = self.provider.embed(texts, &self.model)?;
                if vectors.len() != texts.len() {
                    return Err(EmbeddingError::LengthMismatch {
                        expected: texts.len(),
                        got: vectors.len(),
                    });
                }
                Ok(vectors)
            },
            EmbeddingError::is_transient,
        );

        match result {
            Ok(vectors) => {
                log::info!(
                    "Embedding batch success: count={} dims={}",
                    vectors.len(),
                    vectors.first().map(Vec::len).unwrap_or(0)
                );
                Ok(vectors)
            }
            Err(exhausted) if !exhausted.last_error.is_transient() => Err(exhausted.last_error),
            Err(exhausted) => Err(EmbeddingError::RetriesExhausted {
                attempts: exhausted.attempts,
                source: Box::new(exhausted.last_error),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let status = |status| EmbeddingError::Status {
            status,
            body: String::new(),
        };
        assert!(status(429).is_transient());
        assert!(status(503).is_transient());
        assert!(!status(400).is_transient());
        assert!(!status(401).is_transient());
        assert!(EmbeddingError::LengthMismatch { expected: 2, got: 1 }.is_transient());
        assert!(!EmbeddingError::MissingApiKey.is_transient());
    }
}
