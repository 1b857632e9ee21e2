use std::sync::Arc;

use crate::store::{EmbeddingStore, StoreError};

/// Content-addressed vector cache keyed by `(content hash, model)`.
///
/// Entries are never deleted. Writing the same key again overwrites the vector
/// and refreshes its timestamp.
#[derive(Clone)]
pub struct EmbeddingCache {
    store: Arc<dyn EmbeddingStore>,
}

impl EmbeddingCache {
    pub fn new(store: Arc<dyn EmbeddingStore>) -> Self {
        Self { store }
    }

    pub fn get(&self, hash: &str, model: &str) -> Result<Option<Vec<f32>>, StoreError> {
        let vector = self.store.get_embedding(hash, model)?;
        if vector.is_some() {
            log::debug!("EmbeddingCache hit: model={model} hash={hash}");
        } else {
            log::debug!("EmbeddingCache miss: model={model} hash={hash}");
        }
        Ok(vector)
    }

    pub fn set(&self, hash: &str, model: &str, vector: &[f32]) -> Result<(), StoreError> {
        self.store.put_embedding(hash, model, vector)?;
        log::debug!(
            "EmbeddingCache set: model={model} hash={hash} dims={}",
            vector.len()
        );
        Ok(())
    }
}
