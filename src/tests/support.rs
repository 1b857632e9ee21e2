//! Shared fixtures: in-memory store, scripted embedding provider, fake sources.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::bets::{Bet, BetCreate};
use crate::clock::ManualClock;
use crate::retry::RetryPolicy;
use crate::semantic::{Embedder, EmbeddingCache, EmbeddingError, EmbeddingProvider};
use crate::sources::{MarketSource, SourceError};
use crate::store::SqliteStore;

pub const START: i64 = 1_700_000_000;
pub const MODEL: &str = "test-model";
const DIMS: usize = 3;

pub fn store() -> (Arc<SqliteStore>, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(START));
    let store = SqliteStore::open_in_memory(clock.clone()).expect("in-memory store");
    (Arc::new(store), clock)
}

pub fn bet(source: &str, market_id: &str, title: &str, description: Option<&str>) -> Bet {
    Bet::from(BetCreate {
        source: source.to_string(),
        market_id: market_id.to_string(),
        title: title.to_string(),
        description: description.map(str::to_string),
        ..Default::default()
    })
}

/// Unit vector whose cosine with `[1, 0, 0]` is `similarity`.
pub fn at_similarity(similarity: f64) -> Vec<f32> {
    let rest = (1.0 - similarity * similarity).max(0.0).sqrt();
    vec![similarity as f32, rest as f32, 0.0]
}

pub fn anchor() -> Vec<f32> {
    vec![1.0, 0.0, 0.0]
}

#[derive(Debug, Clone, Copy)]
pub enum Failure {
    Status(u16),
    /// Reply with one vector fewer than requested
    Short,
}

#[derive(Default)]
struct ProviderState {
    vectors: HashMap<String, Vec<f32>>,
    failures: VecDeque<Failure>,
    calls: Vec<Vec<String>>,
}

/// Embedding provider with scripted vectors and failures. Clones share state,
/// so a test keeps one handle while the embedder owns another.
#[derive(Clone, Default)]
pub struct FakeProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vector returned for `text`. Unknown texts get a zero vector.
    pub fn set(&self, text: &str, vector: Vec<f32>) {
        self.state
            .lock()
            .unwrap()
            .vectors
            .insert(text.to_string(), vector);
    }

    pub fn fail_next(&self, failures: &[Failure]) {
        self.state.lock().unwrap().failures.extend(failures.iter().copied());
    }

    /// Texts of every provider call, in call order.
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn embedded_texts(&self) -> Vec<String> {
        self.calls().into_iter().flatten().collect()
    }
}

impl EmbeddingProvider for FakeProvider {
    fn embed(&self, texts: &[String], _model: &str) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(texts.to_vec());

        let mut vectors: Vec<Vec<f32>> = texts
            .iter()
            .map(|t| state.vectors.get(t).cloned().unwrap_or_else(|| vec![0.0; DIMS]))
            .collect();

        match state.failures.pop_front() {
            None => Ok(vectors),
            Some(Failure::Status(status)) => Err(EmbeddingError::Status {
                status,
                body: "scripted failure".to_string(),
            }),
            Some(Failure::Short) => {
                vectors.pop();
                Ok(vectors)
            }
        }
    }
}

pub fn embedder(store: &Arc<SqliteStore>, provider: &FakeProvider, clock: &Arc<ManualClock>) -> Embedder {
    Embedder::new(
        Box::new(provider.clone()),
        EmbeddingCache::new(store.clone()),
        MODEL,
        RetryPolicy::new(3, Duration::from_secs(1)),
        clock.clone(),
    )
}

/// Source serving whatever snapshot the test put in.
#[derive(Clone)]
pub struct FakeSource {
    name: String,
    snapshot: Arc<Mutex<Vec<Bet>>>,
}

impl FakeSource {
    pub fn new(name: &str, bets: Vec<Bet>) -> Self {
        Self {
            name: name.to_string(),
            snapshot: Arc::new(Mutex::new(bets)),
        }
    }

    pub fn replace(&self, bets: Vec<Bet>) {
        *self.snapshot.lock().unwrap() = bets;
    }
}

impl MarketSource for FakeSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn fetch(&self, limit: usize) -> Result<Vec<Bet>, SourceError> {
        Ok(self
            .snapshot
            .lock()
            .unwrap()
            .iter()
            .take(limit)
            .cloned()
            .collect())
    }
}
