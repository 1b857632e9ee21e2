//! Storage ports for bets, the event graph and the embedding cache.
//!
//! Components receive the narrow trait they need at construction. The SQLite
//! implementation in [`sqlite`] provides all three over one connection.

pub mod sqlite;

use serde::Serialize;

use crate::bets::{Bet, StoredBet};
use crate::eid::EventId;
use crate::semantic::storage::VectorCodecError;

pub use sqlite::SqliteStore;

/// Maximum number of market ids bound into a single statement.
pub const ID_CHUNK_SIZE: usize = 500;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("stored vector for hash {hash} is unreadable: {source}")]
    InvalidVector {
        hash: String,
        #[source]
        source: VectorCodecError,
    },

    #[error("unknown candidate status {0:?}")]
    UnknownStatus(String),
}

/// Persisted change-detection state of one bet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BetState {
    pub content_hash: String,
    pub is_active: bool,
}

pub trait BetStore {
    fn bet_state(&self, source: &str, market_id: &str) -> Result<Option<BetState>, StoreError>;

    /// Insert a never-seen bet as active, with first/last seen set to now.
    fn insert_bet(&self, bet: &Bet) -> Result<(), StoreError>;

    /// Overwrite mutable fields of an existing bet, mark it active and bump `last_seen_at`.
    fn update_bet(&self, bet: &Bet) -> Result<(), StoreError>;

    /// Deactivate every active bet of `source` whose id is not in `observed`,
    /// and reactivate observed ids that are still inactive.
    ///
    /// Returns the number of bets that went from active to inactive.
    fn mark_inactive_except(&self, source: &str, observed: &[String]) -> Result<usize, StoreError>;

    fn get_bet(&self, source: &str, market_id: &str) -> Result<Option<StoredBet>, StoreError>;

    /// Active bets of `source` in insertion order.
    fn active_bets(&self, source: &str) -> Result<Vec<StoredBet>, StoreError>;
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub id: EventId,
    pub title: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventSummary {
    #[serde(flatten)]
    pub event: Event,
    pub alias_count: usize,
}

/// Link of one source bet to its event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventAlias {
    pub event_id: EventId,
    pub source: String,
    pub market_id: String,
    pub content_hash: String,
    pub similarity: Option<f64>,
    pub confidence: Option<f64>,
    pub method: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CandidateStatus {
    /// Similar enough to review, not enough to auto-link.
    Pending,
    /// High similarity, but both sides already belong to different events.
    Conflict,
}

impl CandidateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateStatus::Pending => "pending",
            CandidateStatus::Conflict => "conflict",
        }
    }
}

impl std::str::FromStr for CandidateStatus {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CandidateStatus::Pending),
            "conflict" => Ok(CandidateStatus::Conflict),
            other => Err(StoreError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventCandidate {
    pub pair_key: String,
    pub a_source: String,
    pub a_market_id: String,
    pub b_source: String,
    pub b_market_id: String,
    pub similarity: f64,
    pub reason: String,
    pub status: CandidateStatus,
    pub created_at: i64,
}

/// Candidate row before it is written; `created_at` is stamped by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewCandidate {
    pub pair_key: String,
    pub a_source: String,
    pub a_market_id: String,
    pub b_source: String,
    pub b_market_id: String,
    pub similarity: f64,
    pub reason: String,
    pub status: CandidateStatus,
}

pub trait EventGraph {
    fn event_for_bet(&self, source: &str, market_id: &str) -> Result<Option<EventId>, StoreError>;

    fn create_event(&self, title: Option<&str>) -> Result<EventId, StoreError>;

    /// Insert the alias, or move an existing alias for the same bet. Bumps the event's `updated_at`.
    fn link_bet(&self, alias: &EventAlias) -> Result<(), StoreError>;

    /// Returns `false` when a row with the same pair key already exists.
    fn enqueue_candidate(&self, candidate: &NewCandidate) -> Result<bool, StoreError>;

    fn aliases(&self, event_id: &EventId) -> Result<Vec<EventAlias>, StoreError>;

    fn candidates(&self, status: Option<CandidateStatus>) -> Result<Vec<EventCandidate>, StoreError>;

    fn events(&self) -> Result<Vec<EventSummary>, StoreError>;
}

pub trait EmbeddingStore {
    fn get_embedding(&self, hash: &str, model: &str) -> Result<Option<Vec<f32>>, StoreError>;

    /// Upsert keyed by `(hash, model)` with a fresh `created_at`.
    fn put_embedding(&self, hash: &str, model: &str, vector: &[f32]) -> Result<(), StoreError>;
}

/// Row counts reported by the `status` command.
#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub active_bets: usize,
    pub inactive_bets: usize,
    pub embeddings: usize,
    pub events: usize,
    pub aliases: usize,
    pub pending_candidates: usize,
    pub conflict_candidates: usize,
}
