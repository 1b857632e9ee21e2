//! Market sources: clients that return a snapshot of a source's open markets
//! as typed [`Bet`]s.

pub mod normalize;
pub mod polymarket;

use crate::bets::Bet;

pub use polymarket::PolymarketSource;

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server returned HTTP {status}: {body}")]
    Server { status: u16, body: String },

    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("gave up after {attempts} attempts: {source}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        source: Box<SourceError>,
    },
}

impl SourceError {
    pub fn is_transient(&self) -> bool {
        match self {
            SourceError::Http(e) => !e.is_decode(),
            SourceError::Server { status, .. } => *status == 429 || *status >= 500,
            SourceError::Json(_) | SourceError::RetriesExhausted { .. } => false,
        }
    }
}

pub trait MarketSource {
    /// Stable source name stored with every bet, e.g. `polymarket`.
    fn name(&self) -> &str;

    /// Fetch up to `limit` open markets, in the order the source returns them.
    fn fetch(&self, limit: usize) -> Result<Vec<Bet>, SourceError>;
}
