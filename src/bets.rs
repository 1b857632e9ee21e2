use serde::{Deserialize, Serialize};

use crate::semantic::{content_hash, text_for_embedding};

/// A market ("bet") as observed from one source.
///
/// Built from [`BetCreate`], which fills in the derived embedding text and
/// content hash. Fields are read-only so the hash always matches the text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Bet {
    source: String,
    market_id: String,
    slug: Option<String>,
    title: String,
    description: Option<String>,
    url: Option<String>,
    close_time: Option<String>,

    text_for_embedding: String,
    content_hash: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct BetCreate {
    pub source: String,
    pub market_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub slug: Option<String>,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Already normalized to an RFC 3339 UTC string.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_time: Option<String>,
}

impl From<BetCreate> for Bet {
    fn from(create: BetCreate) -> Self {
        let text = text_for_embedding(&create.title, create.description.as_deref());
        let hash = content_hash(&text);
        Bet {
            source: create.source,
            market_id: create.market_id,
            slug: create.slug,
            title: create.title,
            description: create.description,
            url: create.url,
            close_time: create.close_time,
            text_for_embedding: text,
            content_hash: hash,
        }
    }
}

impl Bet {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn market_id(&self) -> &str {
        &self.market_id
    }

    pub fn slug(&self) -> Option<&str> {
        self.slug.as_deref()
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    pub fn close_time(&self) -> Option<&str> {
        self.close_time.as_deref()
    }

    pub fn text_for_embedding(&self) -> &str {
        &self.text_for_embedding
    }

    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }

    /// `(source, market_id)`, the composite key of a bet.
    pub fn key(&self) -> BetKey<'_> {
        BetKey {
            source: &self.source,
            market_id: &self.market_id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BetKey<'a> {
    pub source: &'a str,
    pub market_id: &'a str,
}

impl std::fmt::Display for BetKey<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.source, self.market_id)
    }
}

/// A bet as persisted, with its lifecycle columns.
#[derive(Debug, Clone, Serialize)]
pub struct StoredBet {
    #[serde(flatten)]
    pub bet: Bet,
    pub is_active: bool,
    pub first_seen_at: i64,
    pub last_seen_at: i64,
    pub inactive_at: Option<i64>,
}
