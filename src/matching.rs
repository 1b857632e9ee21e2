//! Cross-source matching of bets into events.
//!
//! For every ordered pair of distinct sources `(A, B)`, each active bet of `A`
//! that has no event yet is compared with the active, event-free bets of `B`
//! by cosine similarity of their embeddings. Scores at or above the high
//! threshold are linked into a shared event, scores in `[low, high)` are queued
//! as candidates for review, anything lower is dropped.
//!
//! Two events are never merged. When both sides of a high-scoring pair already
//! belong to different events the pair is recorded as a `conflict` candidate.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use serde::Serialize;

use crate::bets::{Bet, BetKey, StoredBet};
use crate::eid::EventId;
use crate::semantic::{content_hash, cosine, rank, Embedder, EmbeddingError};
use crate::store::{
    BetStore, CandidateStatus, EventAlias, EventGraph, NewCandidate, StoreError,
};

pub const LINK_METHOD: &str = "auto-sim";
pub const QUEUE_REASON: &str = "sim-threshold";
pub const CONFLICT_REASON: &str = "event-conflict";

pub const DEFAULT_HIGH_THRESHOLD: f64 = 0.90;
pub const DEFAULT_LOW_THRESHOLD: f64 = 0.83;
pub const DEFAULT_MAX_PAIRS_PER_CANDIDATE: usize = 2000;

#[derive(Debug, thiserror::Error)]
pub enum MatchError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error("bet {0} not found")]
    UnknownBet(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchParams {
    pub high: f64,
    pub low: f64,
    /// Comparisons per bet and per other source.
    pub max_pairs_per_candidate: usize,
}

impl Default for MatchParams {
    fn default() -> Self {
        Self {
            high: DEFAULT_HIGH_THRESHOLD,
            low: DEFAULT_LOW_THRESHOLD,
            max_pairs_per_candidate: DEFAULT_MAX_PAIRS_PER_CANDIDATE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    AutoLink,
    Queue,
    Discard,
}

/// `high` is inclusive for linking, `low` inclusive for queueing.
pub fn classify(similarity: f64, high: f64, low: f64) -> Decision {
    if similarity >= high {
        Decision::AutoLink
    } else if similarity >= low {
        Decision::Queue
    } else {
        Decision::Discard
    }
}

/// Order-independent key of a pair of bets.
pub fn pair_key(a: BetKey<'_>, b: BetKey<'_>) -> String {
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    content_hash(&format!("{first}|{second}"))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MatchReport {
    pub auto_links: usize,
    pub queued: usize,
    pub conflicts: usize,
    pub compared: usize,
}

/// Result of committing a high-similarity pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkOutcome {
    AlreadyLinked(EventId),
    Joined(EventId),
    Created(EventId),
    Conflict { a_event: EventId, b_event: EventId },
}

#[derive(Debug, Clone, Serialize)]
pub struct SimilarBet {
    #[serde(flatten)]
    pub bet: StoredBet,
    pub score: f64,
}

pub struct Matcher<'a> {
    bets: Arc<dyn BetStore>,
    graph: Arc<dyn EventGraph>,
    embedder: &'a Embedder,
}

fn has_text(bet: &Bet) -> bool {
    !bet.text_for_embedding().trim().is_empty()
}

impl<'a> Matcher<'a> {
    pub fn new(bets: Arc<dyn BetStore>, graph: Arc<dyn EventGraph>, embedder: &'a Embedder) -> Self {
        Self {
            bets,
            graph,
            embedder,
        }
    }

    fn is_linked(&self, bet: &Bet) -> Result<bool, StoreError> {
        Ok(self
            .graph
            .event_for_bet(bet.source(), bet.market_id())?
            .is_some())
    }

    /// Vectors for every distinct text in `bets`, keyed by content hash.
    /// Cache misses go to the provider as one batch.
    fn load_vectors<'b, I>(&self, bets: I) -> Result<HashMap<String, Vec<f32>>, EmbeddingError>
    where
        I: IntoIterator<Item = &'b Bet>,
    {
        let mut seen = HashSet::new();
        let mut hashes = Vec::new();
        let mut texts = Vec::new();
        for bet in bets {
            if has_text(bet) && seen.insert(bet.content_hash()) {
                hashes.push(bet.content_hash().to_string());
                texts.push(bet.text_for_embedding().to_string());
            }
        }
        if texts.is_empty() {
            return Ok(HashMap::new());
        }
        let vectors = self.embedder.resolve(&texts)?;
        Ok(hashes.into_iter().zip(vectors).collect())
    }

    pub fn propose_and_link(
        &self,
        sources: &[String],
        params: &MatchParams,
    ) -> Result<MatchReport, MatchError> {
        let mut report = MatchReport::default();

        let mut ordered: Vec<&str> = Vec::new();
        for source in sources {
            if !ordered.contains(&source.as_str()) {
                ordered.push(source);
            }
        }

        let mut rows: HashMap<&str, Vec<StoredBet>> = HashMap::new();
        for source in &ordered {
            log::info!("Gathering active bets for source={source}");
            rows.insert(source, self.bets.active_bets(source)?);
        }

        // Bets linked before this pass never take part, so only embed the rest.
        let mut unlinked = Vec::new();
        for bets in rows.values() {
            for stored in bets {
                if !self.is_linked(&stored.bet)? {
                    unlinked.push(&stored.bet);
                }
            }
        }
        let vectors = self.load_vectors(unlinked)?;

        let empty = Vec::new();
        for &source in &ordered {
            let others: Vec<&str> = ordered.iter().copied().filter(|o| *o != source).collect();
            if others.is_empty() {
                continue;
            }
            log::info!("Matching for source={source} vs {}", others.join(","));

            for a in rows.get(source).unwrap_or(&empty).iter().map(|s| &s.bet) {
                if self.is_linked(a)? {
                    log::debug!("Skipping already-linked bet {}", a.key());
                    continue;
                }
                let Some(a_vec) = vectors.get(a.content_hash()) else {
                    log::debug!("Skipping empty text for {}", a.key());
                    continue;
                };

                for &other in &others {
                    let mut checked = 0;
                    for b in rows.get(other).unwrap_or(&empty).iter().map(|s| &s.bet) {
                        if self.is_linked(b)? {
                            log::debug!("Skipping already-linked candidate {}", b.key());
                            continue;
                        }
                        let Some(b_vec) = vectors.get(b.content_hash()) else {
                            log::debug!("Skipping empty candidate text {}", b.key());
                            continue;
                        };

                        let similarity = cosine(a_vec, b_vec);
                        report.compared += 1;
                        log::debug!("sim({}, {})={similarity:.4}", a.key(), b.key());

                        match classify(similarity, params.high, params.low) {
                            Decision::AutoLink => match self.link_pair(a, b, similarity)? {
                                LinkOutcome::AlreadyLinked(_) => {}
                                LinkOutcome::Joined(_) | LinkOutcome::Created(_) => {
                                    report.auto_links += 1
                                }
                                LinkOutcome::Conflict { .. } => report.conflicts += 1,
                            },
                            Decision::Queue => {
                                if self.enqueue(a, b, similarity, CandidateStatus::Pending)? {
                                    report.queued += 1;
                                }
                            }
                            Decision::Discard => {}
                        }

                        checked += 1;
                        if checked >= params.max_pairs_per_candidate {
                            log::info!(
                                "Max pairs per candidate reached for {} (limit={})",
                                a.key(),
                                params.max_pairs_per_candidate
                            );
                            break;
                        }
                    }
                }
            }
        }

        log::info!(
            "propose_and_link done: auto_links={} queued={} conflicts={} compared={}",
            report.auto_links,
            report.queued,
            report.conflicts,
            report.compared
        );
        Ok(report)
    }

    /// Put `a` and `b` into the same event, reading both sides' current events first.
    pub fn link_pair(&self, a: &Bet, b: &Bet, similarity: f64) -> Result<LinkOutcome, MatchError> {
        let a_event = self.graph.event_for_bet(a.source(), a.market_id())?;
        let b_event = self.graph.event_for_bet(b.source(), b.market_id())?;

        let outcome = match (a_event, b_event) {
            (Some(a_event), Some(b_event)) if a_event == b_event => {
                log::debug!("Already in same event: {a_event}");
                LinkOutcome::AlreadyLinked(a_event)
            }
            (Some(a_event), Some(b_event)) => {
                log::warn!(
                    "Event conflict: {} is in {a_event}, {} is in {b_event} (sim={similarity:.4}); not merging",
                    a.key(),
                    b.key()
                );
                let _ = self.enqueue(a, b, similarity, CandidateStatus::Conflict)?;
                LinkOutcome::Conflict { a_event, b_event }
            }
            (Some(event), None) => {
                self.link(&event, b, similarity)?;
                LinkOutcome::Joined(event)
            }
            (None, Some(event)) => {
                self.link(&event, a, similarity)?;
                LinkOutcome::Joined(event)
            }
            (None, None) => {
                let title = [a.title(), b.title()]
                    .into_iter()
                    .map(str::trim)
                    .find(|t| !t.is_empty());
                let event = self.graph.create_event(title)?;
                self.link(&event, a, similarity)?;
                self.link(&event, b, similarity)?;
                LinkOutcome::Created(event)
            }
        };
        Ok(outcome)
    }

    fn link(&self, event: &EventId, bet: &Bet, similarity: f64) -> Result<(), StoreError> {
        self.graph.link_bet(&EventAlias {
            event_id: event.clone(),
            source: bet.source().to_string(),
            market_id: bet.market_id().to_string(),
            content_hash: bet.content_hash().to_string(),
            similarity: Some(similarity),
            confidence: None,
            method: LINK_METHOD.to_string(),
        })
    }

    /// Returns whether a new row was written.
    fn enqueue(
        &self,
        a: &Bet,
        b: &Bet,
        similarity: f64,
        status: CandidateStatus,
    ) -> Result<bool, StoreError> {
        let reason = match status {
            CandidateStatus::Pending => QUEUE_REASON,
            CandidateStatus::Conflict => CONFLICT_REASON,
        };
        let inserted = self.graph.enqueue_candidate(&NewCandidate {
            pair_key: pair_key(a.key(), b.key()),
            a_source: a.source().to_string(),
            a_market_id: a.market_id().to_string(),
            b_source: b.source().to_string(),
            b_market_id: b.market_id().to_string(),
            similarity,
            reason: reason.to_string(),
            status,
        })?;
        if inserted {
            log::info!(
                "Queued candidate {} <-> {} sim={similarity:.4} status={}",
                a.key(),
                b.key(),
                status.as_str()
            );
        }
        Ok(inserted)
    }

    /// Active bets of `others` ranked by similarity to one bet, best first.
    pub fn rank_similar(
        &self,
        source: &str,
        market_id: &str,
        others: &[String],
        limit: usize,
    ) -> Result<Vec<SimilarBet>, MatchError> {
        let target = self
            .bets
            .get_bet(source, market_id)?
            .ok_or_else(|| MatchError::UnknownBet(format!("{source}:{market_id}")))?;
        if !has_text(&target.bet) {
            return Ok(vec![]);
        }

        let mut pool: Vec<StoredBet> = Vec::new();
        for other in others.iter().filter(|o| o.as_str() != source) {
            pool.extend(
                self.bets
                    .active_bets(other)?
                    .into_iter()
                    .filter(|s| has_text(&s.bet)),
            );
        }

        let vectors = self.load_vectors(std::iter::once(&target.bet).chain(pool.iter().map(|s| &s.bet)))?;
        let Some(query) = vectors.get(target.bet.content_hash()) else {
            return Ok(vec![]);
        };
        let candidates: Vec<Vec<f32>> = pool
            .iter()
            .map(|s| vectors.get(s.bet.content_hash()).cloned().unwrap_or_default())
            .collect();

        let mut ranked = Vec::new();
        for hit in rank(query, &candidates, limit) {
            ranked.push(SimilarBet {
                bet: pool[hit.index].clone(),
                score: hit.score,
            });
        }
        Ok(ranked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key<'a>(source: &'a str, market_id: &'a str) -> BetKey<'a> {
        BetKey { source, market_id }
    }

    #[test]
    fn test_classify_boundaries() {
        assert_eq!(classify(0.90, 0.90, 0.83), Decision::AutoLink);
        assert_eq!(classify(0.95, 0.90, 0.83), Decision::AutoLink);
        assert_eq!(classify(0.8999, 0.90, 0.83), Decision::Queue);
        assert_eq!(classify(0.83, 0.90, 0.83), Decision::Queue);
        assert_eq!(classify(0.8299, 0.90, 0.83), Decision::Discard);
        assert_eq!(classify(-1.0, 0.90, 0.83), Decision::Discard);
    }

    #[test]
    fn test_pair_key_symmetric() {
        let a = key("polymarket", "1");
        let b = key("kalshi", "XYZ");
        assert_eq!(pair_key(a, b), pair_key(b, a));
        assert_eq!(pair_key(a, b), content_hash("kalshi:XYZ|polymarket:1"));
        assert_ne!(pair_key(a, b), pair_key(a, key("kalshi", "XYZ2")));
    }
}
