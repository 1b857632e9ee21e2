//! Reconciliation of a fetched snapshot against the persisted bet table.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use crate::bets::Bet;
use crate::semantic::{Embedder, EmbeddingError};
use crate::store::{BetStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub is_new: bool,
    pub is_changed: bool,
}

impl UpsertOutcome {
    pub fn label(&self) -> &'static str {
        match (self.is_new, self.is_changed) {
            (true, _) => "insert",
            (false, true) => "update",
            (false, false) => "skip",
        }
    }
}

#[derive(Debug, Default)]
pub struct ReconcileResult {
    /// Inserted bets and bets whose content hash changed, in fetch order.
    pub new_or_changed: Vec<Bet>,
    /// Bets that were active before this round and were not observed.
    pub inactivated: usize,
    /// Number of bets of the source in the snapshot.
    pub observed: usize,
}

pub struct Reconciler {
    bets: Arc<dyn BetStore>,
}

impl Reconciler {
    pub fn new(bets: Arc<dyn BetStore>) -> Self {
        Self { bets }
    }

    /// Insert or refresh one bet. Every observation marks it active and bumps `last_seen_at`.
    pub fn upsert(&self, bet: &Bet) -> Result<UpsertOutcome, StoreError> {
        let outcome = match self.bets.bet_state(bet.source(), bet.market_id())? {
            None => {
                self.bets.insert_bet(bet)?;
                UpsertOutcome {
                    is_new: true,
                    is_changed: true,
                }
            }
            Some(state) => {
                if !state.is_active {
                    log::info!("Reactivating {}", bet.key());
                }
                self.bets.update_bet(bet)?;
                UpsertOutcome {
                    is_new: false,
                    is_changed: state.content_hash != bet.content_hash(),
                }
            }
        };
        log::debug!("upsert {}: {}", bet.key(), outcome.label());
        Ok(outcome)
    }

    pub fn reconcile(&self, source: &str, fetched: &[Bet]) -> Result<ReconcileResult, StoreError> {
        self.reconcile_with(source, fetched, |_, _| {})
    }

    /// Upsert every fetched bet, then make the active set of `source` equal to
    /// the fetched id set. `on_upsert` is called after each bet is written.
    ///
    /// Each step commits on its own. An interrupted run is corrected by the next one.
    pub fn reconcile_with<F>(
        &self,
        source: &str,
        fetched: &[Bet],
        mut on_upsert: F,
    ) -> Result<ReconcileResult, StoreError>
    where
        F: FnMut(&Bet, &UpsertOutcome),
    {
        log::info!("sync_source start: source={source} count={}", fetched.len());

        let mut result = ReconcileResult::default();
        let mut observed: Vec<String> = Vec::with_capacity(fetched.len());

        for bet in fetched {
            if bet.source() != source {
                log::warn!("Skipping {} while reconciling source={source}", bet.key());
                continue;
            }
            let outcome = self.upsert(bet)?;
            on_upsert(bet, &outcome);
            if outcome.is_new || outcome.is_changed {
                result.new_or_changed.push(bet.clone());
            }
            observed.push(bet.market_id().to_string());
        }

        result.observed = observed.len();
        result.inactivated = self.bets.mark_inactive_except(source, &observed)?;

        log::info!(
            "sync_source: source={source} new_or_changed={} inactivated={}",
            result.new_or_changed.len(),
            result.inactivated
        );
        Ok(result)
    }
}

/// Embed new or changed bets whose text is not cached yet, as one batch.
///
/// Bets with empty text are left out, as matching ignores them. Returns the
/// number of distinct texts sent to the provider.
pub fn backfill_embeddings(embedder: &Embedder, bets: &[Bet]) -> Result<usize, EmbeddingError> {
    let mut seen: HashSet<&str> = HashSet::new();
    let mut texts: Vec<String> = Vec::new();

    for bet in bets {
        if bet.text_for_embedding().trim().is_empty() || !seen.insert(bet.content_hash()) {
            continue;
        }
        if embedder.cached_by_hash(bet.content_hash())?.is_none() {
            texts.push(bet.text_for_embedding().to_string());
        }
    }

    if texts.is_empty() {
        log::debug!("No embeddings to backfill");
        return Ok(0);
    }

    log::info!("Backfilling {} embeddings", texts.len());
    embedder.resolve(&texts)?;
    Ok(texts.len())
}
