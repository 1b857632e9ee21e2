use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::matching::{MatchParams, MatchReport, Matcher, SimilarBet};
use crate::retry::RetryPolicy;
use crate::semantic::{Embedder, EmbeddingCache, EmbeddingError, EmbeddingProvider, VoyageProvider};
use crate::sources::{MarketSource, PolymarketSource};
use crate::store::SqliteStore;
use crate::sync::{backfill_embeddings, Reconciler};

#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub source: String,
    pub fetched: usize,
    pub new_or_changed: usize,
    pub inactivated: usize,
    pub embedded: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub linked: usize,
    pub queued: usize,
    pub conflicts: usize,
    pub compared: usize,
    pub synced: Vec<SyncSummary>,
}

/// One batch run over the store: sources in, events out.
pub struct App {
    config: Config,
    store: Arc<SqliteStore>,
    embedder: Embedder,
    sources: Vec<Box<dyn MarketSource>>,
    show_progress: bool,
}

/// Open the configured database.
pub fn open_store(config: &Config, clock: Arc<dyn Clock>) -> anyhow::Result<Arc<SqliteStore>> {
    let path = config.database_path();
    let store = SqliteStore::open(&path, clock)
        .with_context(|| format!("failed to open database {}", path.display()))?;
    Ok(Arc::new(store))
}

impl App {
    pub fn new(
        config: Config,
        store: Arc<SqliteStore>,
        embedder: Embedder,
        sources: Vec<Box<dyn MarketSource>>,
    ) -> Self {
        Self {
            config,
            store,
            embedder,
            sources,
            show_progress: false,
        }
    }

    /// Wire the production collaborators. Fails before touching anything
    /// when the embedding API key is missing.
    pub fn from_config(config: Config, api_key: Option<String>) -> anyhow::Result<Self> {
        let api_key = api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(EmbeddingError::MissingApiKey)?;

        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let store = open_store(&config, clock.clone())?;

        let emb = &config.embedding;
        let retry = RetryPolicy::new(emb.max_retries, Duration::from_millis(emb.backoff_base_ms))
            .with_jitter(emb.jitter);
        let provider: Box<dyn EmbeddingProvider> = Box::new(VoyageProvider::new(
            &emb.api_base,
            &api_key,
            Duration::from_secs(emb.request_timeout_secs),
        )?);
        let embedder = Embedder::new(
            provider,
            EmbeddingCache::new(store.clone()),
            emb.model.clone(),
            retry.clone(),
            clock.clone(),
        );

        let pm = &config.polymarket;
        let polymarket = PolymarketSource::new(&pm.base_url, &pm.user_agent, retry, clock)?;
        let sources: Vec<Box<dyn MarketSource>> = vec![Box::new(polymarket)];

        Ok(Self::new(config, store, embedder, sources))
    }

    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    #[cfg(test)]
    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn match_params(&self) -> MatchParams {
        let m = &self.config.matching;
        MatchParams {
            high: m.high_threshold,
            low: m.low_threshold,
            max_pairs_per_candidate: m.max_pairs_per_candidate,
        }
    }

    fn progress_bar(&self, len: usize, source: &str) -> ProgressBar {
        if !self.show_progress || len == 0 {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len as u64);
        pb.set_style(
            ProgressStyle::with_template("sync[{prefix}] {bar:40} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        pb.set_prefix(source.to_string());
        pb
    }

    /// Fetch, reconcile and backfill embeddings for one source.
    pub fn sync_source(&self, source: &dyn MarketSource, limit: usize) -> anyhow::Result<SyncSummary> {
        let name = source.name().to_string();
        let _span = tracing::info_span!("sync", source = %name).entered();

        let fetched = source
            .fetch(limit)
            .with_context(|| format!("failed to fetch from {name}"))?;

        let pb = self.progress_bar(fetched.len(), &name);
        let reconciler = Reconciler::new(self.store.clone());
        let result = reconciler.reconcile_with(&name, &fetched, |bet, outcome| {
            pb.set_message(format!("{} id={}", outcome.label(), bet.market_id()));
            pb.inc(1);
        })?;
        pb.finish_and_clear();

        let embedded = backfill_embeddings(&self.embedder, &result.new_or_changed)?;

        let summary = SyncSummary {
            source: name,
            fetched: fetched.len(),
            new_or_changed: result.new_or_changed.len(),
            inactivated: result.inactivated,
            embedded,
        };
        log::info!(
            "sync_source done: source={} fetched={} new_or_changed={} inactivated={} embedded={}",
            summary.source,
            summary.fetched,
            summary.new_or_changed,
            summary.inactivated,
            summary.embedded
        );
        Ok(summary)
    }

    pub fn sync_all(&self, limit: Option<usize>) -> anyhow::Result<Vec<SyncSummary>> {
        let limit = limit.unwrap_or(self.config.polymarket.limit);
        self.sources
            .iter()
            .map(|source| self.sync_source(source.as_ref(), limit))
            .collect()
    }

    /// Match every source that has active bets.
    pub fn match_all(&self, params: &MatchParams) -> anyhow::Result<MatchReport> {
        let _span = tracing::info_span!("match").entered();
        let sources = self.store.list_sources()?;
        let matcher = Matcher::new(self.store.clone(), self.store.clone(), &self.embedder);
        Ok(matcher.propose_and_link(&sources, params)?)
    }

    /// Sync every configured source, then match.
    pub fn run_once(&self, limit: Option<usize>) -> anyhow::Result<RunSummary> {
        let _span = tracing::info_span!("run").entered();
        let synced = self.sync_all(limit)?;
        let report = self.match_all(&self.match_params())?;
        Ok(RunSummary {
            linked: report.auto_links,
            queued: report.queued,
            conflicts: report.conflicts,
            compared: report.compared,
            synced,
        })
    }

    pub fn similar(
        &self,
        source: &str,
        market_id: &str,
        limit: usize,
    ) -> anyhow::Result<Vec<SimilarBet>> {
        let sources = self.store.list_sources()?;
        let matcher = Matcher::new(self.store.clone(), self.store.clone(), &self.embedder);
        Ok(matcher.rank_similar(source, market_id, &sources, limit)?)
    }
}
