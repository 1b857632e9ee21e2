use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::EnvFilter;

mod app;
mod bets;
mod cli;
mod clock;
mod config;
mod eid;
mod lock;
mod matching;
mod retry;
mod semantic;
mod sources;
mod store;
mod sync;
#[cfg(test)]
mod tests;

use clock::SystemClock;
use config::Config;
use matching::MatchParams;
use store::{EventAlias, EventGraph, EventSummary};

#[derive(Serialize)]
struct EventWithAliases {
    #[serde(flatten)]
    summary: EventSummary,
    aliases: Vec<EventAlias>,
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = cli::Args::parse();
    let config = Config::load().context("failed to load config")?;

    let _lock = if args.command.is_mutating() {
        Some(
            lock::FileLock::try_acquire(config.base_path())
                .context("another market-sync run holds the lock")?,
        )
    } else {
        None
    };

    match args.command {
        cli::Command::Run { limit } => {
            let app = app::App::from_config(config, std::env::var("VOYAGE_API_KEY").ok())?
                .with_progress(args.progress);
            print_json(&app.run_once(limit)?)
        }

        cli::Command::Sync { limit } => {
            let app = app::App::from_config(config, std::env::var("VOYAGE_API_KEY").ok())?
                .with_progress(args.progress);
            print_json(&app.sync_all(limit)?)
        }

        cli::Command::Match {
            high,
            low,
            max_pairs,
        } => {
            let app = app::App::from_config(config, std::env::var("VOYAGE_API_KEY").ok())?;
            let defaults = app.match_params();
            let params = MatchParams {
                high: high.unwrap_or(defaults.high),
                low: low.unwrap_or(defaults.low),
                max_pairs_per_candidate: max_pairs.unwrap_or(defaults.max_pairs_per_candidate),
            };
            if params.low > params.high {
                anyhow::bail!("--low ({}) must not exceed --high ({})", params.low, params.high);
            }
            print_json(&app.match_all(&params)?)
        }

        cli::Command::Similar {
            source,
            market_id,
            limit,
        } => {
            let app = app::App::from_config(config, std::env::var("VOYAGE_API_KEY").ok())?;
            print_json(&app.similar(&source, &market_id, limit)?)
        }

        cli::Command::Sources {} => {
            let store = app::open_store(&config, Arc::new(SystemClock))?;
            print_json(&store.list_sources()?)
        }

        cli::Command::Bets {
            source,
            search,
            limit,
        } => {
            let store = app::open_store(&config, Arc::new(SystemClock))?;
            print_json(&store.search_active_bets(&source, search.as_deref(), limit)?)
        }

        cli::Command::Candidates { status } => {
            let store = app::open_store(&config, Arc::new(SystemClock))?;
            print_json(&store.candidates(status.map(Into::into))?)
        }

        cli::Command::Events { aliases } => {
            let store = app::open_store(&config, Arc::new(SystemClock))?;
            let events = store.events()?;
            if !aliases {
                return print_json(&events);
            }
            let mut detailed = Vec::with_capacity(events.len());
            for summary in events {
                let aliases = store.aliases(&summary.event.id)?;
                detailed.push(EventWithAliases { summary, aliases });
            }
            print_json(&detailed)
        }

        cli::Command::Status {} => {
            let store = app::open_store(&config, Arc::new(SystemClock))?;
            print_json(&store.stats()?)
        }
    }
}
