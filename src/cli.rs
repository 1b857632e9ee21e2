use clap::{Parser, Subcommand, ValueEnum};

use crate::store::CandidateStatus;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Show progress bars while syncing
    #[clap(long, global = true, default_value = "false")]
    pub progress: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusArg {
    Pending,
    Conflict,
}

impl From<StatusArg> for CandidateStatus {
    fn from(value: StatusArg) -> Self {
        match value {
            StatusArg::Pending => CandidateStatus::Pending,
            StatusArg::Conflict => CandidateStatus::Conflict,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sync every source, then match across sources.
    Run {
        /// Markets fetched per source
        #[clap(short, long)]
        limit: Option<usize>,
    },
    /// Fetch and reconcile every source and backfill embeddings.
    Sync {
        /// Markets fetched per source
        #[clap(short, long)]
        limit: Option<usize>,
    },
    /// Match stored bets across sources.
    Match {
        /// Auto-link at or above this similarity
        #[clap(long)]
        high: Option<f64>,

        /// Queue for review at or above this similarity
        #[clap(long)]
        low: Option<f64>,

        /// Comparisons per bet and per other source
        #[clap(long)]
        max_pairs: Option<usize>,
    },
    /// List sources with active bets
    Sources {},
    /// List active bets of a source
    Bets {
        #[clap(short, long)]
        source: String,

        /// Case-insensitive substring of title or description
        #[clap(short = 'q', long)]
        search: Option<String>,

        #[clap(short, long, default_value = "50")]
        limit: usize,
    },
    /// Rank bets from other sources by similarity to one bet
    Similar {
        #[clap(short, long)]
        source: String,

        #[clap(short, long)]
        market_id: String,

        #[clap(short, long, default_value = "10")]
        limit: usize,
    },
    /// List queued candidate pairs
    Candidates {
        #[clap(long, value_enum)]
        status: Option<StatusArg>,
    },
    /// List events with their alias counts
    Events {
        /// Also print the aliases of each event
        #[clap(long, default_value = "false")]
        aliases: bool,
    },
    /// Row counts of the store
    Status {},
}

impl Command {
    /// Commands that write to the store and hold the directory lock.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Command::Run { .. } | Command::Sync { .. } | Command::Match { .. } | Command::Similar { .. }
        )
    }
}
