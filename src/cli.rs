//! Command line definitions for holodash.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};
use holodash::app::{ContentType, MatchMode, Stream, ViewStatePatch};

#[derive(Parser)]
#[command(
    name = "holodash",
    version,
    about = "Browse and sync the video stats dashboard backend",
    long_about = "Browse live streams, archives, clips and statistics served by the \
                  stats backend, and control its sync. Output is pretty-printed JSON."
)]
pub struct Cli {
    /// Config file (default: <config dir>/holodash/config.toml).
    #[arg(long, value_name = "PATH", env = "HOLODASH_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Streams that are live or upcoming.
    Live(ListArgs),

    /// Archived videos, with every filter applied.
    Archive(ListArgs),

    /// Clips of a channel.
    #[command(alias = "clip")]
    Clips(ListArgs),

    /// Aggregate statistics for a channel.
    Stats(StatsArgs),

    /// Control the server-side sync.
    #[command(subcommand)]
    Sync(SyncCommand),

    /// Keep live results and sync status fresh until Ctrl-C.
    Watch {
        /// Channel to scope the live view to.
        channel: Option<String>,
    },
}

#[derive(Args)]
pub struct ListArgs {
    /// Channel to scope results to.
    pub channel: Option<String>,

    /// Free-text search.
    #[arg(long = "q", value_name = "TEXT")]
    pub query: Option<String>,

    /// Collaborator channel ids.
    #[arg(long, value_delimiter = ',', value_name = "ID,..")]
    pub collab: Vec<String>,

    /// Require every collaborator instead of any.
    #[arg(long, requires = "collab")]
    pub all: bool,

    /// Hide videos that are no longer available.
    #[arg(long = "hide-unarchived")]
    pub hide_unarchived: bool,

    /// Explicit dates.
    #[arg(long, value_delimiter = ',', value_name = "YYYY-MM-DD,..")]
    pub dates: Vec<NaiveDate>,

    /// Quick year filter.
    #[arg(long, value_delimiter = ',', value_name = "YEAR,..")]
    pub years: Vec<i32>,

    /// Quick month filter, within the selected years.
    #[arg(
        long,
        value_delimiter = ',',
        value_name = "MONTH,..",
        value_parser = clap::value_parser!(u8).range(1..=12),
        requires = "years"
    )]
    pub months: Vec<u8>,

    /// Music only.
    #[arg(long)]
    pub music: bool,

    /// 1-based page number.
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u32).range(1..))]
    pub page: u32,
}

impl ListArgs {
    /// State patch selecting `stream` with these filters
    pub fn patch(&self, stream: Stream) -> ViewStatePatch {
        let mut patch = ViewStatePatch::default()
            .view(stream.into())
            .page(stream, self.page);

        if let Some(channel) = &self.channel {
            patch = patch.collection(Some(channel.as_str()));
        }
        if let Some(query) = &self.query {
            patch = patch.search_text(query.as_str());
        }
        if !self.collab.is_empty() {
            patch = patch.collaborators(self.collab.iter().map(String::as_str));
        }
        if self.all {
            patch = patch.match_mode(MatchMode::All);
        }
        if self.hide_unarchived {
            patch = patch.hide_unavailable(true);
        }
        if !self.dates.is_empty() {
            patch = patch.dates(self.dates.iter().copied());
        }
        if !self.years.is_empty() {
            patch = patch.years(Some(self.years.iter().copied()));
        }
        if !self.months.is_empty() {
            patch = patch.months(Some(self.months.iter().copied()));
        }
        if self.music {
            patch = patch.content_type(ContentType::Music);
        }
        patch
    }
}

#[derive(Args)]
pub struct StatsArgs {
    /// yearly, monthly, yearly-membership, membership, collab or topic.
    pub kind: String,

    /// Channel id.
    pub channel: String,

    /// Year, for monthly, membership and per-year rankings.
    pub year: Option<i32>,
}

impl StatsArgs {
    /// Kind in the `name[:year]` form `StatsKind` parses
    pub fn kind_with_year(&self) -> String {
        match self.year {
            Some(year) => format!("{}:{}", self.kind, year),
            None => self.kind.clone(),
        }
    }
}

#[derive(Subcommand)]
pub enum SyncCommand {
    /// Show sync progress.
    Status,

    /// Start a sync.
    Start {
        /// Re-sync every video instead of only new ones.
        #[arg(long)]
        full: bool,
    },

    /// Cancel the running sync.
    Cancel,
}
