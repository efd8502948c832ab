mod cli;

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use holodash::app::{Stream, ViewStatePatch};
use holodash::config::Config;
use holodash::poller::Visibility;
use holodash::service::{StatsKind, StatsQuery};
use holodash::{Dashboard, Settled};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Command, ListArgs, StatsArgs, SyncCommand};

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn settled<T>(outcome: Settled<T>) -> Result<T> {
    match outcome {
        Settled::Fresh(value) => Ok(value),
        Settled::Failed(e) => Err(anyhow!("{:#}", e)),
        Settled::Superseded => Err(anyhow!("Request was superseded")),
    }
}

async fn cmd_list(dashboard: &Dashboard, stream: Stream, args: &ListArgs) -> Result<()> {
    dashboard.update(args.patch(stream));

    tracing::debug!("Query: {}", dashboard.query(stream));
    let page = settled(dashboard.load(stream).await)?;
    print_json(&page)
}

async fn cmd_stats(dashboard: &Dashboard, args: &StatsArgs) -> Result<()> {
    let kind: StatsKind = args.kind_with_year().parse()?;
    let query = StatsQuery::new(args.channel.as_str(), kind);
    let stats = settled(dashboard.load_stats(query).await)?;
    print_json(&stats)
}

async fn cmd_sync(dashboard: &Dashboard, command: &SyncCommand) -> Result<()> {
    match command {
        SyncCommand::Status => print_json(&dashboard.refresh_sync_status().await?),
        SyncCommand::Start { full } => print_json(&dashboard.trigger_sync(*full).await?),
        SyncCommand::Cancel => {
            dashboard.cancel_sync().await?;
            print_json(&serde_json::json!({ "ok": true }))
        }
    }
}

async fn cmd_watch(dashboard: Arc<Dashboard>, channel: Option<&str>) -> Result<()> {
    let mut patch = ViewStatePatch::default().view(Stream::Live.into());
    if let Some(channel) = channel {
        patch = patch.collection(Some(channel));
    }
    dashboard.update(patch);

    if let Err(e) = dashboard.ensure_initial_sync().await {
        tracing::warn!("Initial sync failed: {:#}", e);
    }

    let visibility = Visibility::default();
    let _pollers = dashboard.start_polling(&visibility);
    tracing::info!(
        "Watching {} every {}s, press Ctrl-C to stop",
        dashboard.config().api.base_url,
        dashboard.config().polling.live_refresh_secs
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    print_json(&dashboard.cache_stats())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("holodash=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    let dashboard = Arc::new(Dashboard::from_config(config)?);

    match &cli.command {
        Command::Live(args) => cmd_list(&dashboard, Stream::Live, args).await,
        Command::Archive(args) => cmd_list(&dashboard, Stream::Archive, args).await,
        Command::Clips(args) => cmd_list(&dashboard, Stream::Clips, args).await,
        Command::Stats(args) => cmd_stats(&dashboard, args).await,
        Command::Sync(command) => cmd_sync(&dashboard, command).await,
        Command::Watch { channel } => cmd_watch(Arc::clone(&dashboard), channel.as_deref()).await,
    }
}
