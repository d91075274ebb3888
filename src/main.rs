//! hostguardd - host security monitoring daemon.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::warn;

mod bus;
mod config;
mod daemon;
mod dedup;
mod event;
mod notifiers;
mod probes;
mod store;
mod watchers;

#[derive(Parser)]
#[command(name = "hostguardd")]
#[command(about = "Lightweight host security monitor", version)]
struct Cli {
    /// Config file path
    #[arg(long, global = true, default_value = config::DEFAULT_CONFIG_PATH)]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the monitoring daemon (default)
    Run,
    /// Show stored security status
    Status,
    /// Send a test notification to all configured channels
    Test,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run(&cli.config).await,
        Commands::Status => status(),
        Commands::Test => test(&cli.config).await,
    }
}

async fn run(config_path: &str) -> Result<()> {
    let cfg = config::Config::load(config_path).context("loading config")?;

    if !nix::unistd::Uid::effective().is_root() {
        warn!("not running as root; packet-filter and some probes will be skipped");
    }

    let daemon = daemon::Daemon::new(cfg).context("initialising daemon")?;
    daemon.run().await
}

fn status() -> Result<()> {
    let db = store::Store::open(store::DEFAULT_DB_PATH).context("opening store")?;

    let events = db.recent(24)?;
    let count = db.count(24)?;
    let last_alert = db.last_alert_time();

    println!("🛡️  Hostguard Status");
    println!("─────────────────────────");
    println!("  Events (24h):  {count}");
    println!("  Last alert:    {last_alert}");
    println!();

    if events.is_empty() {
        println!("  ✅ No events in last 24 hours");
        return Ok(());
    }

    println!("  Recent events:");
    for event in events.iter().take(10) {
        println!(
            "    {} {} {}",
            event.timestamp.format("%H:%M"),
            event.severity.emoji(),
            event.message
        );
    }
    Ok(())
}

async fn test(config_path: &str) -> Result<()> {
    let cfg = config::Config::load(config_path).context("loading config")?;
    let daemon = daemon::Daemon::new(cfg)?;

    println!("🛡️  Sending test notification...");
    daemon.test_notifiers().await?;
    println!("✅ Test notification sent!");
    Ok(())
}
