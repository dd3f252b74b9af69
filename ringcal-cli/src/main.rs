mod commands;
mod render;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use ringcal_core::{AccountId, RingcalConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ringcal")]
#[command(about = "Inspect ringcal call-history calendars")]
struct Cli {
    /// Read calendars from this directory instead of the configured one
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the events of an account, oldest first
    List {
        account: String,

        /// Only events shared with this URI (e.g. ring:...)
        #[arg(long)]
        peer: Option<String>,

        /// Print events as JSON
        #[arg(long)]
        json: bool,
    },
    /// Parse a calendar file and report what would be dropped
    Check {
        file: PathBuf,

        /// Stop at the first parse error
        #[arg(long)]
        strict: bool,
    },
    /// Show load statistics and garbage counters of an account's calendar
    Stats { account: String },
}

// Single-threaded so nothing a load schedules runs behind the command's back.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into()))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::List { account, peer, json } => {
            let config = load_config(cli.data_dir)?;
            commands::list::run(&config, &AccountId::from(account), peer.as_deref(), json).await
        }
        Commands::Check { file, strict } => commands::check::run(&file, strict),
        Commands::Stats { account } => {
            let config = load_config(cli.data_dir)?;
            commands::stats::run(&config, &AccountId::from(account)).await
        }
    }
}

fn load_config(data_dir: Option<PathBuf>) -> Result<RingcalConfig> {
    let mut config = RingcalConfig::load()?;
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    Ok(config)
}
