use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tabsync_storage::ApiClient;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use config::AppConfig;

#[derive(Debug, Parser)]
#[command(name = "tabsync", version, about = "Sync bank transactions and inspect tab rules")]
struct Cli {
    /// Path to config.toml. Defaults to the platform config directory.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Pull new transactions. Syncs every linked item unless --item is given.
    Sync {
        #[arg(long = "item", value_name = "ID")]
        items: Vec<String>,
    },
    /// Watch a sync running on the backend until it finishes.
    Poll { item: String },
    /// Create a link token, for a new connection or to repair --item.
    Link {
        #[arg(long, value_name = "ID")]
        item: Option<String>,
    },
    /// Exchange a public token and sync the linked item.
    Exchange {
        public_token: String,
        #[arg(long, value_name = "ID")]
        item: Option<String>,
    },
    /// List rules, or the rules that apply to --tab in resolution order.
    Rules {
        #[arg(long, value_name = "ID")]
        tab: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref())?;
    let client = Arc::new(ApiClient::new(&config.api, config.retry)?);

    let output = match cli.command {
        Commands::Sync { items } => commands::sync(client, &config, items).await?,
        Commands::Poll { item } => commands::poll(client, &config, item).await?,
        Commands::Link { item } => commands::link(client, item).await?,
        Commands::Exchange { public_token, item } => {
            commands::exchange(client, &config, public_token, item).await?
        }
        Commands::Rules { tab } => commands::rules(client, tab).await?,
    };

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(())
}
