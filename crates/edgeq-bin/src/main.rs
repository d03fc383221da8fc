//! EdgeQ - durable edge-side publish queue.

mod app;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use edgeq_config_and_utils::{init_logging, Config, Paths};

/// EdgeQ command-line interface.
#[derive(Parser)]
#[command(name = "edgeq")]
#[command(about = "Durable publish queue for intermittently connected devices")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// Base directory for runtime files (config, store, logs). Defaults to ~/.edgeq
    #[arg(long, global = true)]
    base_dir: Option<PathBuf>,

    /// Config file to use instead of <base>/config.json
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect to the broker and deliver until interrupted
    Run,
    /// Enqueue one message locally, without touching the network
    Push {
        #[arg(short, long)]
        topic: String,
        /// Message body; empty when omitted
        #[arg(short, long, default_value = "")]
        payload: String,
    },
    /// Print stored messages
    List {
        /// Only messages not yet delivered
        #[arg(long)]
        pending: bool,
    },
    /// Print queue counters
    Stats,
    /// Delete messages past the retention window
    Purge {
        /// Age threshold; defaults to the configured retention window
        #[arg(long)]
        older_than_seconds: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let paths = match cli.base_dir {
        Some(base) => Paths::with_base_dir(base),
        None => Paths::new()?,
    };
    let mut config = Config::load(&paths, cli.config.as_deref())?;
    if let Some(level) = cli.log_level {
        config.log_level = level;
    }

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => {
            paths.ensure_dirs()?;
            init_logging(&config.log_level, Some(paths.log_file()));
            app::run_queue(config, paths).await?;
        }
        Commands::Push { topic, payload } => {
            let store = app::open_local(&config, &paths)?;
            app::push(&store, &topic, payload.as_bytes())?;
        }
        Commands::List { pending } => {
            let store = app::open_local(&config, &paths)?;
            app::list(&store, pending)?;
        }
        Commands::Stats => {
            let store = app::open_local(&config, &paths)?;
            app::stats(&store)?;
        }
        Commands::Purge { older_than_seconds } => {
            let store = app::open_local(&config, &paths)?;
            app::purge(&store, &config, older_than_seconds)?;
        }
    }

    Ok(())
}
