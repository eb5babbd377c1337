//! ChatQuota CLI - per-model chat usage tracking
//!
//! A command-line interface for recording sent messages and limit banners,
//! inspecting remaining quota, and running the window sweeps.

mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "chatquota")]
#[command(author, version, about = "Per-model chat usage and quota window tracker", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format: table (default) or json
    #[arg(long, global = true, default_value = "table")]
    format: output::OutputFormat,

    /// Suppress progress messages
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Override database path (or set CHATQUOTA_DB_PATH env var)
    #[arg(long, env = "CHATQUOTA_DB_PATH", global = true)]
    db: Option<String>,

    /// Override config file path (or set CHATQUOTA_CONFIG env var)
    #[arg(long, env = "CHATQUOTA_CONFIG", global = true)]
    config: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show usage for one model or all tracked models
    Status {
        /// Model name (e.g. o3, gpt-4o)
        model: Option<String>,
    },

    /// Show or change the subscription plan
    Plan {
        #[command(subcommand)]
        action: commands::plan::PlanAction,
    },

    /// Feed banner text seen in the chat UI
    Banner {
        /// Banner text
        text: String,

        /// Model shown in the UI, used when the banner names none
        #[arg(long)]
        model: Option<String>,
    },

    /// Count sent messages for a model
    Used {
        /// Model name
        model: String,

        /// Number of messages to count
        #[arg(long, short = 'n', default_value_t = 1)]
        times: u32,
    },

    /// Set a model's count and reset time by hand
    Override {
        /// Model name
        model: String,

        /// Messages already used in the current window
        count: u32,

        /// Reset time: RFC 3339 or relative (+3h, +45m, +2d)
        until: String,
    },

    /// Zero every counter and start fresh windows now
    Reset,

    /// Run one reconciliation sweep
    Sweep {
        /// Roll stale windows forward as well as expiring ended ones
        #[arg(long)]
        full: bool,
    },

    /// Run scheduled sweeps and print changes until Ctrl-C
    Watch,

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: commands::config::ConfigAction,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();

    // Set up database path if provided
    if let Some(db_path) = &cli.db {
        std::env::set_var(chatquota_core::db::DB_PATH_ENV, db_path);
    }

    let config_path = match &cli.config {
        Some(path) => PathBuf::from(path),
        None => chatquota_core::get_config_path()?,
    };

    // Config commands never touch the database
    let command = match cli.command {
        Commands::Config { action } => {
            return commands::config::execute(&config_path, cli.format, cli.quiet, action);
        }
        other => other,
    };

    let db = chatquota_core::Database::new().await?;
    let config = chatquota_core::TrackerConfig::load(&config_path)?;
    let mut ctx = commands::Context::load(db, config, cli.format, cli.quiet).await?;

    match command {
        Commands::Status { model } => commands::status::execute(&ctx, model).await,
        Commands::Plan { action } => commands::plan::execute(&mut ctx, action).await,
        Commands::Banner { text, model } => commands::record::banner(&ctx, text, model).await,
        Commands::Used { model, times } => commands::record::used(&ctx, model, times).await,
        Commands::Override {
            model,
            count,
            until,
        } => commands::record::manual_override(&ctx, model, count, until).await,
        Commands::Reset => commands::record::reset(&ctx).await,
        Commands::Sweep { full } => commands::sweep::execute(&ctx, full).await,
        Commands::Watch => commands::sweep::watch(ctx).await,
        // handled above
        Commands::Config { .. } => Ok(()),
    }
}
