//! Config commands
//!
//! Inspect and initialize the tracker configuration file.

use std::path::Path;

use anyhow::{Context as _, Result};
use chatquota_core::db::DB_PATH_ENV;
use chatquota_core::TrackerConfig;
use clap::Subcommand;
use serde::Serialize;
use tabled::Tabled;

use crate::output::{print_info, print_json, print_output, print_success, OutputFormat};

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration
    Show,

    /// Print the config file and database paths
    Path,

    /// Write a config file with default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Config row for table display
#[derive(Debug, Serialize, Tabled)]
pub struct ConfigRow {
    #[tabled(rename = "Key")]
    pub key: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Source")]
    pub source: String,
}

impl ConfigRow {
    fn new(key: &str, value: impl ToString, source: &str) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            source: source.to_string(),
        }
    }
}

pub fn execute(path: &Path, format: OutputFormat, quiet: bool, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => show_config(path, format),
        ConfigAction::Path => show_paths(path, format),
        ConfigAction::Init { force } => init_config(path, force, quiet),
    }
}

fn show_config(path: &Path, format: OutputFormat) -> Result<()> {
    let config = TrackerConfig::load(path)?;
    match format {
        OutputFormat::Json => print_json(&config),
        OutputFormat::Table => print_output(&config_rows(&config, path.exists()), format),
    }
}

fn config_rows(config: &TrackerConfig, from_file: bool) -> Vec<ConfigRow> {
    let source = if from_file { "file" } else { "default" };
    let overrides = if config.limit_overrides.is_empty() {
        "-".to_string()
    } else {
        config
            .limit_overrides
            .keys()
            .cloned()
            .collect::<Vec<_>>()
            .join(", ")
    };

    vec![
        ConfigRow::new("default_plan", &config.default_plan, source),
        ConfigRow::new("tick_secs", config.tick_secs, source),
        ConfigRow::new("full_sweep_every", config.full_sweep_every, source),
        ConfigRow::new("retry_attempts", config.retry_attempts, source),
        ConfigRow::new("retry_delay_ms", config.retry_delay_ms, source),
        ConfigRow::new("request_timeout_ms", config.request_timeout_ms, source),
        ConfigRow::new("warning_threshold", config.warning_threshold, source),
        ConfigRow::new("critical_threshold", config.critical_threshold, source),
        ConfigRow::new("limit_overrides", overrides, source),
    ]
}

fn show_paths(path: &Path, format: OutputFormat) -> Result<()> {
    let db_path = chatquota_core::get_db_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "Unknown".to_string());
    let db_source = if std::env::var(DB_PATH_ENV).is_ok() {
        "env"
    } else {
        "default"
    };

    let rows = vec![
        ConfigRow::new("config", path.display(), "resolved"),
        ConfigRow::new("database", db_path, db_source),
    ];
    print_output(&rows, format)
}

fn init_config(path: &Path, force: bool, quiet: bool) -> Result<()> {
    if path.exists() && !force {
        print_info(
            &format!("Config already exists at {} (use --force to overwrite)", path.display()),
            quiet,
        );
        return Ok(());
    }

    TrackerConfig::default()
        .save(path)
        .with_context(|| format!("Failed to write {}", path.display()))?;
    print_success(&format!("Wrote default config to {}", path.display()), quiet);
    Ok(())
}
