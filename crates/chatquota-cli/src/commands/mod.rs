//! CLI commands module
//!
//! Contains all CLI command implementations.

pub mod config;
pub mod plan;
pub mod record;
pub mod status;
pub mod sweep;

use std::sync::Arc;

use anyhow::Result;
use chatquota_core::services::quota::{SqliteCounterStore, UsageTracker};
use chatquota_core::{Database, TrackerConfig};
use chrono::{Local, TimeZone};

use crate::output::OutputFormat;

/// Shared context for all commands
pub struct Context {
    pub db: Database,
    pub tracker: UsageTracker<Local>,
    pub format: OutputFormat,
    pub quiet: bool,
}

impl Context {
    pub async fn load(
        db: Database,
        config: TrackerConfig,
        format: OutputFormat,
        quiet: bool,
    ) -> Result<Self> {
        let store = Arc::new(SqliteCounterStore::new(db.pool.clone()));
        let tracker = UsageTracker::load(store, config, Local).await?;
        Ok(Self {
            db,
            tracker,
            format,
            quiet,
        })
    }
}

/// Local time for an epoch-millisecond instant, `-` when absent
pub fn format_instant(ms: Option<i64>) -> String {
    ms.and_then(|ms| Local.timestamp_millis_opt(ms).single())
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".to_string())
}
