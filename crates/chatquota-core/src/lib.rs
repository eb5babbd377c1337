//! # chatquota-core
//!
//! Core logic for ChatQuota - shared by the CLI and any embedding host.
//!
//! This crate provides:
//! - Database operations (`db` module)
//! - Tracker configuration (`models` module)
//! - Quota tracking and reconciliation (`services::quota`)
//! - Bounded retry (`utils` module)
//! - Unified error handling (`error` module)

pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

// Re-exports for convenience
pub use db::{get_config_path, get_db_path, Database};
pub use error::{Error, Result};
pub use models::TrackerConfig;
pub use utils::{retry_with_backoff, RetryError, RetryPolicy};

// Re-export commonly used types from services
pub use services::quota::{
    limits_for, AlertLevel, CounterStore, LimitTable, MemoryCounterStore, PeriodUnit, PlanId,
    QuotaDescriptor, QuotaError, Reconciler, RecordUpdate, RecordsChanged, Signal,
    SqliteCounterStore, SweepConfig, SweepKind, SweepReport, SweepScheduler, SweepStatus,
    TrackerHandle, UsageRecord, UsageRecords, UsageTracker, UsageView,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Returns the library version
pub fn version() -> &'static str {
    VERSION
}
