//! Quota tracking module
//!
//! Client-side estimate of per-model chat usage against the plan's message
//! caps. Counts come from sent messages; windows come from limit banners,
//! manual overrides and the clock.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ banner / matcher / plans                                │
//! │   - parse_banner() -> Signal                            │
//! │   - resolve(model, table) -> QuotaDescriptor            │
//! └─────────────────────────────────────────────────────────┘
//!          │
//!          ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │ Reconciler (engine + period)                            │
//! │   - apply_signal() / roll_forward() / expire()          │
//! │   - record_usage() / fresh()                            │
//! └─────────────────────────────────────────────────────────┘
//!          │
//!          ▼
//! ┌─────────────────────────────────────────────────────────┐
//! │ UsageTracker (single owner)  ◀── SweepScheduler         │
//! │   - TrackerRequest over mpsc, RecordsChanged broadcast  │
//! └─────────────────────────────────────────────────────────┘
//!          │
//!     ┌────┴────┐
//!     ▼         ▼
//! ┌──────┐  ┌──────┐
//! │SQLite│  │Memory│   trait CounterStore
//! └──────┘  └──────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use chatquota_core::services::quota::{SqliteCounterStore, UsageTracker};
//!
//! let store = Arc::new(SqliteCounterStore::new(db.pool.clone()));
//! let tracker = UsageTracker::load(store, config, chrono::Local).await?;
//! let (handle, _task) = tracker.spawn();
//!
//! handle.model_displayed("o3").await?;
//! handle.api_call_completed(None).await?;
//! let view = handle.usage_or_unknown("o3").await;
//! ```

pub mod banner;
pub mod context;
pub mod counter;
pub mod engine;
pub mod matcher;
pub mod period;
pub mod plans;
pub mod store;
pub mod timer;
pub mod tracker;
pub mod types;

// Re-export main types
pub use types::{
    AlertLevel, PeriodUnit, PlanId, QuotaDescriptor, Signal, StatedWindow, UsageRecord, UsageView,
};

pub use plans::{limits_for, LimitEntry, LimitTable};

pub use context::{model_key, QuotaContext};

pub use engine::{Reconciler, RecordUpdate};

// Re-export store trait and error
pub use counter::{CounterStore, MemoryCounterStore, QuotaError, UsageRecords};

pub use store::{SqliteCounterStore, StoredUsageRecord};

pub use tracker::{
    system_clock, Clock, RecordsChanged, SweepKind, SweepReport, TrackerHandle, TrackerRequest,
    UsageTracker,
};

// Re-export timer types
pub use timer::{
    create_shared_state, SharedSweepState, SweepConfig, SweepScheduler, SweepState, SweepStatus,
    DEFAULT_FULL_SWEEP_EVERY, DEFAULT_TICK_SECS,
};
