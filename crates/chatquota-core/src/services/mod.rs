//! Services module

pub mod quota;

pub use quota::{
    CounterStore, MemoryCounterStore, QuotaError, Reconciler, SqliteCounterStore, SweepKind,
    SweepScheduler, TrackerHandle, UsageTracker,
};
