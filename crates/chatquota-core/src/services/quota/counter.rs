//! Counter storage trait and error types
//!
//! Defines the interface every usage-record store implements, plus an
//! in-memory store for tests and ephemeral sessions.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;

use super::types::{PlanId, UsageRecord};

/// All usage records, keyed by raw model name
pub type UsageRecords = BTreeMap<String, UsageRecord>;

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while reconciling or persisting usage records
#[derive(Error, Debug)]
pub enum QuotaError {
    /// The backing store failed
    #[error("Storage error: {0}")]
    Store(String),

    /// The tracker task is gone or dropped the request
    #[error("Usage tracker is not running")]
    ChannelClosed,

    /// The tracker did not reply in time
    #[error("Usage tracker did not reply within {0:?}")]
    Timeout(Duration),

    /// A window instant could not be computed
    #[error("Invalid instant for '{model}': {detail}")]
    InvalidInstant { model: String, detail: String },

    /// A computed window ends before it starts
    #[error("Invalid window for '{model}': {start:?}..{end:?}")]
    InvalidWindow {
        model: String,
        start: Option<i64>,
        end: Option<i64>,
    },

    /// Stored or supplied data could not be parsed
    #[error("Parse error: {0}")]
    ParseError(String),
}

impl QuotaError {
    /// Whether retrying the same request may succeed
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            QuotaError::Store(_) | QuotaError::ChannelClosed | QuotaError::Timeout(_)
        )
    }
}

impl From<sqlx::Error> for QuotaError {
    fn from(err: sqlx::Error) -> Self {
        QuotaError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for QuotaError {
    fn from(err: serde_json::Error) -> Self {
        QuotaError::ParseError(err.to_string())
    }
}

// ============================================================================
// Store Trait
// ============================================================================

/// Persistence for usage records and the selected plan
///
/// Writes replace whole records; the tracker serializes every read-modify-
/// write so implementations need no cross-call locking.
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Short name used in logs
    fn store_id(&self) -> &'static str;

    /// Every stored record
    async fn get_all_records(&self) -> Result<UsageRecords, QuotaError>;

    /// One model's record, if any
    async fn get_record(&self, model: &str) -> Result<Option<UsageRecord>, QuotaError> {
        Ok(self.get_all_records().await?.remove(model))
    }

    /// Insert or replace one model's record
    async fn put_record(&self, model: &str, record: &UsageRecord) -> Result<(), QuotaError>;

    /// Replace the full record set
    async fn put_all_records(&self, records: &UsageRecords) -> Result<(), QuotaError>;

    /// The persisted plan, `None` if never chosen
    async fn get_plan(&self) -> Result<Option<PlanId>, QuotaError>;

    async fn set_plan(&self, plan: &PlanId) -> Result<(), QuotaError>;
}

// ============================================================================
// In-memory Store
// ============================================================================

/// Store that lives only as long as the process
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    records: RwLock<UsageRecords>,
    plan: RwLock<Option<PlanId>>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populated store
    pub fn with_records(records: UsageRecords, plan: Option<PlanId>) -> Self {
        Self {
            records: RwLock::new(records),
            plan: RwLock::new(plan),
        }
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    fn store_id(&self) -> &'static str {
        "memory"
    }

    async fn get_all_records(&self) -> Result<UsageRecords, QuotaError> {
        Ok(self.records.read().await.clone())
    }

    async fn get_record(&self, model: &str) -> Result<Option<UsageRecord>, QuotaError> {
        Ok(self.records.read().await.get(model).copied())
    }

    async fn put_record(&self, model: &str, record: &UsageRecord) -> Result<(), QuotaError> {
        self.records.write().await.insert(model.to_string(), *record);
        Ok(())
    }

    async fn put_all_records(&self, records: &UsageRecords) -> Result<(), QuotaError> {
        *self.records.write().await = records.clone();
        Ok(())
    }

    async fn get_plan(&self) -> Result<Option<PlanId>, QuotaError> {
        Ok(self.plan.read().await.clone())
    }

    async fn set_plan(&self, plan: &PlanId) -> Result<(), QuotaError> {
        *self.plan.write().await = Some(plan.clone());
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
