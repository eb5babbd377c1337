//! Usage record storage layer
//!
//! Persists usage records and the selected plan to SQLite. Tables are
//! created by `Database::run_migrations`.

use async_trait::async_trait;
use sqlx::{FromRow, SqlitePool};

use super::counter::{CounterStore, QuotaError, UsageRecords};
use super::types::{PlanId, UsageRecord};

/// Preference key holding the selected plan
const PLAN_KEY: &str = "plan";

// ============================================================================
// Database Row Types
// ============================================================================

/// Row in the `usage_records` table
#[derive(Debug, Clone, FromRow)]
pub struct StoredUsageRecord {
    /// Raw model name as observed
    pub model: String,
    pub count: i64,
    /// Epoch milliseconds
    pub window_start: Option<i64>,
    /// Epoch milliseconds
    pub window_end: Option<i64>,
    /// When the row was last written (SQLite datetime)
    pub updated_at: String,
}

impl StoredUsageRecord {
    /// Convert database row to UsageRecord
    ///
    /// Negative counts are clamped to zero and logged.
    pub fn to_usage_record(&self) -> UsageRecord {
        let count = u32::try_from(self.count).unwrap_or_else(|_| {
            log::warn!(
                "[quota:store] Count {} for '{}' out of range, clamping",
                self.count,
                self.model
            );
            if self.count < 0 { 0 } else { u32::MAX }
        });
        UsageRecord {
            count,
            window_start: self.window_start,
            window_end: self.window_end,
        }
    }
}

// ============================================================================
// SqliteCounterStore
// ============================================================================

/// SQLite-backed [`CounterStore`]
#[derive(Clone)]
pub struct SqliteCounterStore {
    pool: SqlitePool,
}

impl SqliteCounterStore {
    /// Create a new store with the given database pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Delete every usage record, returning the number removed
    pub async fn clear(&self) -> Result<u64, QuotaError> {
        let result = sqlx::query("DELETE FROM usage_records")
            .execute(&self.pool)
            .await?;
        log::info!("[quota:store] Cleared {} usage records", result.rows_affected());
        Ok(result.rows_affected())
    }
}

async fn upsert<'e, E>(executor: E, model: &str, record: &UsageRecord) -> Result<(), sqlx::Error>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    sqlx::query(
        r#"
        INSERT INTO usage_records (model, count, window_start, window_end, updated_at)
        VALUES (?, ?, ?, ?, datetime('now'))
        ON CONFLICT(model) DO UPDATE SET
            count = excluded.count,
            window_start = excluded.window_start,
            window_end = excluded.window_end,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(model)
    .bind(record.count as i64)
    .bind(record.window_start)
    .bind(record.window_end)
    .execute(executor)
    .await?;
    Ok(())
}

#[async_trait]
impl CounterStore for SqliteCounterStore {
    fn store_id(&self) -> &'static str {
        "sqlite"
    }

    async fn get_all_records(&self) -> Result<UsageRecords, QuotaError> {
        let rows = sqlx::query_as::<_, StoredUsageRecord>(
            r#"
            SELECT model, count, window_start, window_end, updated_at
            FROM usage_records
            ORDER BY model ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        log::debug!("[quota:store] Loaded {} usage records", rows.len());

        Ok(rows
            .iter()
            .map(|row| (row.model.clone(), row.to_usage_record()))
            .collect())
    }

    async fn get_record(&self, model: &str) -> Result<Option<UsageRecord>, QuotaError> {
        let row = sqlx::query_as::<_, StoredUsageRecord>(
            r#"
            SELECT model, count, window_start, window_end, updated_at
            FROM usage_records
            WHERE model = ?
            "#,
        )
        .bind(model)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.to_usage_record()))
    }

    async fn put_record(&self, model: &str, record: &UsageRecord) -> Result<(), QuotaError> {
        upsert(&self.pool, model, record).await?;
        log::debug!("[quota:store] Saved record for '{}' (count {})", model, record.count);
        Ok(())
    }

    async fn put_all_records(&self, records: &UsageRecords) -> Result<(), QuotaError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM usage_records")
            .execute(&mut *tx)
            .await?;
        for (model, record) in records {
            upsert(&mut *tx, model, record).await?;
        }

        tx.commit().await?;
        log::debug!("[quota:store] Replaced all records ({} models)", records.len());
        Ok(())
    }

    async fn get_plan(&self) -> Result<Option<PlanId>, QuotaError> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM preferences WHERE key = ?")
                .bind(PLAN_KEY)
                .fetch_optional(&self.pool)
                .await?;
        Ok(value.map(PlanId::from))
    }

    async fn set_plan(&self, plan: &PlanId) -> Result<(), QuotaError> {
        sqlx::query(
            r#"
            INSERT INTO preferences (key, value) VALUES (?, ?)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(PLAN_KEY)
        .bind(plan.to_string())
        .execute(&self.pool)
        .await?;

        log::info!("[quota:store] Plan set to {}", plan);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
