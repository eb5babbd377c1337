//! Database module - SQLx with SQLite

use crate::error::{Error, Result};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::PathBuf;

/// Environment variable overriding the database file
pub const DB_PATH_ENV: &str = "CHATQUOTA_DB_PATH";

/// Environment variable overriding the config file
pub const CONFIG_PATH_ENV: &str = "CHATQUOTA_CONFIG";

/// Database state
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    /// Create a new database connection with default path
    pub async fn new() -> Result<Self> {
        let db_path = get_db_path()?;
        Self::open(db_path).await
    }

    /// Create a new database connection with a specific path
    pub async fn open(db_path: PathBuf) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let db_url = format!("sqlite:{}?mode=rwc", db_path.display());
        log::info!("Connecting to database: {}", db_path.display());

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;

        Ok(db)
    }

    /// Run database migrations
    async fn run_migrations(&self) -> Result<()> {
        log::info!("Running database migrations...");

        // One row per observed model name; instants are epoch milliseconds
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS usage_records (
                model TEXT PRIMARY KEY,
                count INTEGER NOT NULL DEFAULT 0,
                window_start INTEGER,
                window_end INTEGER,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS preferences (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_usage_records_end ON usage_records(window_end)")
            .execute(&self.pool)
            .await?;

        log::info!("Database migrations completed");
        Ok(())
    }
}

fn project_dirs() -> Result<directories::ProjectDirs> {
    directories::ProjectDirs::from("com", "chatquota", "ChatQuota")
        .ok_or_else(|| Error::config("Could not determine project directories"))
}

/// Get database file path
///
/// Priority: CHATQUOTA_DB_PATH env var > default app data directory
pub fn get_db_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(DB_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }

    Ok(project_dirs()?.data_dir().join("chatquota.db"))
}

/// Get config file path
///
/// Priority: CHATQUOTA_CONFIG env var > default app config directory
pub fn get_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
        return Ok(PathBuf::from(path));
    }

    Ok(project_dirs()?.config_dir().join("config.json"))
}
