use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use railtime_core::AppError;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use tokio::sync::Mutex;

use crate::config::DatabaseConfig;
use crate::repository::StationRepository;

/// Central database facade: owns the connection pool and the shared write
/// lock, creates the schema, and vends repository instances.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl Database {
    /// Open (creating if missing) the SQLite database described by `config`.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, AppError> {
        let options = SqliteConnectOptions::from_str(&config.url)
            .map_err(|e| AppError::Config(format!("Invalid database URL '{}': {e}", config.url)))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await
            .map_err(|e| AppError::Persistence(format!("Failed to connect: {e}")))?;

        tracing::debug!(url = %config.url, "Connected to database");
        Ok(Self::from_pool(pool))
    }

    /// Create a `Database` from an existing pool (useful for testing).
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Connect and make sure the schema exists.
    pub async fn open(config: &DatabaseConfig) -> Result<Self, AppError> {
        let db = Self::connect(config).await?;
        db.station_repo().ensure_schema().await?;
        Ok(db)
    }

    /// Get a [`StationRepository`] backed by this pool. All repositories
    /// from one `Database` share a single write lock.
    pub fn station_repo(&self) -> StationRepository {
        StationRepository::with_write_lock(self.pool.clone(), Arc::clone(&self.write_lock))
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
