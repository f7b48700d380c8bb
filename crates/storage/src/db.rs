use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{self, SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::info;

use crate::StoreError;

const SCHEMA: &str = include_str!("../../../sql/schema.sql");

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Opens (creating if needed) `{data_folder}/sqlitedata/bot.db`.
    pub async fn open(data_folder: &str) -> Result<Self, StoreError> {
        let db_path = format!("{}/sqlitedata", data_folder);
        std::fs::create_dir_all(&db_path)?;
        let db_filename = format!("{}/bot.db", db_path);

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_filename))?
            .create_if_missing(true)
            .journal_mode(sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30))
            .statement_cache_capacity(100);

        let pool = SqlitePool::connect_with(options).await?;
        Self::migrate(&pool).await?;
        info!("Opened database {}", db_filename);
        Ok(Self { pool })
    }

    /// Private in-memory database on a single connection that never expires;
    /// a fresh connection would see an empty database.
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::migrate(&pool).await?;
        Ok(Self { pool })
    }

    async fn migrate(pool: &SqlitePool) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
