pub mod ledger_query_builder;
pub mod sqlite_ledger_store;

pub use ledger_query_builder::{LedgerQueryBuilder, LedgerQueryParam};
pub use sqlite_ledger_store::SqliteLedgerStore;

use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use taskqueue_core::config::LedgerConfig;
use taskqueue_core::SchedulerResult;
use tracing::debug;

/// SQLite连接池管理
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(config: &LedgerConfig) -> SchedulerResult<Self> {
        debug!("连接SQLite账本数据库: {}", config.url);

        let connect_options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(1)
            .acquire_timeout(Duration::from_secs(30))
            .connect_with(connect_options)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
