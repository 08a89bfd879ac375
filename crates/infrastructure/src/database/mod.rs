pub mod memory;
pub mod sqlite;

use std::sync::Arc;

use taskqueue_core::config::{LedgerBackend, LedgerConfig};
use taskqueue_core::traits::LedgerStore;
use taskqueue_core::SchedulerResult;
use tracing::info;

pub use memory::InMemoryLedgerStore;
pub use sqlite::{DatabaseManager, SqliteLedgerStore};

/// 按配置创建账本存储
pub async fn create_ledger_store(config: &LedgerConfig) -> SchedulerResult<Arc<dyn LedgerStore>> {
    match config.backend {
        LedgerBackend::Memory => {
            info!("使用内存账本存储");
            Ok(Arc::new(InMemoryLedgerStore::new()))
        }
        LedgerBackend::Sqlite => {
            info!("使用SQLite账本存储: {}", config.url);
            let manager = DatabaseManager::new(config).await?;
            let store = SqliteLedgerStore::new(manager.pool().clone());
            store.migrate().await?;
            Ok(Arc::new(store))
        }
    }
}
