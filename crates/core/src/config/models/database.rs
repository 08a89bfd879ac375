use serde::{Deserialize, Serialize};

/// 账本存储后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerBackend {
    Memory,
    Sqlite,
}

/// 账本配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: LedgerBackend,
    pub url: String,
    pub max_connections: u32,
    /// 乐观并发冲突时的最大重试次数
    pub max_conflict_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: LedgerBackend::Memory,
            url: "sqlite://taskqueue.db?mode=rwc".to_string(),
            max_connections: 5,
            max_conflict_retries: 3,
        }
    }
}

impl LedgerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.backend == LedgerBackend::Sqlite {
            if self.url.is_empty() {
                return Err(anyhow::anyhow!("账本数据库URL不能为空"));
            }
            if !self.url.starts_with("sqlite:") {
                return Err(anyhow::anyhow!("账本数据库URL必须是SQLite格式"));
            }
            if self.max_connections == 0 {
                return Err(anyhow::anyhow!("最大连接数必须大于0"));
            }
        }
        if self.max_conflict_retries == 0 {
            return Err(anyhow::anyhow!("冲突重试次数必须大于0"));
        }
        Ok(())
    }
}
