use async_trait::async_trait;
use chrono::DateTime;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use taskqueue_core::models::{LedgerFilter, LedgerHead, TaskId, TaskStatus, Transition, WorkerId};
use taskqueue_core::traits::{LedgerAppendError, LedgerStore};
use taskqueue_core::{SchedulerError, SchedulerResult};
use tracing::{debug, instrument};

use super::ledger_query_builder::{LedgerQueryBuilder, LedgerQueryParam};

/// SQLite账本存储
///
/// 每条转换记录一行。`(task_id, version)` 与 `dedup_key` 上的唯一约束
/// 保证即使多个连接并发写入，同一版本也只有一个写入者成功。
pub struct SqliteLedgerStore {
    pool: SqlitePool,
}

impl SqliteLedgerStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 创建账本表与索引
    pub async fn migrate(&self) -> SchedulerResult<()> {
        debug!("运行SQLite账本迁移");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS ledger_transitions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                task_id TEXT NOT NULL,
                version INTEGER NOT NULL,
                from_status TEXT,
                to_status TEXT NOT NULL,
                attempt INTEGER NOT NULL,
                delivery INTEGER NOT NULL,
                worker_id INTEGER,
                reason TEXT,
                dedup_key TEXT NOT NULL UNIQUE,
                recorded_at INTEGER NOT NULL,
                UNIQUE (task_id, version)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_ledger_task_id ON ledger_transitions(task_id)",
            "CREATE INDEX IF NOT EXISTS idx_ledger_recorded_at ON ledger_transitions(recorded_at)",
            "CREATE INDEX IF NOT EXISTS idx_ledger_to_status ON ledger_transitions(to_status)",
        ];
        for index_sql in indexes {
            sqlx::query(index_sql).execute(&self.pool).await?;
        }

        debug!("SQLite账本迁移完成");
        Ok(())
    }

    fn parse_status(value: &str) -> SchedulerResult<TaskStatus> {
        value
            .parse::<TaskStatus>()
            .map_err(SchedulerError::Serialization)
    }

    fn row_to_transition(row: &SqliteRow) -> SchedulerResult<Transition> {
        let task_id: String = row.try_get("task_id")?;
        let task_id = task_id
            .parse::<TaskId>()
            .map_err(|e| SchedulerError::Serialization(format!("无效的任务ID {task_id}: {e}")))?;

        let from_status: Option<String> = row.try_get("from_status")?;
        let to_status: String = row.try_get("to_status")?;
        let worker_id: Option<i64> = row.try_get("worker_id")?;
        let recorded_at: i64 = row.try_get("recorded_at")?;
        let recorded_at = DateTime::from_timestamp_micros(recorded_at).ok_or_else(|| {
            SchedulerError::Serialization(format!("无效的记录时间: {recorded_at}"))
        })?;

        Ok(Transition {
            task_id,
            version: row.try_get::<i64, _>("version")? as u64,
            from: from_status.as_deref().map(Self::parse_status).transpose()?,
            to: Self::parse_status(&to_status)?,
            attempt: row.try_get::<i64, _>("attempt")? as u32,
            delivery: row.try_get::<i64, _>("delivery")? as u32,
            worker_id: worker_id.map(|id| WorkerId::new(id as u64)),
            reason: row.try_get("reason")?,
            recorded_at,
        })
    }

    async fn current_version(
        conn: &mut sqlx::SqliteConnection,
        task_id: &str,
    ) -> SchedulerResult<u64> {
        let version: Option<i64> =
            sqlx::query_scalar("SELECT MAX(version) FROM ledger_transitions WHERE task_id = ?1")
                .bind(task_id)
                .fetch_one(conn)
                .await?;
        Ok(version.unwrap_or(0) as u64)
    }

    async fn dedup_exists(
        conn: &mut sqlx::SqliteConnection,
        dedup_key: &str,
    ) -> SchedulerResult<bool> {
        let row = sqlx::query("SELECT 1 FROM ledger_transitions WHERE dedup_key = ?1")
            .bind(dedup_key)
            .fetch_optional(conn)
            .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl LedgerStore for SqliteLedgerStore {
    async fn head(&self, task_id: TaskId) -> SchedulerResult<Option<LedgerHead>> {
        let row = sqlx::query(
            "SELECT version, to_status FROM ledger_transitions WHERE task_id = ?1 ORDER BY version DESC LIMIT 1",
        )
        .bind(task_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                let status: String = row.try_get("to_status")?;
                Ok(Some(LedgerHead {
                    version: row.try_get::<i64, _>("version")? as u64,
                    status: Self::parse_status(&status)?,
                }))
            }
            None => Ok(None),
        }
    }

    #[instrument(skip(self, transition), fields(
        task_id = %transition.task_id,
        version = transition.version,
        to = %transition.to,
    ))]
    async fn append(&self, transition: &Transition) -> Result<(), LedgerAppendError> {
        let task_id = transition.task_id.to_string();
        let key = transition.dedup_key();

        let mut tx = self.pool.begin().await.map_err(SchedulerError::from)?;

        if Self::dedup_exists(&mut tx, &key).await? {
            return Err(LedgerAppendError::Duplicate { key });
        }

        let current = Self::current_version(&mut tx, &task_id).await?;
        if transition.version != current + 1 {
            return Err(LedgerAppendError::Conflict {
                expected: transition.version,
                actual: current,
            });
        }

        let inserted = sqlx::query(
            r#"
            INSERT INTO ledger_transitions
                (task_id, version, from_status, to_status, attempt, delivery, worker_id, reason, dedup_key, recorded_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&task_id)
        .bind(transition.version as i64)
        .bind(transition.from.map(|s| s.as_str()))
        .bind(transition.to.as_str())
        .bind(transition.attempt as i64)
        .bind(transition.delivery as i64)
        .bind(transition.worker_id.map(|w| w.raw() as i64))
        .bind(transition.reason.as_deref())
        .bind(&key)
        .bind(transition.recorded_at.timestamp_micros())
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            // 另一个连接在本事务读取之后抢先写入了同一版本
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                return Err(LedgerAppendError::Conflict {
                    expected: transition.version,
                    actual: transition.version,
                });
            }
            Err(e) => return Err(SchedulerError::from(e).into()),
        }

        tx.commit().await.map_err(SchedulerError::from)?;
        debug!("账本追加成功: {}", key);
        Ok(())
    }

    async fn contains(&self, dedup_key: &str) -> SchedulerResult<bool> {
        let mut conn = self.pool.acquire().await?;
        Self::dedup_exists(&mut conn, dedup_key).await
    }

    async fn query(&self, filter: &LedgerFilter) -> SchedulerResult<Vec<Transition>> {
        let (sql, params) = LedgerQueryBuilder::build_select_query(filter);

        let mut query = sqlx::query(&sql);
        for param in params {
            query = match param {
                LedgerQueryParam::String(value) => query.bind(value),
                LedgerQueryParam::Int64(value) => query.bind(value),
            };
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_transition).collect()
    }

    fn name(&self) -> &str {
        "sqlite"
    }
}
