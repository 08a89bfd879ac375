//! 账本查询构建器，根据过滤条件拼接SQL

use taskqueue_core::models::LedgerFilter;

pub(crate) const LEDGER_COLUMNS: &str =
    "task_id, version, from_status, to_status, attempt, delivery, worker_id, reason, recorded_at";

pub struct LedgerQueryBuilder;

impl LedgerQueryBuilder {
    /// 根据过滤条件构建SELECT语句，时间以微秒时间戳比较
    pub fn build_select_query(filter: &LedgerFilter) -> (String, Vec<LedgerQueryParam>) {
        let mut query = format!("SELECT {LEDGER_COLUMNS} FROM ledger_transitions WHERE 1=1");
        let mut params = Vec::new();

        if let Some(task_id) = filter.task_id {
            query.push_str(" AND task_id = ?");
            query.push_str(&(params.len() + 1).to_string());
            params.push(LedgerQueryParam::String(task_id.to_string()));
        }

        if !filter.statuses.is_empty() {
            let placeholders: Vec<String> = filter
                .statuses
                .iter()
                .map(|status| {
                    params.push(LedgerQueryParam::String(status.as_str().to_string()));
                    format!("?{}", params.len())
                })
                .collect();
            query.push_str(&format!(" AND to_status IN ({})", placeholders.join(", ")));
        }

        if let Some(since) = filter.since {
            query.push_str(" AND recorded_at >= ?");
            query.push_str(&(params.len() + 1).to_string());
            params.push(LedgerQueryParam::Int64(since.timestamp_micros()));
        }

        if let Some(until) = filter.until {
            query.push_str(" AND recorded_at <= ?");
            query.push_str(&(params.len() + 1).to_string());
            params.push(LedgerQueryParam::Int64(until.timestamp_micros()));
        }

        query.push_str(" ORDER BY recorded_at ASC, id ASC");

        if let Some(limit) = filter.limit {
            query.push_str(" LIMIT ?");
            query.push_str(&(params.len() + 1).to_string());
            params.push(LedgerQueryParam::Int64(limit as i64));
        }

        (query, params)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LedgerQueryParam {
    String(String),
    Int64(i64),
}
