use axum::{
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

use taskqueue_dispatcher::TaskScheduler;
use taskqueue_infrastructure::MetricsCollector;

use crate::handlers::{
    dead_letters::{discard_dead_letter, get_dead_letter, list_dead_letters, replay_dead_letter},
    health::health_check,
    ledger::query_ledger,
    metrics::prometheus_metrics,
    monitoring::{get_monitoring, list_workers},
    tasks::{cancel_task, get_task, submit_task},
};

/// API应用状态
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Arc<TaskScheduler>,
    pub metrics: MetricsCollector,
    /// 未安装Prometheus记录器时为 None
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(scheduler: Arc<TaskScheduler>) -> Self {
        Self {
            scheduler,
            metrics: MetricsCollector::new(),
            prometheus: None,
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}

/// 创建API路由
pub fn create_routes(state: AppState) -> Router {
    Router::new()
        // 健康检查与指标
        .route("/health", get(health_check))
        .route("/metrics", get(prometheus_metrics))
        // 任务
        .route("/api/tasks", post(submit_task))
        .route("/api/tasks/{id}", get(get_task))
        .route("/api/tasks/{id}/cancel", post(cancel_task))
        // 账本与监控
        .route("/api/ledger", get(query_ledger))
        .route("/api/monitoring", get(get_monitoring))
        .route("/api/workers", get(list_workers))
        // 死信
        .route("/api/dead-letters", get(list_dead_letters))
        .route(
            "/api/dead-letters/{id}",
            get(get_dead_letter).delete(discard_dead_letter),
        )
        .route("/api/dead-letters/{id}/replay", post(replay_dead_letter))
        .with_state(state)
}
