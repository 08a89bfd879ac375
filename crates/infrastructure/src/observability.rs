use anyhow::Result;
use metrics::{counter, gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use taskqueue_core::models::{FailureReason, MonitoringSnapshot, PoolEvent};
use taskqueue_core::traits::LifecycleEvent;
use tracing::info;

/// 安装Prometheus指标记录器，返回的句柄用于渲染 `/metrics` 输出
pub fn install_prometheus_recorder() -> Result<PrometheusHandle> {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Prometheus指标记录器安装失败: {}", e))?;
    info!("Prometheus指标记录器已安装");
    Ok(handle)
}

/// 任务队列指标收集器
///
/// 计数器由生命周期事件与Worker池事件驱动，仪表盘由周期性的监控快照刷新。
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsCollector;

impl MetricsCollector {
    pub fn new() -> Self {
        Self
    }

    pub fn record_task_submitted(&self, tier: u8) {
        counter!("taskqueue_tasks_submitted_total", "tier" => tier.to_string()).increment(1);
    }

    pub fn record_event(&self, event: &LifecycleEvent) {
        match event {
            LifecycleEvent::TaskCompleted {
                tier,
                attempt_count,
                ..
            } => {
                counter!("taskqueue_tasks_completed_total", "tier" => tier.level().to_string())
                    .increment(1);
                if *attempt_count > 0 {
                    counter!("taskqueue_tasks_completed_after_retry_total", "tier" => tier.level().to_string())
                        .increment(1);
                }
            }
            LifecycleEvent::TaskDeadLettered { tier, reason, .. } => {
                counter!(
                    "taskqueue_tasks_dead_lettered_total",
                    "tier" => tier.level().to_string(),
                    "reason" => Self::reason_label(reason)
                )
                .increment(1);
            }
        }
    }

    /// Worker启停、失效与租约撤销计数
    pub fn record_pool_event(&self, event: &PoolEvent) {
        let tier = event.tier().level().to_string();
        let name = match event {
            PoolEvent::WorkerSpawned { .. } => "taskqueue_workers_spawned_total",
            PoolEvent::WorkerTerminated { .. } => "taskqueue_workers_terminated_total",
            PoolEvent::WorkerDeclaredDead { .. } => "taskqueue_workers_declared_dead_total",
            PoolEvent::LeaseRevoked { .. } => "taskqueue_leases_revoked_total",
        };
        counter!(name, "tier" => tier).increment(1);
    }

    /// 用监控快照刷新各层级的仪表盘
    pub fn update_snapshot(&self, snapshot: &MonitoringSnapshot) {
        for tier in &snapshot.tiers {
            let level = tier.tier.level().to_string();
            gauge!("taskqueue_backlog_depth", "tier" => level.clone())
                .set(tier.queue.backlog_depth as f64);
            gauge!("taskqueue_delayed_tasks", "tier" => level.clone())
                .set(tier.queue.delayed_count as f64);
            gauge!("taskqueue_oldest_pending_age_seconds", "tier" => level.clone())
                .set(tier.queue.oldest_pending_age_seconds.unwrap_or(0) as f64);
            gauge!("taskqueue_workers", "tier" => level.clone(), "state" => "idle")
                .set(tier.workers.idle as f64);
            gauge!("taskqueue_workers", "tier" => level.clone(), "state" => "busy")
                .set(tier.workers.busy as f64);
            gauge!("taskqueue_workers", "tier" => level.clone(), "state" => "dead")
                .set(tier.workers.dead as f64);
            gauge!("taskqueue_active_leases", "tier" => level.clone())
                .set(tier.active_leases as f64);
            gauge!("taskqueue_sla_breached", "tier" => level)
                .set(if tier.sla_breached { 1.0 } else { 0.0 });
        }
        gauge!("taskqueue_dead_letter_entries").set(snapshot.dead_letter_count as f64);
    }

    fn reason_label(reason: &FailureReason) -> &'static str {
        match reason {
            FailureReason::RetriesExhausted { .. } => "retries_exhausted",
            FailureReason::Fatal { .. } => "fatal",
            FailureReason::RepeatedTimeouts { .. } => "repeated_timeouts",
            FailureReason::Cancelled => "cancelled",
        }
    }
}
