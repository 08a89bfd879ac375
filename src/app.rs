use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};
use tracing::{debug, error, info, warn};

use taskqueue_api::{create_app, AppState};
use taskqueue_core::config::AppConfig;
use taskqueue_core::{
    models::PoolEvent, DefaultErrorClassifier, ExecutorRegistry, LifecycleEvent, NotificationSink,
};
use taskqueue_dispatcher::TaskScheduler;
use taskqueue_infrastructure::{
    create_ledger_store, install_prometheus_recorder, BroadcastNotificationSink, MetricsCollector,
    TracingNotificationSink,
};

use crate::shutdown::ShutdownManager;

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 调度器与API服务器
    All,
    /// 仅运行调度器
    Scheduler,
}

impl std::str::FromStr for AppMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "all" => Ok(AppMode::All),
            "scheduler" => Ok(AppMode::Scheduler),
            other => Err(anyhow::anyhow!("不支持的运行模式: {other}")),
        }
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    scheduler: Arc<TaskScheduler>,
    events: BroadcastNotificationSink,
    metrics: MetricsCollector,
    prometheus: Option<PrometheusHandle>,
}

impl Application {
    /// 创建新的应用实例
    pub async fn new(config: AppConfig, mode: AppMode, executors: ExecutorRegistry) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);
        config.validate().context("配置校验失败")?;

        let store = create_ledger_store(&config.ledger)
            .await
            .context("创建账本存储失败")?;

        let events = BroadcastNotificationSink::default();
        let sinks: Vec<Arc<dyn NotificationSink>> =
            vec![Arc::new(TracingNotificationSink), Arc::new(events.clone())];

        let prometheus = if config.observability.metrics_enabled {
            Some(install_prometheus_recorder()?)
        } else {
            None
        };

        let scheduler = Arc::new(TaskScheduler::new(
            config.clone(),
            store,
            executors,
            sinks,
            Arc::new(DefaultErrorClassifier),
        ));

        Ok(Self {
            config,
            mode,
            scheduler,
            events,
            metrics: MetricsCollector::new(),
            prometheus,
        })
    }

    pub fn scheduler(&self) -> &Arc<TaskScheduler> {
        &self.scheduler
    }

    /// 运行直到收到关闭信号，然后停止所有组件
    pub async fn run(&self, shutdown: &ShutdownManager) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);
        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        // 先订阅事件，再启动调度器，保证初始Worker的启动事件也被计数
        if self.config.observability.metrics_enabled {
            handles.push(tokio::spawn(run_metrics_loop(
                Arc::clone(&self.scheduler),
                self.metrics,
                self.events.subscribe(),
                self.scheduler.pool().subscribe_events(),
                Duration::from_secs(self.config.observability.metrics_interval_seconds),
                shutdown.subscribe().await,
            )));
        }

        self.scheduler.start(shutdown.sender()).await;

        if self.mode == AppMode::All && self.config.api.enabled {
            handles.push(self.start_api(shutdown.subscribe().await).await?);
        }

        let mut shutdown_rx = shutdown.subscribe().await;
        let _ = shutdown_rx.recv().await;
        info!("应用收到关闭信号");

        self.scheduler.shutdown().await;
        for handle in handles {
            if let Err(e) = handle.await {
                error!("后台任务退出异常: {e}");
            }
        }

        info!("应用程序已停止");
        Ok(())
    }

    async fn start_api(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<JoinHandle<()>> {
        let mut state = AppState::new(Arc::clone(&self.scheduler));
        if let Some(handle) = &self.prometheus {
            state = state.with_prometheus(handle.clone());
        }
        let app = create_app(state, self.config.api.cors_enabled);

        let listener = TcpListener::bind(&self.config.api.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", self.config.api.bind_address))?;
        info!("API服务器启动在 http://{}", self.config.api.bind_address);

        Ok(tokio::spawn(async move {
            let result = axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.recv().await;
                })
                .await;
            match result {
                Ok(()) => info!("API服务器已停止"),
                Err(e) => error!("API服务器运行失败: {e}"),
            }
        }))
    }
}

/// 生命周期事件与Worker池事件驱动计数器，定时刷新监控仪表盘
async fn run_metrics_loop(
    scheduler: Arc<TaskScheduler>,
    metrics: MetricsCollector,
    mut events: broadcast::Receiver<LifecycleEvent>,
    mut pool_events: broadcast::Receiver<PoolEvent>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            event = events.recv() => match event {
                Ok(event) => metrics.record_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("指标循环落后，丢失 {} 个生命周期事件", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            event = pool_events.recv() => match event {
                Ok(event) => {
                    debug!("Worker池事件: {:?}", event);
                    metrics.record_pool_event(&event);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("指标循环落后，丢失 {} 个Worker池事件", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = ticker.tick() => {
                metrics.update_snapshot(&scheduler.monitoring_snapshot().await);
            }
        }
    }
    info!("指标循环已停止");
}
