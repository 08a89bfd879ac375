#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use taskqueue::app::{AppMode, Application};
    use taskqueue::executors::builtin_registry;
    use taskqueue::shutdown::ShutdownManager;
    use taskqueue_core::config::{AppConfig, LedgerBackend};
    use taskqueue_core::{FailureReason, TaskId, TaskStatus};
    use taskqueue_dispatcher::{SubmitRequest, TaskScheduler};
    use taskqueue_testing_utils::{single_tier_config, TestEnv};
    use tempfile::TempDir;

    struct RunningApp {
        scheduler: Arc<TaskScheduler>,
        shutdown: ShutdownManager,
        handle: tokio::task::JoinHandle<()>,
    }

    impl RunningApp {
        async fn start(config: AppConfig) -> Self {
            let app = Application::new(config, AppMode::Scheduler, builtin_registry())
                .await
                .unwrap();
            let scheduler = Arc::clone(app.scheduler());
            let shutdown = ShutdownManager::new();
            let handle = {
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    app.run(&shutdown).await.unwrap();
                })
            };
            Self {
                scheduler,
                shutdown,
                handle,
            }
        }

        async fn stop(self) {
            self.shutdown.shutdown().await;
            tokio::time::timeout(Duration::from_secs(10), self.handle)
                .await
                .unwrap()
                .unwrap();
        }

        async fn wait_for_status(&self, id: TaskId, status: TaskStatus) -> bool {
            let scheduler = Arc::clone(&self.scheduler);
            TestEnv::wait_for(
                || {
                    let scheduler = Arc::clone(&scheduler);
                    async move {
                        scheduler
                            .ledger()
                            .head(id)
                            .await
                            .ok()
                            .flatten()
                            .is_some_and(|head| head.status == status)
                    }
                },
                Duration::from_secs(10),
            )
            .await
        }
    }

    #[tokio::test]
    async fn test_noop_task_completes() {
        let app = RunningApp::start(single_tier_config(2)).await;

        let id = app
            .scheduler
            .submit(SubmitRequest::new("noop", b"{}".to_vec(), 1))
            .await
            .unwrap();
        assert!(app.wait_for_status(id, TaskStatus::Completed).await);

        let history = app.scheduler.task_history(id).await.unwrap();
        let statuses: Vec<_> = history.iter().map(|t| t.to).collect();
        assert_eq!(
            statuses,
            vec![TaskStatus::Pending, TaskStatus::Leased, TaskStatus::Completed]
        );

        app.stop().await;
    }

    #[tokio::test]
    async fn test_unregistered_task_type_rejected() {
        let app = RunningApp::start(single_tier_config(1)).await;
        let result = app
            .scheduler
            .submit(SubmitRequest::new("http", Vec::new(), 1))
            .await;
        assert!(result.is_err());
        app.stop().await;
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_task_retries_then_dead_letters() {
        let mut config = single_tier_config(1);
        config.retry.max_retries = 1;
        let app = RunningApp::start(config).await;

        let id = app
            .scheduler
            .submit(SubmitRequest::new("shell", b"exit 1".to_vec(), 1))
            .await
            .unwrap();
        assert!(app.wait_for_status(id, TaskStatus::DeadLettered).await);

        let entry = app.scheduler.dead_letter(id).await.unwrap();
        assert!(matches!(
            entry.failure_reason,
            FailureReason::RetriesExhausted { .. }
        ));
        assert_eq!(entry.task.attempt_count, 2);

        app.stop().await;
    }

    #[tokio::test]
    async fn test_sqlite_ledger_survives_restart() {
        let dir = TempDir::new().unwrap();
        let url = format!("sqlite://{}?mode=rwc", dir.path().join("ledger.db").display());

        let mut config = single_tier_config(1);
        config.ledger.backend = LedgerBackend::Sqlite;
        config.ledger.url = url;

        let app = RunningApp::start(config.clone()).await;
        let id = app
            .scheduler
            .submit(SubmitRequest::new("noop", Vec::new(), 2))
            .await
            .unwrap();
        assert!(app.wait_for_status(id, TaskStatus::Completed).await);
        app.stop().await;

        // 新进程只读取历史，不恢复队列
        let reopened = RunningApp::start(config).await;
        let history = reopened.scheduler.task_history(id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(history.last().map(|t| t.to), Some(TaskStatus::Completed));
        reopened.stop().await;
    }
}
