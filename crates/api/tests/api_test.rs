#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use taskqueue_api::{create_app, AppState};
    use taskqueue_core::{DefaultErrorClassifier, ExecutorRegistry, NotificationSink};
    use taskqueue_dispatcher::TaskScheduler;
    use taskqueue_infrastructure::InMemoryLedgerStore;
    use taskqueue_testing_utils::{fast_config, RecordingNotificationSink, ScriptedExecutor};

    /// 不启动Worker池，任务停留在待处理状态
    fn create_test_app() -> (Router, Arc<TaskScheduler>) {
        let scheduler = Arc::new(TaskScheduler::new(
            fast_config(),
            Arc::new(InMemoryLedgerStore::new()),
            ExecutorRegistry::new().with("job", Arc::new(ScriptedExecutor::succeeding())),
            vec![Arc::new(RecordingNotificationSink::new()) as Arc<dyn NotificationSink>],
            Arc::new(DefaultErrorClassifier),
        ));
        let app = create_app(AppState::new(Arc::clone(&scheduler)), true);
        (app, scheduler)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, json)
    }

    async fn submit(app: &Router, priority: Value) -> (StatusCode, Value) {
        send(
            app,
            "POST",
            "/api/tasks",
            Some(json!({ "task_type": "job", "payload": "hello", "priority": priority })),
        )
        .await
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (app, _) = create_test_app();
        let (status, body) = send(&app, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_submit_and_get_task() {
        let (app, _) = create_test_app();
        let (status, body) = submit(&app, json!(2)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["tier"], 2);

        let id = body["data"]["task_id"].as_str().unwrap().to_string();
        let (status, body) = send(&app, "GET", &format!("/api/tasks/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "pending");
        assert_eq!(body["data"]["history"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_out_of_range_priority_is_clamped() {
        let (app, _) = create_test_app();
        let (status, body) = submit(&app, json!(42)).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["tier"], 5);
    }

    #[tokio::test]
    async fn test_invalid_submissions_rejected() {
        let (app, scheduler) = create_test_app();

        let (status, body) = submit(&app, json!("high")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "VALIDATION_ERROR");

        let (status, _) = submit(&app, json!(1.5)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            "/api/tasks",
            Some(json!({ "task_type": "", "priority": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(
            &app,
            "POST",
            "/api/tasks",
            Some(json!({ "task_type": "unknown", "priority": 1 })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // 被拒绝的提交不留下任何痕迹
        assert_eq!(scheduler.router().len().await, 0);
        let (_, body) = send(&app, "GET", "/api/ledger", None).await;
        assert!(body["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_task_returns_404() {
        let (app, _) = create_test_app();
        let missing = taskqueue_core::TaskId::new();

        let (status, body) = send(&app, "GET", &format!("/api/tasks/{missing}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["type"], "TASK_NOT_FOUND");

        let (status, _) = send(&app, "POST", &format!("/api/tasks/{missing}/cancel"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "GET", "/api/tasks/not-a-uuid", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_cancel_then_replay_and_discard() {
        let (app, _) = create_test_app();
        let (_, body) = submit(&app, json!(3)).await;
        let id = body["data"]["task_id"].as_str().unwrap().to_string();

        let (status, body) = send(&app, "POST", &format!("/api/tasks/{id}/cancel"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["outcome"], "dead_lettered");

        // 终态任务不能再次取消
        let (status, _) = send(&app, "POST", &format!("/api/tasks/{id}/cancel"), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, body) = send(&app, "GET", "/api/dead-letters", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);

        let (status, body) = send(&app, "POST", &format!("/api/dead-letters/{id}/replay"), None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["replayed_from"], id.as_str());
        let new_id = body["data"]["task_id"].as_str().unwrap().to_string();
        assert_ne!(new_id, id);

        // 重放后死信被移除
        let (status, _) = send(&app, "GET", &format!("/api/dead-letters/{id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(&app, "POST", &format!("/api/tasks/{new_id}/cancel"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "DELETE", &format!("/api/dead-letters/{new_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, "DELETE", &format!("/api/dead-letters/{new_id}"), None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        // 丢弃不影响账本历史
        let (status, body) = send(&app, "GET", &format!("/api/tasks/{new_id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "dead_lettered");
    }

    #[tokio::test]
    async fn test_ledger_query_filters() {
        let (app, _) = create_test_app();
        let (_, first) = submit(&app, json!(1)).await;
        submit(&app, json!(4)).await;
        let id = first["data"]["task_id"].as_str().unwrap().to_string();
        send(&app, "POST", &format!("/api/tasks/{id}/cancel"), None).await;

        let (status, body) = send(&app, "GET", "/api/ledger", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 3);

        let (_, body) = send(&app, "GET", "/api/ledger?status=dead_lettered", None).await;
        let rows = body["data"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["task_id"], id.as_str());

        let (_, body) = send(&app, "GET", &format!("/api/ledger?task_id={id}"), None).await;
        assert_eq!(body["data"].as_array().unwrap().len(), 2);

        let (status, _) = send(&app, "GET", "/api/ledger?status=bogus", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_monitoring_reports_backlog_per_tier() {
        let (app, _) = create_test_app();
        submit(&app, json!(1)).await;
        submit(&app, json!(1)).await;
        submit(&app, json!(5)).await;

        let (status, body) = send(&app, "GET", "/api/monitoring", None).await;
        assert_eq!(status, StatusCode::OK);
        let tiers = body["data"]["tiers"].as_array().unwrap();
        assert_eq!(tiers.len(), 5);
        assert_eq!(tiers[0]["queue"]["backlog_depth"], 2);
        assert_eq!(tiers[4]["queue"]["backlog_depth"], 1);

        let (status, body) = send(&app, "GET", "/api/workers", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["data"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_metrics_without_recorder_returns_404() {
        let (app, _) = create_test_app();
        let (status, _) = send(&app, "GET", "/metrics", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }
}
