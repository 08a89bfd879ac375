//! 生命周期事件通知接收端

use async_trait::async_trait;
use taskqueue_core::traits::{LifecycleEvent, NotificationSink};
use taskqueue_core::SchedulerResult;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// 将事件写入结构化日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn notify(&self, event: &LifecycleEvent) -> SchedulerResult<()> {
        match event {
            LifecycleEvent::TaskCompleted {
                task_id,
                task_type,
                tier,
                attempt_count,
                ..
            } => {
                info!(
                    event = event.name(),
                    %task_id,
                    task_type = %task_type,
                    %tier,
                    attempt_count,
                    "任务完成"
                );
            }
            LifecycleEvent::TaskDeadLettered {
                task_id,
                task_type,
                tier,
                reason,
                ..
            } => {
                warn!(
                    event = event.name(),
                    %task_id,
                    task_type = %task_type,
                    %tier,
                    %reason,
                    "任务进入死信队列"
                );
            }
        }
        Ok(())
    }
}

/// 将事件广播给进程内的订阅者
///
/// 没有订阅者时事件被丢弃；订阅者处理过慢时会丢失最旧的事件。
#[derive(Debug, Clone)]
pub struct BroadcastNotificationSink {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl BroadcastNotificationSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotificationSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl NotificationSink for BroadcastNotificationSink {
    async fn notify(&self, event: &LifecycleEvent) -> SchedulerResult<()> {
        if self.sender.send(event.clone()).is_err() {
            debug!("没有事件订阅者，丢弃事件: {}", event.name());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use taskqueue_core::models::{FailureReason, TaskId, Tier};

    #[tokio::test]
    async fn test_broadcast_delivers_to_subscribers() {
        let sink = BroadcastNotificationSink::new(8);
        let mut rx = sink.subscribe();

        let event = LifecycleEvent::TaskDeadLettered {
            task_id: TaskId::new(),
            task_type: "report".to_string(),
            tier: Tier::CRITICAL,
            reason: FailureReason::Cancelled,
            at: Utc::now(),
        };
        sink.notify(&event).await.unwrap();

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn test_broadcast_without_subscribers_is_ok() {
        let sink = BroadcastNotificationSink::default();
        let event = LifecycleEvent::TaskCompleted {
            task_id: TaskId::new(),
            task_type: "report".to_string(),
            tier: Tier::BACKGROUND,
            attempt_count: 0,
            at: Utc::now(),
        };
        assert!(sink.notify(&event).await.is_ok());
        assert!(TracingNotificationSink.notify(&event).await.is_ok());
    }
}
