//! Test data builders for creating test entities

use chrono::{DateTime, Duration, Utc};
use taskqueue_core::{Task, TaskStatus, Tier, WorkerId};

/// Builder for creating test Task entities
pub struct TaskBuilder {
    task: Task,
}

impl TaskBuilder {
    pub fn new() -> Self {
        Self {
            task: Task::new("noop", Vec::new(), Tier::CRITICAL),
        }
    }

    pub fn with_task_type(mut self, task_type: &str) -> Self {
        self.task.task_type = task_type.to_string();
        self
    }

    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.task.payload = payload.into();
        self
    }

    /// Panics on an out-of-range level; tests should pass 1..=5
    pub fn with_tier(mut self, level: u8) -> Self {
        self.task.tier = Tier::new(level).unwrap_or_else(|| panic!("invalid tier {level}"));
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.task.created_at = created_at;
        self
    }

    /// Shift `created_at` into the past
    pub fn aged(mut self, age: Duration) -> Self {
        self.task.created_at = Utc::now() - age;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.task.deadline = Some(deadline);
        self
    }

    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.task.status = status;
        self
    }

    pub fn with_attempts(mut self, attempt_count: u32) -> Self {
        self.task.attempt_count = attempt_count;
        self
    }

    pub fn with_deliveries(mut self, delivery_count: u32) -> Self {
        self.task.delivery_count = delivery_count;
        self
    }

    pub fn with_timed_out_workers(mut self, workers: &[u64]) -> Self {
        self.task.timed_out_workers = workers.iter().copied().map(WorkerId::new).collect();
        self
    }

    pub fn build(self) -> Task {
        self.task
    }
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}
