//! Test doubles for the executor, notification and ledger store interfaces

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use taskqueue_core::{
    models::{LedgerFilter, LedgerHead, Transition},
    traits::{LedgerAppendError, LedgerStore},
    ExecutionContext, ExecutionError, LifecycleEvent, NotificationSink, SchedulerError,
    SchedulerResult, TaskExecutor, TaskId, TaskOutput, Tier, WorkerId,
};

/// One scripted execution outcome
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Succeed,
    FailTransient(String),
    FailFatal(String),
    /// Error without a classification hint
    FailUnclassified(String),
    /// Block until the execution context is cancelled
    Hang,
}

/// A finished or started execution as seen by the executor
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionRecord {
    pub task_id: TaskId,
    pub worker_id: WorkerId,
    pub generation: u32,
    pub tier: Tier,
}

/// Executor whose outcomes are scripted in call order
///
/// Queued steps are consumed one per execution; once the queue is empty every
/// execution uses the default step. It also tracks concurrency so tests can
/// assert that no task is ever executed by two workers at once.
pub struct ScriptedExecutor {
    default: Step,
    script: Mutex<VecDeque<Step>>,
    delay: Duration,
    started: Mutex<Vec<ExecutionRecord>>,
    finished: Mutex<Vec<ExecutionRecord>>,
    in_flight: Mutex<HashSet<TaskId>>,
    current: AtomicUsize,
    max_concurrent: AtomicUsize,
    overlap: AtomicBool,
}

impl ScriptedExecutor {
    pub fn always(default: Step) -> Self {
        Self {
            default,
            script: Mutex::new(VecDeque::new()),
            delay: Duration::ZERO,
            started: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
            in_flight: Mutex::new(HashSet::new()),
            current: AtomicUsize::new(0),
            max_concurrent: AtomicUsize::new(0),
            overlap: AtomicBool::new(false),
        }
    }

    pub fn succeeding() -> Self {
        Self::always(Step::Succeed)
    }

    /// Queue a step ahead of the default
    pub fn then(self, step: Step) -> Self {
        self.script.lock().unwrap().push_back(step);
        self
    }

    /// Sleep this long inside every execution
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn execution_count(&self) -> usize {
        self.started.lock().unwrap().len()
    }

    pub fn executions(&self) -> Vec<ExecutionRecord> {
        self.started.lock().unwrap().clone()
    }

    /// Executions that returned successfully, in completion order
    pub fn completed(&self) -> Vec<ExecutionRecord> {
        self.finished.lock().unwrap().clone()
    }

    pub fn executions_of(&self, task_id: TaskId) -> usize {
        self.started
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.task_id == task_id)
            .count()
    }

    /// True if the same task was ever running twice at the same time
    pub fn overlap_detected(&self) -> bool {
        self.overlap.load(Ordering::SeqCst)
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone())
    }

    fn enter(&self, record: &ExecutionRecord) {
        if !self.in_flight.lock().unwrap().insert(record.task_id) {
            self.overlap.store(true, Ordering::SeqCst);
        }
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(now, Ordering::SeqCst);
        self.started.lock().unwrap().push(record.clone());
    }

    fn leave(&self, record: &ExecutionRecord, succeeded: bool) {
        self.in_flight.lock().unwrap().remove(&record.task_id);
        self.current.fetch_sub(1, Ordering::SeqCst);
        if succeeded {
            self.finished.lock().unwrap().push(record.clone());
        }
    }
}

#[async_trait]
impl TaskExecutor for ScriptedExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<TaskOutput, ExecutionError> {
        let record = ExecutionRecord {
            task_id: ctx.task.id,
            worker_id: ctx.worker_id,
            generation: ctx.generation,
            tier: ctx.task.tier,
        };
        let step = self.next_step();
        self.enter(&record);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
            ctx.report_progress();
        }

        let result = match step {
            Step::Succeed => Ok(serde_json::json!({ "task_id": ctx.task.id.to_string() })),
            Step::FailTransient(message) => Err(ExecutionError::transient(message)),
            Step::FailFatal(message) => Err(ExecutionError::fatal(message)),
            Step::FailUnclassified(message) => Err(ExecutionError::other(message)),
            Step::Hang => {
                ctx.cancelled().await;
                Err(ExecutionError::fatal("cancelled"))
            }
        };

        self.leave(&record, result.is_ok());
        result
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// Notification sink that records every event it receives
#[derive(Default)]
pub struct RecordingNotificationSink {
    events: tokio::sync::Mutex<Vec<LifecycleEvent>>,
}

impl RecordingNotificationSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().await.clone()
    }

    pub async fn event_names(&self) -> Vec<&'static str> {
        self.events.lock().await.iter().map(|e| e.name()).collect()
    }

    pub async fn events_for(&self, task_id: TaskId) -> Vec<LifecycleEvent> {
        self.events
            .lock()
            .await
            .iter()
            .filter(|e| e.task_id() == task_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn notify(&self, event: &LifecycleEvent) -> SchedulerResult<()> {
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}

/// Ledger store wrapper whose appends can be switched to fail
///
/// Reads always go to the inner store, so a test can break writes in the
/// middle of a flow and heal them later.
pub struct FlakyLedgerStore {
    inner: Arc<dyn LedgerStore>,
    failing: AtomicBool,
    rejected: AtomicUsize,
}

impl FlakyLedgerStore {
    pub fn new(inner: Arc<dyn LedgerStore>) -> Self {
        Self {
            inner,
            failing: AtomicBool::new(false),
            rejected: AtomicUsize::new(0),
        }
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of appends rejected while failing
    pub fn rejected(&self) -> usize {
        self.rejected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LedgerStore for FlakyLedgerStore {
    async fn head(&self, task_id: TaskId) -> SchedulerResult<Option<LedgerHead>> {
        self.inner.head(task_id).await
    }

    async fn append(&self, transition: &Transition) -> Result<(), LedgerAppendError> {
        if self.failing.load(Ordering::SeqCst) {
            self.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(LedgerAppendError::Store(SchedulerError::Internal(
                "ledger store unavailable".to_string(),
            )));
        }
        self.inner.append(transition).await
    }

    async fn contains(&self, dedup_key: &str) -> SchedulerResult<bool> {
        self.inner.contains(dedup_key).await
    }

    async fn query(&self, filter: &LedgerFilter) -> SchedulerResult<Vec<Transition>> {
        self.inner.query(filter).await
    }

    fn name(&self) -> &str {
        "flaky"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskqueue_core::Task;

    #[tokio::test]
    async fn test_script_then_default() {
        let executor = ScriptedExecutor::succeeding().then(Step::FailTransient("boom".into()));
        let ctx = ExecutionContext::detached(Task::new("noop", vec![], Tier::CRITICAL));

        assert!(executor.execute(&ctx).await.is_err());
        assert!(executor.execute(&ctx).await.is_ok());
        assert_eq!(executor.execution_count(), 2);
        assert_eq!(executor.completed().len(), 1);
        assert!(!executor.overlap_detected());
        assert_eq!(executor.max_concurrency(), 1);
    }
}
