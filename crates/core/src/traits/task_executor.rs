//! 任务执行器接口定义
//!
//! 此模块定义了调度核心与外部执行逻辑之间的窄接口，包括：
//! - 任务执行器接口 [`TaskExecutor`]
//! - 执行上下文 [`ExecutionContext`]（取消信号与进度上报）
//! - 执行错误及其分类 [`ExecutionError`] / [`ErrorClassifier`]
//! - 按任务类型查找执行器的 [`ExecutorRegistry`]
//!
//! ## 核心概念
//!
//! ### TaskExecutor
//! 调度核心从不解析任务负载，只关心执行结果是成功还是失败，
//! 以及失败是可重试（transient）还是致命（fatal）。
//!
//! ### 取消与进度
//! 取消是协作式的：执行器应在安全点检查 [`ExecutionContext::is_cancelled`]。
//! 执行器调用 [`ExecutionContext::report_progress`] 会为当前租约续期。
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use taskqueue_core::traits::{ExecutionContext, ExecutionError, TaskExecutor, TaskOutput};
//!
//! pub struct EchoExecutor;
//!
//! #[async_trait]
//! impl TaskExecutor for EchoExecutor {
//!     async fn execute(&self, ctx: &ExecutionContext) -> Result<TaskOutput, ExecutionError> {
//!         if ctx.is_cancelled() {
//!             return Err(ExecutionError::fatal("cancelled"));
//!         }
//!         ctx.report_progress();
//!         Ok(serde_json::json!({ "bytes": ctx.task.payload.len() }))
//!     }
//!
//!     fn name(&self) -> &str {
//!         "echo"
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};

use crate::models::{Task, WorkerId};

/// 执行成功时返回的结果
pub type TaskOutput = serde_json::Value;

/// 错误分类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// 可重试，按退避策略重新入队
    Transient,
    /// 致命，立即进入死信
    Fatal,
    /// 未分类，按可重试处理但以双倍速率消耗重试预算
    Unclassified,
}

/// 执行器返回的错误
///
/// `class` 是执行器给出的分类提示，最终分类由调用方提供的 [`ErrorClassifier`] 决定。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionError {
    pub class: Option<ErrorClass>,
    pub message: String,
}

impl ExecutionError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            class: Some(ErrorClass::Transient),
            message: message.into(),
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            class: Some(ErrorClass::Fatal),
            message: message.into(),
        }
    }

    /// 不带分类提示的错误
    pub fn other(message: impl Into<String>) -> Self {
        Self {
            class: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for ExecutionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for ExecutionError {}

/// 调用方提供的错误分类器，在派发边界对执行错误分类
pub trait ErrorClassifier: Send + Sync {
    fn classify(&self, task: &Task, error: &ExecutionError) -> ErrorClass;
}

/// 默认分类器：采用执行器给出的提示，没有提示时视为未分类
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultErrorClassifier;

impl ErrorClassifier for DefaultErrorClassifier {
    fn classify(&self, _task: &Task, error: &ExecutionError) -> ErrorClass {
        error.class.unwrap_or(ErrorClass::Unclassified)
    }
}

/// 任务执行上下文
///
/// 由Worker在取得租约后构造，执行器通过它读取任务、检查取消状态并上报进度。
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub task: Task,
    pub worker_id: WorkerId,
    pub generation: u32,
    cancel_rx: watch::Receiver<bool>,
    progress_tx: mpsc::UnboundedSender<()>,
}

impl ExecutionContext {
    pub fn new(
        task: Task,
        worker_id: WorkerId,
        generation: u32,
        cancel_rx: watch::Receiver<bool>,
        progress_tx: mpsc::UnboundedSender<()>,
    ) -> Self {
        Self {
            task,
            worker_id,
            generation,
            cancel_rx,
            progress_tx,
        }
    }

    /// 构造一个不连接任何Worker的上下文，主要用于测试执行器
    pub fn detached(task: Task) -> Self {
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        let (progress_tx, _progress_rx) = mpsc::unbounded_channel();
        Self::new(task, WorkerId::new(0), 0, cancel_rx, progress_tx)
    }

    /// 任务是否被标记为取消中
    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// 等待取消信号；发送端被丢弃时永远挂起
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    /// 上报进度，为当前租约续期
    pub fn report_progress(&self) {
        let _ = self.progress_tx.send(());
    }
}

/// 任务执行器核心接口
///
/// 实现者必须是 `Send + Sync`，同一个执行器实例会被多个Worker并发调用。
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    /// 执行任务
    async fn execute(&self, ctx: &ExecutionContext) -> Result<TaskOutput, ExecutionError>;

    /// 执行器名称
    fn name(&self) -> &str;
}

/// 执行器注册表，按任务类型查找执行器
#[derive(Clone, Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn TaskExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册执行器，同类型的旧执行器会被替换
    pub fn register(&mut self, task_type: impl Into<String>, executor: Arc<dyn TaskExecutor>) {
        self.executors.insert(task_type.into(), executor);
    }

    pub fn with(mut self, task_type: impl Into<String>, executor: Arc<dyn TaskExecutor>) -> Self {
        self.register(task_type, executor);
        self
    }

    pub fn get(&self, task_type: &str) -> Option<Arc<dyn TaskExecutor>> {
        self.executors.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.executors.contains_key(task_type)
    }

    pub fn task_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.executors.keys().cloned().collect();
        types.sort();
        types
    }
}

impl fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("task_types", &self.task_types())
            .finish()
    }
}
