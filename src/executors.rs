//! 内置任务执行器

use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::json;
use tokio::process::Command;
use tracing::{debug, info, warn};

use taskqueue_core::{
    ExecutionContext, ExecutionError, ExecutorRegistry, TaskExecutor, TaskOutput,
};

/// 注册内置执行器：`noop` 与 `shell`
pub fn builtin_registry() -> ExecutorRegistry {
    ExecutorRegistry::new()
        .with("noop", Arc::new(NoopExecutor))
        .with("shell", Arc::new(ShellExecutor::new()))
}

/// 立即成功的执行器，用于连通性检查
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopExecutor;

#[async_trait]
impl TaskExecutor for NoopExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<TaskOutput, ExecutionError> {
        debug!("noop任务执行: {}", ctx.task.id);
        Ok(json!({ "payload_bytes": ctx.task.payload.len() }))
    }

    fn name(&self) -> &str {
        "noop"
    }
}

/// Shell任务执行器，以 `sh -c` 运行UTF-8负载
///
/// 非零退出码视为可重试错误；负载不是有效命令或进程无法启动视为致命错误。
/// 任务被标记为取消中时终止子进程。
#[derive(Debug, Default, Clone)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }

    fn parse_command(payload: &[u8]) -> Result<&str, ExecutionError> {
        let command = std::str::from_utf8(payload)
            .map_err(|e| ExecutionError::fatal(format!("Shell命令不是有效的UTF-8: {e}")))?;
        if command.trim().is_empty() {
            return Err(ExecutionError::fatal("Shell命令不能为空"));
        }
        Ok(command)
    }
}

#[async_trait]
impl TaskExecutor for ShellExecutor {
    async fn execute(&self, ctx: &ExecutionContext) -> Result<TaskOutput, ExecutionError> {
        let command = Self::parse_command(&ctx.task.payload)?;
        let start_time = Instant::now();
        info!("执行Shell任务: task_id={}, command={}", ctx.task.id, command);

        let child = Command::new("sh")
            .arg("-c")
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ExecutionError::fatal(format!("启动Shell命令失败: {e}")))?;
        ctx.report_progress();

        // 取消时丢弃future，kill_on_drop 负责终止子进程
        let output = tokio::select! {
            output = child.wait_with_output() => output
                .map_err(|e| ExecutionError::transient(format!("等待进程结束失败: {e}")))?,
            _ = ctx.cancelled() => {
                warn!("Shell任务 {} 被取消，终止子进程", ctx.task.id);
                return Err(ExecutionError::fatal("任务已取消"));
            }
        };

        let elapsed_ms = start_time.elapsed().as_millis() as u64;
        let stdout = String::from_utf8_lossy(&output.stdout).trim_end().to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).trim_end().to_string();
        let exit_code = output.status.code();

        info!(
            "Shell任务执行完成: task_id={}, success={}, exit_code={:?}, duration={}ms",
            ctx.task.id,
            output.status.success(),
            exit_code,
            elapsed_ms
        );

        if !output.status.success() {
            let message = if stderr.is_empty() {
                format!("命令执行失败，退出码: {exit_code:?}")
            } else {
                format!("命令执行失败，退出码: {exit_code:?}: {stderr}")
            };
            return Err(ExecutionError::transient(message));
        }

        Ok(json!({
            "exit_code": exit_code,
            "stdout": stdout,
            "stderr": stderr,
            "execution_time_ms": elapsed_ms,
        }))
    }

    fn name(&self) -> &str {
        "shell"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taskqueue_core::{ErrorClass, Task, Tier};

    fn shell_task(command: &[u8]) -> Task {
        Task::new("shell", command.to_vec(), Tier::CRITICAL)
    }

    #[tokio::test]
    async fn test_noop_executor() {
        let ctx = ExecutionContext::detached(Task::new("noop", b"abc".to_vec(), Tier::CRITICAL));
        let output = NoopExecutor.execute(&ctx).await.unwrap();
        assert_eq!(output["payload_bytes"], 3);
    }

    #[test]
    fn test_builtin_registry() {
        let registry = builtin_registry();
        assert!(registry.contains("noop"));
        assert!(registry.contains("shell"));
        assert!(!registry.contains("http"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_success() {
        let ctx = ExecutionContext::detached(shell_task(b"echo hello"));
        let output = ShellExecutor::new().execute(&ctx).await.unwrap();
        assert_eq!(output["stdout"], "hello");
        assert_eq!(output["exit_code"], 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_nonzero_exit_is_transient() {
        let ctx = ExecutionContext::detached(shell_task(b"echo oops >&2; exit 3"));
        let error = ShellExecutor::new().execute(&ctx).await.unwrap_err();
        assert_eq!(error.class, Some(ErrorClass::Transient));
        assert!(error.message.contains("oops"));
    }

    #[tokio::test]
    async fn test_shell_invalid_payload_is_fatal() {
        for payload in [&b"   "[..], &[0xff, 0xfe][..]] {
            let ctx = ExecutionContext::detached(shell_task(payload));
            let error = ShellExecutor::new().execute(&ctx).await.unwrap_err();
            assert_eq!(error.class, Some(ErrorClass::Fatal));
        }
    }
}
