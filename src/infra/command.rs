//! 命令执行器
//!
//! 提供统一的外部命令执行接口：安装器、certbot、openssl、
//! 容器运行时都通过 [`CommandExecutor`] 调用，测试中可替换为假实现。

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::error;

use crate::config::constants::COMMAND_TIMEOUT_SECS;

/// 命令执行错误
#[derive(Debug)]
pub enum CommandError {
    /// 命令启动失败
    SpawnFailed(String, std::io::Error),
    /// 命令超时
    Timeout(String),
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::SpawnFailed(program, e) => {
                write!(f, "Failed to spawn '{}': {}", program, e)
            }
            CommandError::Timeout(program) => write!(f, "Command '{}' timed out", program),
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::SpawnFailed(_, e) => Some(e),
            _ => None,
        }
    }
}

/// 命令执行结果
#[derive(Clone, Debug)]
pub struct CommandOutput {
    /// 退出状态是否为 0
    pub success: bool,
    /// 标准输出
    pub stdout: String,
    /// 标准错误
    pub stderr: String,
}

/// 外部命令执行能力
///
/// 返回 `Err` 仅表示命令无法执行（启动失败、超时）；
/// 命令本身的非零退出通过 [`CommandOutput::success`] 表达，由调用方裁决。
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    /// 执行命令并收集输出
    async fn execute(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CommandError>;

    /// 在指定工作目录执行命令
    async fn execute_in(
        &self,
        program: &str,
        args: &[&str],
        work_dir: &Path,
    ) -> Result<CommandOutput, CommandError>;
}

/// 基于 tokio::process 的真实执行器
pub struct SystemExecutor {
    timeout: Duration,
}

impl SystemExecutor {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(COMMAND_TIMEOUT_SECS),
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn run(
        &self,
        program: &str,
        args: &[&str],
        work_dir: Option<&Path>,
    ) -> Result<CommandOutput, CommandError> {
        let mut cmd = Command::new(program);
        cmd.args(args);
        if let Some(dir) = work_dir {
            cmd.current_dir(dir);
        }

        let output = tokio::select! {
            result = cmd.output() => {
                result.map_err(|e| CommandError::SpawnFailed(program.to_string(), e))?
            }
            _ = tokio::time::sleep(self.timeout) => {
                error!(program, timeout_secs = self.timeout.as_secs(), "Command timed out");
                return Err(CommandError::Timeout(program.to_string()));
            }
        };

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

impl Default for SystemExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CommandExecutor for SystemExecutor {
    async fn execute(&self, program: &str, args: &[&str]) -> Result<CommandOutput, CommandError> {
        self.run(program, args, None).await
    }

    async fn execute_in(
        &self,
        program: &str,
        args: &[&str],
        work_dir: &Path,
    ) -> Result<CommandOutput, CommandError> {
        self.run(program, args, Some(work_dir)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_simple_success() {
        let executor = SystemExecutor::new();
        let output = executor.execute("echo", &["hello"]).await.unwrap();

        assert!(output.success);
        assert!(output.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_execute_not_found() {
        let executor = SystemExecutor::new();
        let result = executor.execute("nonexistent_command_12345", &[]).await;

        assert!(matches!(result, Err(CommandError::SpawnFailed(_, _))));
    }

    #[tokio::test]
    async fn test_execute_in_work_dir() {
        let executor = SystemExecutor::new();
        let output = executor
            .execute_in("pwd", &[], Path::new("/tmp"))
            .await
            .unwrap();

        assert!(output.success);
        assert!(output.stdout.trim().ends_with("tmp"));
    }

    #[tokio::test]
    async fn test_execute_timeout() {
        let executor = SystemExecutor::with_timeout(Duration::from_millis(100));
        let result = executor.execute("sleep", &["5"]).await;

        assert!(matches!(result, Err(CommandError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_err() {
        let executor = SystemExecutor::new();
        let output = executor.execute("sh", &["-c", "exit 3"]).await.unwrap();

        assert!(!output.success);
    }
}
