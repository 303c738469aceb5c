//! 一次性命令执行
//!
//! 用于优雅停止、重新加载配置以及版本探测等短命令，均受超时限制

use crate::catalog::Invocation;
use crate::process::handle::ExitOutcome;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

/// 一次性命令的执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// 命令已结束
    Completed(ExitOutcome),
    /// 超时（命令已被终止）
    TimedOut,
    /// 命令无法启动
    Failed(String),
}

fn build(invocation: &Invocation, working_dir: &Path) -> Command {
    let mut command = Command::new(&invocation.program);
    command
        .args(&invocation.args)
        .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        .stdin(Stdio::null())
        .kill_on_drop(true);

    if working_dir.is_dir() {
        command.current_dir(working_dir);
    }

    command
}

/// 执行命令并在超时时间内等待其结束
pub async fn run_command(
    invocation: &Invocation,
    working_dir: &Path,
    timeout: Duration,
) -> CommandOutcome {
    debug!("执行命令: {}", invocation.command_line());

    let mut command = build(invocation, working_dir);
    command.stdout(Stdio::null()).stderr(Stdio::null());

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            return CommandOutcome::Failed(format!("{}: {e}", invocation.program.display()))
        }
    };

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) => CommandOutcome::Completed(ExitOutcome {
            code: status.code(),
            signal: None,
            success: status.success(),
            description: status.to_string(),
        }),
        Ok(Err(e)) => CommandOutcome::Failed(e.to_string()),
        Err(_) => {
            // kill_on_drop 会在 child 释放时结束命令
            CommandOutcome::TimedOut
        }
    }
}

/// 执行命令并返回标准输出，失败或超时返回 None
pub async fn capture_output(
    invocation: &Invocation,
    working_dir: &Path,
    timeout: Duration,
) -> Option<String> {
    let mut command = build(invocation, working_dir);
    command.stderr(Stdio::null());

    match tokio::time::timeout(timeout, command.output()).await {
        Ok(Ok(output)) if output.status.success() => {
            Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
        }
        Ok(Ok(output)) => {
            debug!(
                "命令 {} 返回失败状态: {}",
                invocation.command_line(),
                output.status
            );
            None
        }
        Ok(Err(e)) => {
            debug!("命令 {} 无法执行: {e}", invocation.command_line());
            None
        }
        Err(_) => {
            debug!("命令 {} 执行超时", invocation.command_line());
            None
        }
    }
}
