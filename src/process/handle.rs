//! 进程句柄
//!
//! 每个被监管的进程由一个监视任务独占持有，进程退出时通过 watch 通道
//! 发布退出结果，并向监管器的事件队列投递退出事件。

use crate::catalog::{Invocation, ServiceId};
use crate::error::{SupervisorError, SupervisorResult};
use serde::Serialize;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tracing::{debug, warn};

/// 进程退出结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExitOutcome {
    pub code: Option<i32>,
    pub signal: Option<i32>,
    pub success: bool,
    pub description: String,
}

impl ExitOutcome {
    fn from_status(status: ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
            success: status.success(),
            description: status.to_string(),
        }
    }

    fn from_error(error: &std::io::Error) -> Self {
        Self {
            code: None,
            signal: None,
            success: false,
            description: format!("等待进程失败: {error}"),
        }
    }
}

/// 进程退出报告
#[derive(Debug, Clone)]
pub struct ExitReport {
    pub service: ServiceId,
    /// 启动批次，用于丢弃旧进程的事件
    pub generation: u64,
    pub pid: Option<u32>,
    pub label: String,
    pub outcome: ExitOutcome,
}

/// 发往监管器的进程事件
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    Exited(ExitReport),
}

impl ProcessEvent {
    pub fn service(&self) -> ServiceId {
        match self {
            ProcessEvent::Exited(report) => report.service,
        }
    }
}

/// 进程事件发送端
pub type EventSender = mpsc::UnboundedSender<ProcessEvent>;

/// 进程事件接收端
pub type EventReceiver = mpsc::UnboundedReceiver<ProcessEvent>;

/// 被监管进程的句柄
#[derive(Debug)]
pub struct ProcessHandle {
    service: ServiceId,
    generation: u64,
    label: String,
    pid: Option<u32>,
    kill_tx: mpsc::Sender<()>,
    exit_rx: watch::Receiver<Option<ExitOutcome>>,
}

enum Step {
    Exited(std::io::Result<ExitStatus>),
    KillRequested(Option<()>),
}

impl ProcessHandle {
    /// 启动进程并创建监视任务
    ///
    /// # 参数
    /// * `service` - 所属服务
    /// * `generation` - 启动批次
    /// * `label` - 日志中使用的进程标签
    /// * `invocation` - 启动命令
    /// * `working_dir` - 工作目录（不存在时沿用当前目录）
    /// * `events` - 退出事件发送端
    pub fn spawn(
        service: ServiceId,
        generation: u64,
        label: impl Into<String>,
        invocation: &Invocation,
        working_dir: &Path,
        events: EventSender,
    ) -> SupervisorResult<Self> {
        let label = label.into();
        let mut command = Command::new(&invocation.program);
        command
            .args(&invocation.args)
            .envs(invocation.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        if working_dir.is_dir() {
            command.current_dir(working_dir);
        }

        // 独立进程组，强制终止时可以连同子进程一起结束
        #[cfg(unix)]
        command.process_group(0);

        let child = command
            .spawn()
            .map_err(|e| SupervisorError::LaunchFailure {
                service,
                reason: format!("{}: {e}", invocation.program.display()),
            })?;

        let pid = child.id();
        debug!(
            "[{}] 进程已启动: {} (PID: {:?})",
            service,
            invocation.command_line(),
            pid
        );

        let (kill_tx, kill_rx) = mpsc::channel(4);
        let (exit_tx, exit_rx) = watch::channel(None);

        tokio::spawn(monitor(
            child,
            MonitorContext {
                service,
                generation,
                label: label.clone(),
                pid,
                kill_rx,
                exit_tx,
                events,
            },
        ));

        Ok(Self {
            service,
            generation,
            label,
            pid,
            kill_tx,
            exit_rx,
        })
    }

    pub fn service(&self) -> ServiceId {
        self.service
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// 进程是否仍在运行
    pub fn is_alive(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    /// 已退出时返回退出结果
    pub fn exit_outcome(&self) -> Option<ExitOutcome> {
        self.exit_rx.borrow().clone()
    }

    /// 强制终止进程及其进程组，进程已退出时忽略
    pub async fn kill(&self) {
        if !self.is_alive() {
            return;
        }
        if self.kill_tx.send(()).await.is_err() {
            debug!("[{}] {} 已退出，忽略终止请求", self.service, self.label);
        }
    }

    /// 在超时时间内等待进程退出
    ///
    /// # 返回
    /// * `Option<ExitOutcome>` - 超时返回 None
    pub async fn wait_for_exit(&self, timeout: Duration) -> Option<ExitOutcome> {
        let mut exit_rx = self.exit_rx.clone();
        let outcome = match tokio::time::timeout(timeout, exit_rx.wait_for(Option::is_some)).await
        {
            Ok(Ok(outcome)) => outcome.clone(),
            Ok(Err(_)) => self.exit_outcome(),
            Err(_) => None,
        };
        outcome
    }
}

struct MonitorContext {
    service: ServiceId,
    generation: u64,
    label: String,
    pid: Option<u32>,
    kill_rx: mpsc::Receiver<()>,
    exit_tx: watch::Sender<Option<ExitOutcome>>,
    events: EventSender,
}

/// 监视任务：等待进程退出并处理终止请求
async fn monitor(mut child: Child, mut ctx: MonitorContext) {
    let mut kill_open = true;

    let outcome = loop {
        let step = tokio::select! {
            status = child.wait() => Step::Exited(status),
            request = ctx.kill_rx.recv(), if kill_open => Step::KillRequested(request),
        };

        match step {
            Step::Exited(Ok(status)) => break ExitOutcome::from_status(status),
            Step::Exited(Err(e)) => break ExitOutcome::from_error(&e),
            Step::KillRequested(Some(())) => force_kill(&mut child, ctx.pid),
            Step::KillRequested(None) => kill_open = false,
        }
    };

    debug!(
        "[{}] {} 已退出: {}",
        ctx.service, ctx.label, outcome.description
    );

    ctx.exit_tx.send_replace(Some(outcome.clone()));

    let report = ExitReport {
        service: ctx.service,
        generation: ctx.generation,
        pid: ctx.pid,
        label: ctx.label,
        outcome,
    };
    if ctx.events.send(ProcessEvent::Exited(report)).is_err() {
        debug!("[{}] 事件队列已关闭", ctx.service);
    }
}

#[cfg(unix)]
fn force_kill(child: &mut Child, pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let delivered = pid
        .and_then(|pid| i32::try_from(pid).ok())
        .map(|pid| killpg(Pid::from_raw(pid), Signal::SIGKILL));

    if let Some(Err(e)) = &delivered {
        warn!("向进程组发送 SIGKILL 失败: {e}");
    }
    if !matches!(delivered, Some(Ok(()))) {
        if let Err(e) = child.start_kill() {
            warn!("强制终止进程失败: {e}");
        }
    }
}

#[cfg(not(unix))]
fn force_kill(child: &mut Child, _pid: Option<u32>) {
    if let Err(e) = child.start_kill() {
        warn!("终止进程失败: {e}");
    }
}
