//! 服务进程控制器
//!
//! 每个服务一个控制器，负责启动、停止、重启、重新加载以及处理进程退出事件。
//! 控制器只在监管任务内以 `&mut self` 访问，句柄不需要额外加锁。

use crate::catalog::{LaunchSpec, ServiceDescriptor, ServiceId, StopMethod};
use crate::config::Config;
use crate::error::{SupervisorError, SupervisorResult};
use crate::liveness::{probe_for, LivenessProbe};
use crate::notification::{ProcessErrorKind, StateHub};
use crate::pool::{JsonPoolConfigSource, PoolConfigSource, PoolSpawner};
use crate::process::command::{run_command, CommandOutcome};
use crate::process::handle::{EventSender, ExitReport, ProcessHandle};
use crate::process::logs;
use crate::process::state::ServiceState;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 控制器参数
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    /// 启动前清空日志文件
    pub clear_logs_on_start: bool,
    /// 停止命令及等待进程退出的超时时间
    pub stop_timeout: Duration,
    /// 重新加载命令的超时时间
    pub reload_timeout: Duration,
    /// 启动器退出后检查外部文件前的等待时间
    pub settle_delay: Duration,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            clear_logs_on_start: false,
            stop_timeout: Duration::from_millis(2000),
            reload_timeout: Duration::from_millis(1500),
            settle_delay: Duration::from_millis(1250),
        }
    }
}

impl ControllerOptions {
    /// 从配置构建
    pub fn from_config(config: &Config) -> Self {
        Self {
            clear_logs_on_start: config.global.clear_logs_on_start,
            stop_timeout: Duration::from_millis(config.supervisor.stop_timeout_ms),
            reload_timeout: Duration::from_millis(config.supervisor.reload_timeout_ms),
            settle_delay: Duration::from_millis(config.supervisor.settle_delay_ms),
        }
    }
}

/// 服务进程控制器
pub struct ProcessController {
    descriptor: Arc<ServiceDescriptor>,
    probe: Box<dyn LivenessProbe>,
    options: ControllerOptions,
    state: ServiceState,
    handles: Vec<ProcessHandle>,
    last_error: Option<SupervisorError>,
    suppress_exit_errors: bool,
    generation: u64,
    spawner: PoolSpawner,
    pool_source: Option<Arc<dyn PoolConfigSource>>,
    hub: Arc<StateHub>,
    events: EventSender,
}

impl ProcessController {
    /// 创建新的控制器
    ///
    /// # 参数
    /// * `descriptor` - 服务描述
    /// * `options` - 控制器参数
    /// * `hub` - 状态汇总中心
    /// * `events` - 进程退出事件发送端
    pub fn new(
        descriptor: Arc<ServiceDescriptor>,
        options: ControllerOptions,
        hub: Arc<StateHub>,
        events: EventSender,
    ) -> Self {
        let probe = probe_for(&descriptor.liveness, options.settle_delay);
        let pool_source: Option<Arc<dyn PoolConfigSource>> = match &descriptor.launch {
            LaunchSpec::Pooled(pool) => {
                Some(Arc::new(JsonPoolConfigSource::new(pool.pool_config.clone())))
            }
            LaunchSpec::Single(_) => None,
        };

        Self {
            descriptor,
            probe,
            options,
            state: ServiceState::Stopped,
            handles: Vec::new(),
            last_error: None,
            suppress_exit_errors: false,
            generation: 0,
            spawner: PoolSpawner::default(),
            pool_source,
            hub,
            events,
        }
    }

    /// 替换进程池配置来源
    pub fn set_pool_source(&mut self, source: Arc<dyn PoolConfigSource>) {
        self.pool_source = Some(source);
    }

    pub fn id(&self) -> ServiceId {
        self.descriptor.id
    }

    pub fn descriptor(&self) -> &Arc<ServiceDescriptor> {
        &self.descriptor
    }

    pub fn state(&self) -> ServiceState {
        self.state
    }

    pub fn last_error(&self) -> Option<&SupervisorError> {
        self.last_error.as_ref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 存活进程的 PID
    pub fn pids(&self) -> Vec<u32> {
        self.handles
            .iter()
            .filter(|h| h.is_alive())
            .filter_map(ProcessHandle::pid)
            .collect()
    }

    fn any_alive(&self) -> bool {
        self.handles.iter().any(ProcessHandle::is_alive)
    }

    fn transition(&mut self, next: ServiceState) {
        if self.state == next {
            return;
        }
        let previous = std::mem::replace(&mut self.state, next);
        info!("[{}] 状态变更: {} -> {}", self.id(), previous, next);
        self.hub.state_changed(self.id(), next);
    }

    fn ensure_installed(&self) -> SupervisorResult<()> {
        if self.descriptor.is_installed() {
            Ok(())
        } else {
            Err(SupervisorError::NotInstalled { service: self.id() })
        }
    }

    /// 以外部文件为准同步状态
    ///
    /// 已停止但文件存在时接管已在运行的实例，运行中但文件消失时视为已停止
    pub fn reconcile(&mut self) {
        if !self.probe.outlives_launcher() {
            return;
        }

        let running = self.probe.is_running(self.any_alive());
        match self.state {
            ServiceState::Stopped | ServiceState::Crashed if running => {
                info!("[{}] 检测到已在运行的实例", self.id());
                self.transition(ServiceState::Running);
            }
            ServiceState::Running if !running => {
                info!("[{}] 运行标记已消失，服务已停止", self.id());
                self.transition(ServiceState::Stopped);
            }
            _ => {}
        }
    }

    /// 启动服务
    pub async fn start(&mut self) -> SupervisorResult<()> {
        self.ensure_installed()?;
        self.reconcile();

        if self.state.is_active() {
            return Err(SupervisorError::AlreadyRunning { service: self.id() });
        }

        let id = self.id();

        if let Err(e) = logs::prepare(&self.descriptor.prepare) {
            warn!("[{}] 准备数据目录失败: {}", id, e);
        }

        if self.options.clear_logs_on_start {
            match logs::clear_log_files(&self.descriptor.log_files) {
                Ok(0) => {}
                Ok(count) => debug!("[{}] 已清空 {} 个日志文件", id, count),
                Err(e) => warn!("[{}] 清空日志文件失败: {}", id, e),
            }
        }

        self.generation += 1;
        self.last_error = None;
        self.suppress_exit_errors = false;
        self.handles.clear();

        let spawned = match &self.descriptor.launch {
            LaunchSpec::Single(invocation) => {
                info!("[{}] 启动: {}", id, invocation.command_line());
                ProcessHandle::spawn(
                    id,
                    self.generation,
                    self.descriptor.display_name.clone(),
                    invocation,
                    &self.descriptor.working_dir,
                    self.events.clone(),
                )
                .map(|handle| vec![handle])
            }
            LaunchSpec::Pooled(_) => match &self.pool_source {
                Some(source) => {
                    self.spawner
                        .spawn_pools(&self.descriptor, source.as_ref(), self.generation, &self.events)
                        .await
                }
                None => Err(SupervisorError::Unsupported {
                    service: id,
                    operation: "pool",
                }),
            },
        };

        let handles = match spawned {
            Ok(handles) => handles,
            Err(err) => {
                if matches!(err, SupervisorError::LaunchFailure { .. }) {
                    error!("{}", err);
                    self.hub
                        .process_error(id, ProcessErrorKind::FailedToStart, &err.to_string());
                }
                self.last_error = Some(err.clone());
                self.transition(ServiceState::Stopped);
                return Err(err);
            }
        };

        self.handles = handles;
        self.transition(ServiceState::Starting);

        if !self.probe.outlives_launcher() {
            self.transition(ServiceState::Running);
        }

        Ok(())
    }

    /// 停止服务
    pub async fn stop(&mut self) -> SupervisorResult<()> {
        self.ensure_installed()?;
        self.reconcile();

        if !self.state.is_active() {
            return Err(SupervisorError::NotRunning { service: self.id() });
        }

        let id = self.id();
        let timeout = self.options.stop_timeout;

        // 停止期间的退出不是崩溃
        self.suppress_exit_errors = true;
        self.transition(ServiceState::Stopping);

        if let StopMethod::Command(invocation) = &self.descriptor.stop {
            info!("[{}] 停止: {}", id, invocation.command_line());
            match run_command(invocation, &self.descriptor.working_dir, timeout).await {
                CommandOutcome::Completed(outcome) if !outcome.success => {
                    warn!("[{}] 停止命令返回 {}", id, outcome.description);
                }
                CommandOutcome::Completed(_) => {}
                CommandOutcome::TimedOut => {
                    warn!(
                        "{}",
                        SupervisorError::ShutdownTimeout {
                            service: id,
                            timeout_ms: duration_ms(timeout),
                        }
                    );
                }
                CommandOutcome::Failed(reason) => {
                    warn!("[{}] 停止命令无法执行: {}", id, reason);
                }
            }

            if !self.wait_for_handles(timeout).await {
                warn!(
                    "{}",
                    SupervisorError::ShutdownTimeout {
                        service: id,
                        timeout_ms: duration_ms(timeout),
                    }
                );
            }
        }

        if self.any_alive() {
            info!("[{}] 强制终止进程", id);
            for handle in &self.handles {
                handle.kill().await;
            }
            if !self.wait_for_handles(timeout).await {
                error!("[{}] 强制终止后进程仍未退出", id);
            }
        }

        if self.probe.outlives_launcher() {
            match self.probe.clear_stale() {
                Ok(true) => warn!(
                    "[{}] 停止后运行标记仍然存在，已删除（若服务仍在运行，下次启动可能冲突）",
                    id
                ),
                Ok(false) => {}
                Err(e) => error!("[{}] 删除残留的运行标记失败: {}", id, e),
            }
        }

        self.handles.clear();
        self.transition(ServiceState::Stopped);
        Ok(())
    }

    /// 重启服务：先停止再启动
    pub async fn restart(&mut self) -> SupervisorResult<()> {
        match self.stop().await {
            Ok(()) | Err(SupervisorError::NotRunning { .. }) => {}
            Err(e) => return Err(e),
        }
        self.start().await
    }

    /// 重新加载配置，不改变服务状态
    pub async fn reload(&mut self) -> SupervisorResult<()> {
        let id = self.id();
        let Some(invocation) = self.descriptor.reload.clone() else {
            return Err(SupervisorError::Unsupported {
                service: id,
                operation: "reload",
            });
        };

        self.ensure_installed()?;
        if self.state != ServiceState::Running {
            return Err(SupervisorError::NotRunning { service: id });
        }

        info!("[{}] 重新加载配置", id);
        match run_command(&invocation, &self.descriptor.working_dir, self.options.reload_timeout)
            .await
        {
            CommandOutcome::Completed(outcome) if outcome.success => Ok(()),
            CommandOutcome::Completed(outcome) => {
                warn!("[{}] 重新加载命令返回 {}", id, outcome.description);
                Ok(())
            }
            CommandOutcome::TimedOut => {
                warn!("[{}] 重新加载命令超时", id);
                self.hub
                    .process_error(id, ProcessErrorKind::TimedOut, "reload");
                Ok(())
            }
            CommandOutcome::Failed(reason) => Err(SupervisorError::LaunchFailure {
                service: id,
                reason,
            }),
        }
    }

    /// 处理进程退出事件
    pub async fn handle_exit(&mut self, report: ExitReport) {
        let id = self.id();

        if report.generation != self.generation {
            debug!(
                "[{}] 忽略旧进程的退出事件 (批次 {}，当前 {})",
                id, report.generation, self.generation
            );
            return;
        }

        self.handles.retain(ProcessHandle::is_alive);

        if self.probe.outlives_launcher() {
            debug!("[{}] 启动器已退出: {}", id, report.outcome.description);
            if self.state == ServiceState::Starting {
                tokio::time::sleep(self.probe.settle_delay()).await;

                if self.state != ServiceState::Starting {
                    return;
                }
                if self.probe.is_running(false) {
                    self.transition(ServiceState::Running);
                } else {
                    warn!("[{}] 启动器已退出但未检测到运行标记", id);
                    self.last_error = Some(SupervisorError::LaunchFailure {
                        service: id,
                        reason: report.outcome.description,
                    });
                    self.transition(ServiceState::Stopped);
                }
            }
            return;
        }

        if !self.handles.is_empty() {
            warn!(
                "[{}] {} 已退出 ({})，其余 {} 个进程仍在运行",
                id,
                report.label,
                report.outcome.description,
                self.handles.len()
            );
            return;
        }

        if self.suppress_exit_errors {
            debug!("[{}] 进程按请求退出", id);
            return;
        }

        if self.state.is_active() {
            let err = SupervisorError::CrashAfterStart {
                service: id,
                status: report.outcome.description,
            };
            error!("{}", err);
            self.hub
                .process_error(id, ProcessErrorKind::Crashed, &err.to_string());
            self.last_error = Some(err);
            self.transition(ServiceState::Crashed);
        }
    }

    async fn wait_for_handles(&self, timeout: Duration) -> bool {
        let results = join_all(self.handles.iter().map(|h| h.wait_for_exit(timeout))).await;
        results.iter().all(Option::is_some)
    }
}

impl std::fmt::Debug for ProcessController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessController")
            .field("service", &self.descriptor.id)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .field("handles", &self.handles.len())
            .finish_non_exhaustive()
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
