//! 监管器
//!
//! 为每个服务持有一个控制器，统一处理用户命令和进程事件，
//! 并按错误策略决定哪些错误只记录日志、哪些返回给调用方。

pub mod signal_handler;

use crate::catalog::{ServiceCatalog, ServiceId};
use crate::config::{Config, TomlSettings};
use crate::error::{Result, SupervisorError, SupervisorResult};
use crate::notification::{ErrorSink, NotificationSink, StateHub};
use crate::pool::PoolConfigSource;
use crate::process::{
    ControllerOptions, EventReceiver, ProcessController, ProcessEvent, ServiceState,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// 发给监管任务的命令
#[derive(Debug)]
pub enum SupervisorCommand {
    Start {
        service: ServiceId,
        reply: oneshot::Sender<SupervisorResult<()>>,
    },
    Stop {
        service: ServiceId,
        reply: oneshot::Sender<SupervisorResult<()>>,
    },
    Restart {
        service: ServiceId,
        reply: oneshot::Sender<SupervisorResult<()>>,
    },
    Reload {
        service: ServiceId,
        reply: oneshot::Sender<SupervisorResult<()>>,
    },
    State {
        service: ServiceId,
        reply: oneshot::Sender<SupervisorResult<ServiceState>>,
    },
    States {
        reply: oneshot::Sender<BTreeMap<ServiceId, ServiceState>>,
    },
    StopAll {
        reply: oneshot::Sender<()>,
    },
}

/// 监管器
pub struct Supervisor {
    catalog: ServiceCatalog,
    controllers: BTreeMap<ServiceId, ProcessController>,
    hub: Arc<StateHub>,
    events_rx: EventReceiver,
}

enum Step {
    Event(ProcessEvent),
    Command(Option<SupervisorCommand>),
    Shutdown,
}

impl Supervisor {
    /// 创建新的监管器
    ///
    /// # 参数
    /// * `catalog` - 服务目录
    /// * `options` - 控制器参数
    pub fn new(catalog: ServiceCatalog, options: ControllerOptions) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let tooling = catalog
            .descriptors()
            .filter(|d| d.tooling_dependency)
            .map(|d| d.id)
            .collect();
        let hub = Arc::new(StateHub::new(tooling));

        let controllers = catalog
            .descriptors()
            .map(|descriptor| {
                (
                    descriptor.id,
                    ProcessController::new(
                        Arc::clone(descriptor),
                        options.clone(),
                        Arc::clone(&hub),
                        events_tx.clone(),
                    ),
                )
            })
            .collect();

        Self {
            catalog,
            controllers,
            hub,
            events_rx,
        }
    }

    /// 根据配置创建监管器
    pub fn from_config(config: &Config) -> Result<Self> {
        let settings = TomlSettings::from_config(config)?;
        let catalog = ServiceCatalog::from_settings(&settings);
        Ok(Self::new(catalog, ControllerOptions::from_config(config)))
    }

    pub fn catalog(&self) -> &ServiceCatalog {
        &self.catalog
    }

    pub fn hub(&self) -> Arc<StateHub> {
        Arc::clone(&self.hub)
    }

    /// 注册状态通知接收器
    pub fn subscribe(&self, sink: Arc<dyn NotificationSink>) {
        self.hub.subscribe(sink);
    }

    /// 注册进程错误接收器
    pub fn subscribe_errors(&self, sink: Arc<dyn ErrorSink>) {
        self.hub.subscribe_errors(sink);
    }

    /// 替换以进程池方式启动的服务的配置来源
    pub fn set_pool_source(&mut self, service: ServiceId, source: Arc<dyn PoolConfigSource>) {
        if let Some(controller) = self.controllers.get_mut(&service) {
            controller.set_pool_source(source);
        }
    }

    /// 已安装的服务
    pub fn installed_services(&self) -> Vec<ServiceId> {
        self.catalog.installed_services()
    }

    fn controller_mut(&mut self, service: ServiceId) -> SupervisorResult<&mut ProcessController> {
        self.controllers
            .get_mut(&service)
            .ok_or_else(|| SupervisorError::UnknownService {
                name: service.as_str().to_string(),
            })
    }

    /// 控制器（只读）
    pub fn controller(&self, service: ServiceId) -> Option<&ProcessController> {
        self.controllers.get(&service)
    }

    /// 启动服务
    ///
    /// 服务已在运行时返回 `AlreadyRunning`；未安装、没有可启动的进程池
    /// 或进程池配置缺失只记录日志并给出提示
    pub async fn start(&mut self, service: ServiceId) -> SupervisorResult<()> {
        let hub = Arc::clone(&self.hub);
        let result = self.controller_mut(service)?.start().await;

        match result {
            Ok(()) => Ok(()),
            Err(err @ SupervisorError::AlreadyRunning { .. }) => {
                info!("{}", err);
                hub.notice(service, &err.to_string());
                Err(err)
            }
            Err(err) if err.is_operational() => {
                warn!("[{}] {}", service, err);
                hub.notice(service, &err.to_string());
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// 停止服务，未运行或未安装时不视为错误
    pub async fn stop(&mut self, service: ServiceId) -> SupervisorResult<()> {
        match self.controller_mut(service)?.stop().await {
            Ok(()) => Ok(()),
            Err(
                err @ (SupervisorError::NotRunning { .. } | SupervisorError::NotInstalled { .. }),
            ) => {
                debug!("{}", err);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// 重启服务
    pub async fn restart(&mut self, service: ServiceId) -> SupervisorResult<()> {
        self.stop(service).await?;
        self.start(service).await
    }

    /// 重新加载服务配置
    pub async fn reload(&mut self, service: ServiceId) -> SupervisorResult<()> {
        self.controller_mut(service)?.reload().await
    }

    /// 查询服务状态
    pub fn state_of(&mut self, service: ServiceId) -> SupervisorResult<ServiceState> {
        let controller = self.controller_mut(service)?;
        controller.reconcile();
        Ok(controller.state())
    }

    /// 已安装服务的状态
    ///
    /// 是否安装在每次查询时重新判断，安装目录中新出现的服务会直接出现在结果中
    pub fn states(&mut self) -> BTreeMap<ServiceId, ServiceState> {
        self.controllers
            .iter_mut()
            .filter(|(_, controller)| controller.descriptor().is_installed())
            .map(|(id, controller)| {
                controller.reconcile();
                (*id, controller.state())
            })
            .collect()
    }

    /// 停止所有运行中的服务
    pub async fn stop_all(&mut self) {
        for (id, controller) in self.controllers.iter_mut() {
            controller.reconcile();
            if !controller.state().is_active() {
                continue;
            }
            if let Err(e) = controller.stop().await {
                error!("[{}] 停止失败: {}", id, e);
            }
        }
    }

    /// 处理进程事件
    pub async fn handle_event(&mut self, event: ProcessEvent) {
        let service = event.service();
        let Some(controller) = self.controllers.get_mut(&service) else {
            warn!("收到未知服务的进程事件: {:?}", service);
            return;
        };

        match event {
            ProcessEvent::Exited(report) => controller.handle_exit(report).await,
        }
    }

    /// 处理所有已到达的进程事件，返回处理数量
    pub async fn process_pending_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    /// 在超时时间内等待并处理一个进程事件
    pub async fn next_event(&mut self, timeout: Duration) -> bool {
        match tokio::time::timeout(timeout, self.events_rx.recv()).await {
            Ok(Some(event)) => {
                self.handle_event(event).await;
                true
            }
            _ => false,
        }
    }

    async fn execute(&mut self, command: SupervisorCommand) {
        // 调用方已放弃等待时忽略回复失败
        match command {
            SupervisorCommand::Start { service, reply } => {
                let _ = reply.send(self.start(service).await);
            }
            SupervisorCommand::Stop { service, reply } => {
                let _ = reply.send(self.stop(service).await);
            }
            SupervisorCommand::Restart { service, reply } => {
                let _ = reply.send(self.restart(service).await);
            }
            SupervisorCommand::Reload { service, reply } => {
                let _ = reply.send(self.reload(service).await);
            }
            SupervisorCommand::State { service, reply } => {
                let _ = reply.send(self.state_of(service));
            }
            SupervisorCommand::States { reply } => {
                let _ = reply.send(self.states());
            }
            SupervisorCommand::StopAll { reply } => {
                self.stop_all().await;
                let _ = reply.send(());
            }
        }
    }

    /// 运行监管循环，直到收到关闭信号或命令通道关闭，退出前停止所有服务
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<SupervisorCommand>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        info!("监管任务已启动");

        loop {
            let step = tokio::select! {
                Some(event) = self.events_rx.recv() => Step::Event(event),
                command = commands.recv() => Step::Command(command),
                _ = shutdown.recv() => Step::Shutdown,
            };

            match step {
                Step::Event(event) => self.handle_event(event).await,
                Step::Command(Some(command)) => self.execute(command).await,
                Step::Command(None) => {
                    debug!("命令通道已关闭");
                    break;
                }
                Step::Shutdown => {
                    info!("接收到关闭信号，停止所有服务...");
                    break;
                }
            }
        }

        self.stop_all().await;
        info!("监管任务已退出");
    }

    /// 在后台任务中运行监管器
    ///
    /// # 返回
    /// * 命令句柄和任务句柄
    pub fn spawn(
        self,
        shutdown: broadcast::Receiver<()>,
    ) -> (SupervisorHandle, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(32);
        let task = tokio::spawn(self.run(rx, shutdown));
        (SupervisorHandle { tx }, task)
    }
}

/// 监管任务的命令句柄
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    tx: mpsc::Sender<SupervisorCommand>,
}

impl SupervisorHandle {
    pub fn new(tx: mpsc::Sender<SupervisorCommand>) -> Self {
        Self { tx }
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> SupervisorCommand,
    ) -> SupervisorResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| SupervisorError::Unavailable)?;
        rx.await.map_err(|_| SupervisorError::Unavailable)
    }

    pub async fn start(&self, service: ServiceId) -> SupervisorResult<()> {
        self.request(|reply| SupervisorCommand::Start { service, reply })
            .await?
    }

    pub async fn stop(&self, service: ServiceId) -> SupervisorResult<()> {
        self.request(|reply| SupervisorCommand::Stop { service, reply })
            .await?
    }

    pub async fn restart(&self, service: ServiceId) -> SupervisorResult<()> {
        self.request(|reply| SupervisorCommand::Restart { service, reply })
            .await?
    }

    pub async fn reload(&self, service: ServiceId) -> SupervisorResult<()> {
        self.request(|reply| SupervisorCommand::Reload { service, reply })
            .await?
    }

    pub async fn state(&self, service: ServiceId) -> SupervisorResult<ServiceState> {
        self.request(|reply| SupervisorCommand::State { service, reply })
            .await?
    }

    pub async fn states(&self) -> SupervisorResult<BTreeMap<ServiceId, ServiceState>> {
        self.request(|reply| SupervisorCommand::States { reply }).await
    }

    pub async fn stop_all(&self) -> SupervisorResult<()> {
        self.request(|reply| SupervisorCommand::StopAll { reply }).await
    }
}
