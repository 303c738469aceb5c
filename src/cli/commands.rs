//! 命令处理逻辑
//!
//! 实现各种CLI命令的处理逻辑

use crate::catalog::{LaunchSpec, ServiceCatalog, ServiceId};
use crate::cli::args::{Args, Commands, OutputFormat};
use crate::config::{Config, ConfigLoader, TomlConfigLoader, TomlSettings};
use crate::error::Result;
use crate::logging::{parse_level, LogConfig, LoggingSystem};
use crate::notification::BroadcastSink;
use crate::pool::{JsonPoolConfigSource, PoolConfigSource, PoolSpawner, PoolingMode};
use crate::supervisor::signal_handler::{setup_signal_handlers, wait_for_shutdown};
use crate::supervisor::Supervisor;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// 命令处理器trait
#[async_trait]
pub trait Command: Send + Sync {
    /// 执行命令
    async fn execute(&self, args: &Args) -> Result<()>;
}

/// 按命令行参数加载配置
///
/// 显式指定的配置文件必须存在，否则回退到默认位置或内置默认值
pub async fn load_config(args: &Args) -> Result<Config> {
    let loader = TomlConfigLoader::new(true);
    loader.load_or_default(args.config.as_deref()).await
}

/// 组合日志配置
///
/// 命令行的 `--log-level` 优先，其次是配置文件中的 `global.log_level`
pub fn log_config_for(args: &Args, config: Option<&Config>) -> LogConfig {
    let level = match (&args.log_level, config) {
        (Some(level), _) => level.clone().into(),
        (None, Some(config)) => parse_level(&config.global.log_level),
        (None, None) => log::LevelFilter::Info,
    };

    LogConfig {
        level,
        console: true,
        json_format: args.json_logs,
        ..Default::default()
    }
}

fn build_catalog(config: &Config) -> Result<ServiceCatalog> {
    let settings = TomlSettings::from_config(config)?;
    Ok(ServiceCatalog::from_settings(&settings))
}

/// 前台监管命令
pub struct RunCommand;

#[async_trait]
impl Command for RunCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let Commands::Run { services } = &args.command else {
            return Ok(());
        };

        let config = load_config(args).await?;
        let targets = self.resolve_targets(services, &config)?;
        let supervisor = Supervisor::from_config(&config)?;

        info!(
            "安装目录: {}，已安装服务: {:?}",
            supervisor.catalog().root().display(),
            supervisor.installed_services()
        );

        // 通知经广播通道交给日志系统输出
        let sink = Arc::new(BroadcastSink::new(256));
        supervisor.subscribe(sink.clone());
        supervisor.subscribe_errors(sink.clone());
        let mut notifications = sink.subscribe();
        drop(sink);

        let log_config = LoggingSystem::current_config().unwrap_or_default();
        let logging = LoggingSystem::setup_logging(log_config)?;
        let log_task = tokio::spawn(async move {
            loop {
                match notifications.recv().await {
                    Ok(notification) => logging.notification_log(&notification),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("通知处理过慢，丢弃了 {} 条通知", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        let (shutdown_tx, _) = broadcast::channel(4);
        let shutdown_rx = shutdown_tx.subscribe();
        let (handle, task) = supervisor.spawn(shutdown_tx.subscribe());
        setup_signal_handlers(shutdown_tx.clone()).await?;

        for service in targets {
            if let Err(e) = handle.start(service).await {
                warn!("[{}] 启动失败: {}", service, e);
            }
        }

        info!("所有服务已提交启动，按 Ctrl+C 停止");
        wait_for_shutdown(shutdown_rx).await;

        task.await
            .map_err(|e| anyhow::anyhow!("监管任务异常退出: {e}"))?;
        if let Err(e) = log_task.await {
            warn!("通知日志任务异常退出: {e}");
        }

        info!("已停止所有服务");
        Ok(())
    }
}

impl RunCommand {
    /// 解析要启动的服务，未指定时使用 autostart 列表
    fn resolve_targets(&self, services: &[String], config: &Config) -> Result<Vec<ServiceId>> {
        let names: &[String] = if services.is_empty() {
            &config.global.autostart
        } else {
            services
        };

        let mut targets = Vec::with_capacity(names.len());
        for name in names {
            let id: ServiceId = name.parse()?;
            if !targets.contains(&id) {
                targets.push(id);
            }
        }
        Ok(targets)
    }
}

/// 列出服务目录
pub struct ListCommand;

#[async_trait]
impl Command for ListCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let Commands::List { format } = &args.command else {
            return Ok(());
        };

        let config = load_config(args).await?;
        let catalog = build_catalog(&config)?;

        match format {
            OutputFormat::Json => {
                let entries: Vec<_> = catalog
                    .descriptors()
                    .map(|d| {
                        serde_json::json!({
                            "service": d.id,
                            "name": d.display_name,
                            "installed": d.is_installed(),
                            "executable": d.executable_path,
                            "working_dir": d.working_dir,
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&entries)?);
            }
            OutputFormat::Text => {
                println!("安装目录: {}", catalog.root().display());
                for descriptor in catalog.descriptors() {
                    let mark = if descriptor.is_installed() { "✓" } else { "✗" };
                    println!(
                        "  {} {:<12} {}",
                        mark,
                        descriptor.id.as_str(),
                        descriptor.executable_path.display()
                    );
                }
            }
        }

        Ok(())
    }
}

/// 验证命令
pub struct ValidateCommand;

#[async_trait]
impl Command for ValidateCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Validate {
            config_path,
            verbose,
        } = &args.command
        {
            let config_file = config_path
                .clone()
                .unwrap_or_else(|| args.get_config_path());

            self.validate_config_file(&config_file, *verbose).await
        } else {
            Ok(())
        }
    }
}

impl ValidateCommand {
    /// 验证配置文件
    async fn validate_config_file(&self, config_path: &Path, verbose: bool) -> Result<()> {
        println!("验证配置文件: {}", config_path.display());

        let loader = TomlConfigLoader::new(true);
        let config = loader.load_from_file(config_path).await?;

        if verbose {
            let catalog = build_catalog(&config)?;
            println!("配置验证通过！");
            println!("全局配置:");
            println!("  日志级别: {}", config.global.log_level);
            println!("  自动启动: {}", config.global.autostart.join(", "));
            println!("  安装目录: {}", catalog.root().display());
            println!("监管参数:");
            println!("  确认延迟: {}ms", config.supervisor.settle_delay_ms);
            println!("  停止超时: {}ms", config.supervisor.stop_timeout_ms);
            println!("  重载超时: {}ms", config.supervisor.reload_timeout_ms);
            println!("已安装服务:");
            for service in catalog.installed_services() {
                println!("  - {}", service);
            }
        } else {
            println!("✓ 配置文件验证通过");
        }

        Ok(())
    }
}

/// 进程池计划命令
pub struct PoolsCommand;

#[async_trait]
impl Command for PoolsCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        let Commands::Pools { format } = &args.command else {
            return Ok(());
        };

        let config = load_config(args).await?;
        let catalog = build_catalog(&config)?;
        let descriptor = catalog.resolve(ServiceId::Php)?;
        let LaunchSpec::Pooled(launch) = &descriptor.launch else {
            return Err(anyhow::anyhow!("{} 不是以进程池方式启动的服务", descriptor.id).into());
        };

        let upstreams = JsonPoolConfigSource::new(&launch.pool_config).load().await?;
        let pools = upstreams.loopback_pools();
        let spawner = PoolSpawner::default();
        let mode = spawner.detect_mode(launch).await;
        let plans = match spawner.plan(&descriptor, launch, mode, &pools) {
            Ok(plans) => plans,
            Err(e) => {
                warn!("无法生成启动命令: {}", e);
                Vec::new()
            }
        };

        match format {
            OutputFormat::Json => {
                let entries: Vec<_> = pools
                    .iter()
                    .map(|(port, workers)| {
                        let command = plans
                            .iter()
                            .find(|p| p.port == *port)
                            .map(|p| p.invocation.command_line());
                        serde_json::json!({
                            "port": port,
                            "workers": workers,
                            "command": command,
                        })
                    })
                    .collect();
                let output = serde_json::json!({
                    "config": launch.pool_config,
                    "mode": mode_name(mode),
                    "pools": entries,
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            OutputFormat::Text => {
                println!("上游配置: {}", launch.pool_config.display());
                println!("进程池模式: {}", mode_name(mode));
                if pools.is_empty() {
                    println!("未配置本地进程池");
                }
                for plan in &plans {
                    println!(
                        "  127.0.0.1:{} x{}  {}",
                        plan.port,
                        plan.workers,
                        plan.invocation.command_line()
                    );
                }
            }
        }

        Ok(())
    }
}

fn mode_name(mode: PoolingMode) -> &'static str {
    match mode {
        PoolingMode::Native => "native",
        PoolingMode::Helper => "helper",
    }
}

/// 版本命令
pub struct VersionCommand;

#[async_trait]
impl Command for VersionCommand {
    async fn execute(&self, args: &Args) -> Result<()> {
        if let Commands::Version { format } = &args.command {
            match format {
                OutputFormat::Json => {
                    let version_info = serde_json::json!({
                        "name": crate::APP_NAME,
                        "version": crate::VERSION,
                        "description": crate::APP_DESCRIPTION
                    });
                    println!("{}", serde_json::to_string_pretty(&version_info)?);
                }
                OutputFormat::Text => {
                    println!("{} v{}", crate::APP_NAME, crate::VERSION);
                    println!("{}", crate::APP_DESCRIPTION);
                }
            }
        }
        Ok(())
    }
}

/// 根据子命令选择处理器
pub fn command_for(args: &Args) -> Box<dyn Command> {
    match &args.command {
        Commands::Run { .. } => Box::new(RunCommand),
        Commands::List { .. } => Box::new(ListCommand),
        Commands::Validate { .. } => Box::new(ValidateCommand),
        Commands::Pools { .. } => Box::new(PoolsCommand),
        Commands::Version { .. } => Box::new(VersionCommand),
    }
}
