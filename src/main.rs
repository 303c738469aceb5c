//! Stack Supervisor 主程序入口
//!
//! 本地开发环境进程监管工具

use anyhow::{Context, Result};
use clap::Parser;
use stack_supervisor::cli::{command_for, load_config, log_config_for, Args};
use stack_supervisor::logging::LoggingSystem;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // 解析命令行参数
    let args = Args::parse();

    // 初始化日志系统，配置读取失败时由具体命令报告错误
    let config = load_config(&args).await.ok();
    let log_config = log_config_for(&args, config.as_ref());

    let _logging_system = LoggingSystem::setup_logging(log_config).context("初始化日志系统失败")?;

    info!("Stack Supervisor v{} 启动", stack_supervisor::VERSION);

    // 执行命令
    if let Err(e) = command_for(&args).execute(&args).await {
        error!("命令执行失败: {}", e);
        std::process::exit(1);
    }

    Ok(())
}
