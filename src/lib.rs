//! Stack Supervisor - 本地开发环境进程监管工具
//!
//! 负责启动、停止和监控本地开发环境中的服务进程，支持：
//! - Nginx、PHP FastCGI、MariaDB、MongoDB、Memcached、PostgreSQL、Redis
//! - 按上游配置派生 PHP FastCGI 进程池
//! - 通过外部 PID 文件判断自行守护化的服务是否存活
//! - 状态变更、工具可用性和进程错误通知
//! - 结构化日志记录

pub mod catalog;
pub mod cli;
pub mod config;
pub mod error;
pub mod liveness;
pub mod logging;
pub mod notification;
pub mod pool;
pub mod process;
pub mod supervisor;

// 重新导出主要类型
pub use catalog::{ServiceCatalog, ServiceDescriptor, ServiceId};
pub use config::{Config, GlobalConfig};
pub use error::{StackError, SupervisorError};
pub use process::ServiceState;
pub use supervisor::{Supervisor, SupervisorHandle};

/// 应用程序版本信息
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// 应用程序名称
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");

/// 应用程序描述
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
