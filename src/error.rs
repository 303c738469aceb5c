//! 错误处理模块
//!
//! 定义应用程序的统一错误类型

use crate::catalog::ServiceId;
use thiserror::Error;

/// Stack Supervisor 应用程序的主要错误类型
#[derive(Error, Debug)]
pub enum StackError {
    /// 配置相关错误
    #[error("配置错误: {0}")]
    Config(#[from] ConfigError),

    /// 进程监管相关错误
    #[error("监管错误: {0}")]
    Supervisor(#[from] SupervisorError),

    /// IO错误
    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),

    /// JSON序列化/反序列化错误
    #[error("JSON错误: {0}")]
    Json(#[from] serde_json::Error),

    /// 其他错误
    #[error("其他错误: {0}")]
    Other(#[from] anyhow::Error),
}

/// 配置错误类型
#[derive(Error, Debug)]
pub enum ConfigError {
    /// 配置文件解析错误
    #[error("配置文件解析失败: {0}")]
    ParseError(String),

    /// 配置验证错误
    #[error("配置验证失败: {0}")]
    ValidationError(String),

    /// 配置文件不存在
    #[error("配置文件不存在: {path}")]
    FileNotFound { path: String },

    /// 环境变量替换错误
    #[error("环境变量替换失败: {var}")]
    EnvVarError { var: String },
}

/// 进程监管错误类型
///
/// 其中 `NotInstalled`、`NotRunning`、`AlreadyRunning`、`NoPoolsConfigured`、
/// `ConfigMissing` 属于预期的运行状态，只记录日志并给出提示；
/// `LaunchFailure`、`CrashAfterStart` 属于真正的故障，会交给错误接收器展示。
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SupervisorError {
    /// 未知服务
    #[error("未知服务: {name}")]
    UnknownService { name: String },

    /// 服务未安装（可执行文件不存在）
    #[error("[{service}] 未安装")]
    NotInstalled { service: ServiceId },

    /// 服务已在运行
    #[error("[{service}] 已经在运行")]
    AlreadyRunning { service: ServiceId },

    /// 服务未运行
    #[error("[{service}] 未运行")]
    NotRunning { service: ServiceId },

    /// 操作系统无法创建进程
    #[error("[{service}] 启动失败: {reason}")]
    LaunchFailure { service: ServiceId, reason: String },

    /// 运行中意外退出
    #[error("[{service}] 启动后意外退出: {status}")]
    CrashAfterStart { service: ServiceId, status: String },

    /// 优雅停止超时
    #[error("[{service}] 停止超时 ({timeout_ms} 毫秒)")]
    ShutdownTimeout { service: ServiceId, timeout_ms: u64 },

    /// 进程池配置文件不存在
    #[error("进程池配置文件不存在: {path}")]
    ConfigMissing { path: String },

    /// 进程池配置中没有回环地址的条目
    #[error("未找到可启动的本地进程池，至少需要一个 localhost 或 127.0.0.1 地址")]
    NoPoolsConfigured,

    /// 进程池配置格式错误
    #[error("进程池配置无效: {0}")]
    InvalidPoolConfig(String),

    /// 服务不支持该操作
    #[error("[{service}] 不支持操作: {operation}")]
    Unsupported {
        service: ServiceId,
        operation: &'static str,
    },

    /// 监管任务不可用
    #[error("监管任务不可用")]
    Unavailable,
}

impl SupervisorError {
    /// 是否为预期的运行状态（仅记录日志，不作为故障上报）
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            SupervisorError::NotInstalled { .. }
                | SupervisorError::NotRunning { .. }
                | SupervisorError::AlreadyRunning { .. }
                | SupervisorError::NoPoolsConfigured
                | SupervisorError::ConfigMissing { .. }
        )
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, StackError>;

/// 监管操作结果类型别名
pub type SupervisorResult<T> = std::result::Result<T, SupervisorError>;
