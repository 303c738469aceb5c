//! 通知接收器
//!
//! 定义状态通知和进程错误的接收接口以及基础实现

use crate::catalog::ServiceId;
use crate::process::ServiceState;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// 服务进入运行状态后需要刷新的信息
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefreshKind {
    /// 版本号
    Version,
    /// 监听端口
    Port,
}

/// 进程错误类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessErrorKind {
    FailedToStart,
    Crashed,
    TimedOut,
    WriteError,
    ReadError,
    Unknown,
}

impl ProcessErrorKind {
    /// 面向用户的错误说明
    pub fn message(&self) -> &'static str {
        match self {
            ProcessErrorKind::FailedToStart => {
                "The process failed to start. Either the invoked program is missing, or you may have insufficient permissions to invoke the program."
            }
            ProcessErrorKind::Crashed => "The process crashed some time after starting successfully.",
            ProcessErrorKind::TimedOut => "The process timed out.",
            ProcessErrorKind::WriteError => {
                "An error occurred when attempting to write to the process. For example, the process may not be running, or it may have closed its input channel."
            }
            ProcessErrorKind::ReadError => {
                "An error occurred when attempting to read from the process. For example, the process may not be running."
            }
            ProcessErrorKind::Unknown => "An unknown error occurred.",
        }
    }
}

/// 监管器对外发布的通知
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SupervisorNotification {
    /// 服务状态变更
    ServiceStatus {
        service: ServiceId,
        state: ServiceState,
        running: bool,
        timestamp: DateTime<Utc>,
    },
    /// 请求刷新服务信息
    RefreshRequested {
        service: ServiceId,
        kind: RefreshKind,
        timestamp: DateTime<Utc>,
    },
    /// 工具可用性变化
    ToolingChanged {
        enabled: bool,
        timestamp: DateTime<Utc>,
    },
    /// 进程错误
    ProcessError {
        service: ServiceId,
        kind: ProcessErrorKind,
        message: String,
        timestamp: DateTime<Utc>,
    },
    /// 提示信息
    Notice {
        service: ServiceId,
        message: String,
        timestamp: DateTime<Utc>,
    },
}

/// 状态通知接收器trait
pub trait NotificationSink: Send + Sync {
    /// 服务状态变更
    fn status_changed(&self, service: ServiceId, state: ServiceState);

    /// 服务进入运行状态后请求刷新信息
    fn refresh_requested(&self, service: ServiceId, kind: RefreshKind);

    /// 工具可用性变化
    fn tooling_changed(&self, enabled: bool);

    /// 提示信息（如服务已在运行）
    fn notice(&self, _service: ServiceId, _message: &str) {}
}

/// 进程错误接收器trait
pub trait ErrorSink: Send + Sync {
    fn process_error(&self, service: ServiceId, kind: ProcessErrorKind, message: &str);
}

/// 通过 tokio 广播通道转发通知
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<SupervisorNotification>,
}

impl BroadcastSink {
    /// 创建新的广播接收器
    ///
    /// # 参数
    /// * `capacity` - 通道容量
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// 订阅通知
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorNotification> {
        self.tx.subscribe()
    }

    fn publish(&self, notification: SupervisorNotification) {
        // 没有订阅者时丢弃
        let _ = self.tx.send(notification);
    }
}

impl NotificationSink for BroadcastSink {
    fn status_changed(&self, service: ServiceId, state: ServiceState) {
        self.publish(SupervisorNotification::ServiceStatus {
            service,
            state,
            running: state.is_running(),
            timestamp: Utc::now(),
        });
    }

    fn refresh_requested(&self, service: ServiceId, kind: RefreshKind) {
        self.publish(SupervisorNotification::RefreshRequested {
            service,
            kind,
            timestamp: Utc::now(),
        });
    }

    fn tooling_changed(&self, enabled: bool) {
        self.publish(SupervisorNotification::ToolingChanged {
            enabled,
            timestamp: Utc::now(),
        });
    }

    fn notice(&self, service: ServiceId, message: &str) {
        self.publish(SupervisorNotification::Notice {
            service,
            message: message.to_string(),
            timestamp: Utc::now(),
        });
    }
}

impl ErrorSink for BroadcastSink {
    fn process_error(&self, service: ServiceId, kind: ProcessErrorKind, message: &str) {
        self.publish(SupervisorNotification::ProcessError {
            service,
            kind,
            message: message.to_string(),
            timestamp: Utc::now(),
        });
    }
}
