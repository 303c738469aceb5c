//! 服务生命周期状态

use serde::{Deserialize, Serialize};
use std::fmt;

/// 服务状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceState {
    /// 未运行
    #[default]
    Stopped,
    /// 已启动，等待确认
    Starting,
    /// 运行中
    Running,
    /// 正在停止
    Stopping,
    /// 运行中意外退出
    Crashed,
}

impl ServiceState {
    /// 是否处于活动状态（再次启动会被拒绝）
    pub fn is_active(&self) -> bool {
        matches!(self, ServiceState::Starting | ServiceState::Running)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, ServiceState::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Stopped => "stopped",
            ServiceState::Starting => "starting",
            ServiceState::Running => "running",
            ServiceState::Stopping => "stopping",
            ServiceState::Crashed => "crashed",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
