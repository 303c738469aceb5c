//! 通知模块
//!
//! 提供服务状态通知、工具可用性汇总和进程错误分发功能

pub mod hub;
pub mod sink;

// 重新导出主要类型
pub use hub::StateHub;
pub use sink::{
    BroadcastSink, ErrorSink, NotificationSink, ProcessErrorKind, RefreshKind,
    SupervisorNotification,
};
