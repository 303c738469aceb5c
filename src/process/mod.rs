//! 进程管理模块
//!
//! 提供进程句柄、一次性命令执行和服务生命周期状态机

pub mod command;
pub mod controller;
pub mod handle;
pub mod logs;
pub mod state;

pub use command::{run_command, CommandOutcome};
pub use controller::{ControllerOptions, ProcessController};
pub use handle::{EventReceiver, EventSender, ExitOutcome, ExitReport, ProcessEvent, ProcessHandle};
pub use state::ServiceState;
