//! 存活检测模块
//!
//! 判断服务是否仍在运行。大多数服务以被监管进程本身为准；
//! 启动器会先退出的服务则以外部文件（如 PID 文件）为准。

pub mod artifact;
pub mod process_state;

pub use artifact::ArtifactFileProbe;
pub use process_state::ProcessStateProbe;

use crate::catalog::LivenessStrategy;
use std::fmt::Debug;
use std::io;
use std::time::Duration;

/// 存活检测trait
pub trait LivenessProbe: Debug + Send + Sync {
    /// 检测策略
    fn strategy(&self) -> LivenessStrategy;

    /// 服务是否在运行
    ///
    /// # 参数
    /// * `handle_alive` - 被监管的进程是否仍然存活
    fn is_running(&self, handle_alive: bool) -> bool;

    /// 启动器退出后、首次检查前的等待时间
    fn settle_delay(&self) -> Duration {
        Duration::ZERO
    }

    /// 服务进程是否会比启动器存活更久
    fn outlives_launcher(&self) -> bool {
        false
    }

    /// 删除残留的外部文件，返回是否删除了文件
    fn clear_stale(&self) -> io::Result<bool> {
        Ok(false)
    }
}

/// 根据服务描述中的策略创建检测器
pub fn probe_for(strategy: &LivenessStrategy, settle_delay: Duration) -> Box<dyn LivenessProbe> {
    match strategy {
        LivenessStrategy::ProcessState => Box::new(ProcessStateProbe),
        LivenessStrategy::ExternalArtifact { path } => {
            Box::new(ArtifactFileProbe::new(path.clone(), settle_delay))
        }
    }
}
