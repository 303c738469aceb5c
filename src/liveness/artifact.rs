//! 基于外部文件的存活检测

use crate::catalog::LivenessStrategy;
use crate::liveness::LivenessProbe;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// 以外部文件是否存在判断存活
#[derive(Debug, Clone)]
pub struct ArtifactFileProbe {
    path: PathBuf,
    settle_delay: Duration,
}

impl ArtifactFileProbe {
    /// 创建新的文件检测器
    ///
    /// # 参数
    /// * `path` - 服务运行期间存在的文件
    /// * `settle_delay` - 启动器退出后等待服务写入文件的时间
    pub fn new(path: PathBuf, settle_delay: Duration) -> Self {
        Self { path, settle_delay }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl LivenessProbe for ArtifactFileProbe {
    fn strategy(&self) -> LivenessStrategy {
        LivenessStrategy::ExternalArtifact {
            path: self.path.clone(),
        }
    }

    fn is_running(&self, _handle_alive: bool) -> bool {
        self.path.is_file()
    }

    fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    fn outlives_launcher(&self) -> bool {
        true
    }

    fn clear_stale(&self) -> io::Result<bool> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }
}
