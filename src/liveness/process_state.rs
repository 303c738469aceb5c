use crate::catalog::LivenessStrategy;
use crate::liveness::LivenessProbe;

/// 以进程状态判断存活
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessStateProbe;

impl LivenessProbe for ProcessStateProbe {
    fn strategy(&self) -> LivenessStrategy {
        LivenessStrategy::ProcessState
    }

    fn is_running(&self, handle_alive: bool) -> bool {
        handle_alive
    }
}
