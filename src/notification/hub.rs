//! 状态汇总
//!
//! 记录每个服务的最新状态，向所有接收器分发通知，并在工具依赖服务
//! 的整体运行状态发生翻转时发布工具可用性变化。

use crate::catalog::ServiceId;
use crate::notification::sink::{ErrorSink, NotificationSink, ProcessErrorKind, RefreshKind};
use crate::process::ServiceState;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

/// 状态汇总中心
pub struct StateHub {
    sinks: RwLock<Vec<Arc<dyn NotificationSink>>>,
    error_sinks: RwLock<Vec<Arc<dyn ErrorSink>>>,
    states: Mutex<HashMap<ServiceId, ServiceState>>,
    tooling: Vec<ServiceId>,
    tooling_enabled: Mutex<bool>,
}

impl StateHub {
    /// 创建新的状态汇总中心
    ///
    /// # 参数
    /// * `tooling` - 工具可用性依赖的服务（全部运行时工具可用）
    pub fn new(tooling: Vec<ServiceId>) -> Self {
        Self {
            sinks: RwLock::new(Vec::new()),
            error_sinks: RwLock::new(Vec::new()),
            states: Mutex::new(HashMap::new()),
            tooling,
            tooling_enabled: Mutex::new(false),
        }
    }

    /// 注册状态通知接收器
    pub fn subscribe(&self, sink: Arc<dyn NotificationSink>) {
        self.sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    /// 注册进程错误接收器
    pub fn subscribe_errors(&self, sink: Arc<dyn ErrorSink>) {
        self.error_sinks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(sink);
    }

    /// 接收器回调执行期间不持有锁，回调中可以再注册接收器
    fn each_sink(&self, f: impl Fn(&dyn NotificationSink)) {
        let sinks = self
            .sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for sink in &sinks {
            f(sink.as_ref());
        }
    }

    /// 记录状态变更并分发通知
    pub fn state_changed(&self, service: ServiceId, state: ServiceState) {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(service, state);

        self.each_sink(|sink| sink.status_changed(service, state));

        if state == ServiceState::Running {
            self.each_sink(|sink| {
                sink.refresh_requested(service, RefreshKind::Version);
                sink.refresh_requested(service, RefreshKind::Port);
            });
        }

        self.update_tooling();
    }

    /// 分发进程错误
    pub fn process_error(&self, service: ServiceId, kind: ProcessErrorKind, message: &str) {
        let sinks = self
            .error_sinks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for sink in &sinks {
            sink.process_error(service, kind, message);
        }
    }

    /// 分发提示信息
    pub fn notice(&self, service: ServiceId, message: &str) {
        self.each_sink(|sink| sink.notice(service, message));
    }

    /// 服务最近一次记录的状态
    pub fn state_of(&self, service: ServiceId) -> ServiceState {
        self.states
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&service)
            .copied()
            .unwrap_or_default()
    }

    /// 当前工具是否可用
    pub fn tooling_enabled(&self) -> bool {
        *self
            .tooling_enabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn update_tooling(&self) {
        if self.tooling.is_empty() {
            return;
        }

        let enabled = {
            let states = self.states.lock().unwrap_or_else(PoisonError::into_inner);
            self.tooling
                .iter()
                .all(|id| states.get(id).is_some_and(ServiceState::is_running))
        };

        let flipped = {
            let mut current = self
                .tooling_enabled
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            let flipped = *current != enabled;
            *current = enabled;
            flipped
        };

        if flipped {
            debug!("工具可用性变化: {}", enabled);
            self.each_sink(|sink| sink.tooling_changed(enabled));
        }
    }
}

impl std::fmt::Debug for StateHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateHub")
            .field("tooling", &self.tooling)
            .field("tooling_enabled", &self.tooling_enabled())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn take(&self) -> Vec<String> {
            std::mem::take(&mut *self.events.lock().unwrap())
        }
    }

    impl NotificationSink for Recorder {
        fn status_changed(&self, service: ServiceId, state: ServiceState) {
            self.events
                .lock()
                .unwrap()
                .push(format!("status:{}:{}", service.as_str(), state));
        }

        fn refresh_requested(&self, service: ServiceId, kind: RefreshKind) {
            self.events
                .lock()
                .unwrap()
                .push(format!("refresh:{}:{:?}", service.as_str(), kind));
        }

        fn tooling_changed(&self, enabled: bool) {
            self.events
                .lock()
                .unwrap()
                .push(format!("tooling:{enabled}"));
        }
    }

    #[test]
    fn test_running_requests_refresh() {
        let hub = StateHub::new(vec![]);
        let recorder = Arc::new(Recorder::default());
        hub.subscribe(recorder.clone());

        hub.state_changed(ServiceId::Redis, ServiceState::Starting);
        hub.state_changed(ServiceId::Redis, ServiceState::Running);

        assert_eq!(
            recorder.take(),
            vec![
                "status:redis:starting",
                "status:redis:running",
                "refresh:redis:Version",
                "refresh:redis:Port",
            ]
        );
        assert_eq!(hub.state_of(ServiceId::Redis), ServiceState::Running);
        assert_eq!(hub.state_of(ServiceId::MongoDb), ServiceState::Stopped);
    }

    #[test]
    fn test_tooling_flips_only_on_change() {
        let hub = StateHub::new(vec![ServiceId::Nginx, ServiceId::Php]);
        let recorder = Arc::new(Recorder::default());
        hub.subscribe(recorder.clone());

        hub.state_changed(ServiceId::Nginx, ServiceState::Running);
        assert!(!hub.tooling_enabled());
        assert!(!recorder.take().iter().any(|e| e.starts_with("tooling")));

        hub.state_changed(ServiceId::Php, ServiceState::Running);
        assert!(hub.tooling_enabled());
        assert!(recorder.take().contains(&"tooling:true".to_string()));

        hub.state_changed(ServiceId::MariaDb, ServiceState::Running);
        assert!(!recorder.take().iter().any(|e| e.starts_with("tooling")));

        hub.state_changed(ServiceId::Php, ServiceState::Stopping);
        assert!(!hub.tooling_enabled());
        assert!(recorder.take().contains(&"tooling:false".to_string()));
    }

    #[test]
    fn test_sink_can_subscribe_from_callback() {
        struct Registrar {
            hub: Arc<StateHub>,
            late: Arc<Recorder>,
        }
        impl NotificationSink for Registrar {
            fn status_changed(&self, _service: ServiceId, _state: ServiceState) {
                self.hub.subscribe(self.late.clone());
            }
            fn refresh_requested(&self, _service: ServiceId, _kind: RefreshKind) {}
            fn tooling_changed(&self, _enabled: bool) {}
        }

        let hub = Arc::new(StateHub::new(vec![]));
        let late = Arc::new(Recorder::default());
        hub.subscribe(Arc::new(Registrar {
            hub: hub.clone(),
            late: late.clone(),
        }));

        hub.state_changed(ServiceId::Redis, ServiceState::Starting);
        // 本次分发开始后注册的接收器从下一次通知开始生效
        assert!(late.take().is_empty());

        hub.state_changed(ServiceId::Redis, ServiceState::Stopped);
        assert_eq!(late.take(), vec!["status:redis:stopped"]);
    }

    #[test]
    fn test_error_sinks_receive_errors() {
        struct Errors(Mutex<Vec<ProcessErrorKind>>);
        impl ErrorSink for Errors {
            fn process_error(&self, _service: ServiceId, kind: ProcessErrorKind, _message: &str) {
                self.0.lock().unwrap().push(kind);
            }
        }

        let hub = StateHub::new(vec![]);
        let errors = Arc::new(Errors(Mutex::new(Vec::new())));
        hub.subscribe_errors(errors.clone());

        hub.process_error(ServiceId::Memcached, ProcessErrorKind::FailedToStart, "");
        assert_eq!(
            *errors.0.lock().unwrap(),
            vec![ProcessErrorKind::FailedToStart]
        );
    }
}
