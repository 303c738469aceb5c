//! FastCGI 进程池启动
//!
//! 每个回环地址上的进程池启动一个独立进程：新版本 PHP 通过
//! `PHP_FCGI_CHILDREN` 自行派生工作进程，旧版本借助派生工具。

use crate::catalog::{Invocation, LaunchSpec, PoolLaunch, ServiceDescriptor};
use crate::error::{SupervisorError, SupervisorResult};
use crate::pool::config::PoolConfigSource;
use crate::process::command::capture_output;
use crate::process::{EventSender, ProcessHandle};
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// 支持 `PHP_FCGI_CHILDREN` 的最低版本号（PHP_VERSION_ID）
pub const NATIVE_POOLING_MIN_VERSION: u32 = 70100;

/// 进程池模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolingMode {
    /// php-cgi 自行派生工作进程
    Native,
    /// 通过派生工具启动
    Helper,
}

impl PoolingMode {
    /// 根据版本号选择模式，版本未知时使用派生工具
    pub fn for_version(version: Option<u32>) -> Self {
        match version {
            Some(v) if v >= NATIVE_POOLING_MIN_VERSION => PoolingMode::Native,
            _ => PoolingMode::Helper,
        }
    }
}

/// 单个进程池的启动计划
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolPlan {
    pub port: u16,
    pub workers: u32,
    pub invocation: Invocation,
}

/// 进程池启动器
#[derive(Debug, Clone)]
pub struct PoolSpawner {
    version_timeout: Duration,
}

impl Default for PoolSpawner {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl PoolSpawner {
    /// 创建新的进程池启动器
    ///
    /// # 参数
    /// * `version_timeout` - 版本探测命令的超时时间
    pub fn new(version_timeout: Duration) -> Self {
        Self { version_timeout }
    }

    /// 探测运行时版本号
    pub async fn detect_version(&self, launch: &PoolLaunch) -> Option<u32> {
        let probe = Invocation::new(&launch.runtime)
            .arg("-r")
            .arg("echo PHP_VERSION_ID;");
        let working_dir = launch.runtime.parent().unwrap_or(launch.runtime.as_path());

        let output = capture_output(&probe, working_dir, self.version_timeout).await?;
        output.parse().ok()
    }

    /// 确定进程池模式（配置优先，否则探测版本）
    pub async fn detect_mode(&self, launch: &PoolLaunch) -> PoolingMode {
        if let Some(native) = launch.native_pooling {
            return if native {
                PoolingMode::Native
            } else {
                PoolingMode::Helper
            };
        }

        let version = self.detect_version(launch).await;
        match version {
            Some(v) => debug!("[PHP] 检测到版本号 {}", v),
            None => warn!("[PHP] 无法检测版本号，使用派生工具启动进程池"),
        }
        PoolingMode::for_version(version)
    }

    /// 为每个进程池生成启动命令
    pub fn plan(
        &self,
        descriptor: &ServiceDescriptor,
        launch: &PoolLaunch,
        mode: PoolingMode,
        pools: &BTreeMap<u16, u32>,
    ) -> SupervisorResult<Vec<PoolPlan>> {
        if mode == PoolingMode::Helper && !launch.spawn_helper.is_file() {
            return Err(SupervisorError::LaunchFailure {
                service: descriptor.id,
                reason: format!("派生工具不存在: {}", launch.spawn_helper.display()),
            });
        }

        let plans = pools
            .iter()
            .map(|(&port, &workers)| {
                let mut invocation = match mode {
                    PoolingMode::Native => Invocation::new(&launch.worker)
                        .arg("-b")
                        .arg(format!("127.0.0.1:{port}"))
                        .env("PHP_FCGI_CHILDREN", workers.to_string()),
                    PoolingMode::Helper => Invocation::new(&launch.spawn_helper)
                        .path_arg(&launch.worker)
                        .arg(port.to_string())
                        .arg(workers.to_string()),
                };
                invocation.env.extend(launch.env.iter().cloned());

                PoolPlan {
                    port,
                    workers,
                    invocation,
                }
            })
            .collect();

        Ok(plans)
    }

    /// 按上游配置启动全部本地进程池
    ///
    /// # 参数
    /// * `descriptor` - 以进程池方式启动的服务
    /// * `source` - 上游配置来源
    /// * `generation` - 启动批次
    /// * `events` - 退出事件发送端
    ///
    /// # 返回
    /// * `SupervisorResult<Vec<ProcessHandle>>` - 每个进程池一个句柄
    pub async fn spawn_pools(
        &self,
        descriptor: &ServiceDescriptor,
        source: &dyn PoolConfigSource,
        generation: u64,
        events: &EventSender,
    ) -> SupervisorResult<Vec<ProcessHandle>> {
        let LaunchSpec::Pooled(launch) = &descriptor.launch else {
            return Err(SupervisorError::Unsupported {
                service: descriptor.id,
                operation: "pool",
            });
        };

        let config = source.load().await?;
        let pools = config.loopback_pools();
        if pools.is_empty() {
            return Err(SupervisorError::NoPoolsConfigured);
        }

        let mode = self.detect_mode(launch).await;
        let plans = self.plan(descriptor, launch, mode, &pools)?;

        let mut handles = Vec::with_capacity(plans.len());
        let mut last_error = None;

        for plan in plans {
            let label = format!("php-cgi:{}", plan.port);
            match ProcessHandle::spawn(
                descriptor.id,
                generation,
                label,
                &plan.invocation,
                &descriptor.working_dir,
                events.clone(),
            ) {
                Ok(handle) => {
                    info!(
                        "[{}] 进程池已启动: 端口 {}，工作进程 {} 个 ({:?})",
                        descriptor.id, plan.port, plan.workers, mode
                    );
                    handles.push(handle);
                }
                Err(e) => {
                    error!("[{}] 端口 {} 的进程池启动失败: {}", descriptor.id, plan.port, e);
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) if handles.is_empty() => Err(e),
            _ => Ok(handles),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ServiceCatalog;
    use crate::catalog::ServiceId;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn php_descriptor(root: &std::path::Path) -> ServiceDescriptor {
        let settings = HashMap::from([("paths/root".to_string(), root.display().to_string())]);
        let catalog = ServiceCatalog::from_settings(&settings);
        catalog.resolve(ServiceId::Php).unwrap().as_ref().clone()
    }

    fn pool_launch(descriptor: &ServiceDescriptor) -> PoolLaunch {
        match &descriptor.launch {
            LaunchSpec::Pooled(launch) => launch.clone(),
            other => panic!("unexpected launch spec: {other:?}"),
        }
    }

    #[test]
    fn test_mode_for_version() {
        assert_eq!(PoolingMode::for_version(Some(80210)), PoolingMode::Native);
        assert_eq!(PoolingMode::for_version(Some(70100)), PoolingMode::Native);
        assert_eq!(PoolingMode::for_version(Some(70033)), PoolingMode::Helper);
        assert_eq!(PoolingMode::for_version(None), PoolingMode::Helper);
    }

    #[test]
    fn test_native_plan() {
        let temp = TempDir::new().unwrap();
        let descriptor = php_descriptor(temp.path());
        let launch = pool_launch(&descriptor);
        let pools = BTreeMap::from([(9100, 4), (9101, 2)]);

        let plans = PoolSpawner::default()
            .plan(&descriptor, &launch, PoolingMode::Native, &pools)
            .unwrap();

        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].invocation.args, vec!["-b", "127.0.0.1:9100"]);
        assert!(plans[0]
            .invocation
            .env
            .contains(&("PHP_FCGI_CHILDREN".to_string(), "4".to_string())));
        assert!(plans[1]
            .invocation
            .env
            .contains(&("PHP_FCGI_MAX_REQUESTS".to_string(), "0".to_string())));
    }

    #[test]
    fn test_helper_plan_requires_helper() {
        let temp = TempDir::new().unwrap();
        let descriptor = php_descriptor(temp.path());
        let launch = pool_launch(&descriptor);
        let pools = BTreeMap::from([(9100, 4)]);

        let err = PoolSpawner::default()
            .plan(&descriptor, &launch, PoolingMode::Helper, &pools)
            .unwrap_err();
        assert!(matches!(err, SupervisorError::LaunchFailure { service: ServiceId::Php, .. }));

        std::fs::create_dir_all(launch.spawn_helper.parent().unwrap()).unwrap();
        std::fs::write(&launch.spawn_helper, b"").unwrap();

        let plans = PoolSpawner::default()
            .plan(&descriptor, &launch, PoolingMode::Helper, &pools)
            .unwrap();
        assert_eq!(plans[0].invocation.program, launch.spawn_helper);
        assert_eq!(
            plans[0].invocation.args,
            vec![launch.worker.display().to_string(), "9100".to_string(), "4".to_string()]
        );
    }

    #[tokio::test]
    async fn test_forced_mode_skips_detection() {
        let temp = TempDir::new().unwrap();
        let descriptor = php_descriptor(temp.path());
        let mut launch = pool_launch(&descriptor);

        launch.native_pooling = Some(true);
        assert_eq!(
            PoolSpawner::default().detect_mode(&launch).await,
            PoolingMode::Native
        );

        launch.native_pooling = None;
        // 运行时不存在时无法探测版本
        assert_eq!(
            PoolSpawner::default().detect_mode(&launch).await,
            PoolingMode::Helper
        );
    }
}
