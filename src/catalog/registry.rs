//! 服务目录
//!
//! 根据安装设置生成全部服务描述，并提供查询接口

use crate::catalog::descriptor::{
    Invocation, LaunchSpec, LivenessStrategy, PoolLaunch, Preparation, ServiceDescriptor,
    ServiceId, StopMethod,
};
use crate::config::SettingsSource;
use crate::error::{SupervisorError, SupervisorResult};
use std::collections::BTreeMap;
use std::env::consts::EXE_SUFFIX;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// 服务目录
#[derive(Debug, Clone)]
pub struct ServiceCatalog {
    root: PathBuf,
    descriptors: BTreeMap<ServiceId, Arc<ServiceDescriptor>>,
}

/// 路径解析上下文
struct Layout<'a> {
    settings: &'a dyn SettingsSource,
    root: PathBuf,
    logs: PathBuf,
}

impl<'a> Layout<'a> {
    fn new(settings: &'a dyn SettingsSource) -> Self {
        let root = settings
            .get_path("paths/root")
            .map(absolutize)
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
        let logs = settings
            .get_path("paths/logs")
            .map(|p| root.join(p))
            .unwrap_or_else(|| root.join("logs"));

        Self {
            settings,
            root,
            logs,
        }
    }

    /// 服务安装目录：`paths/<id>`，默认 `<root>/bin/<目录名>`
    fn service_dir(&self, id: ServiceId) -> PathBuf {
        self.settings
            .get_path(&format!("paths/{}", id.as_str()))
            .map(|p| self.root.join(p))
            .unwrap_or_else(|| self.root.join("bin").join(id.default_dir_name()))
    }

    fn log(&self, name: &str) -> PathBuf {
        self.logs.join(name)
    }

    fn setting(&self, path: &str, default: &str) -> String {
        self.settings.get_or(path, default)
    }
}

/// 相对路径按当前目录补全
fn absolutize(path: PathBuf) -> PathBuf {
    if path.is_absolute() {
        return path;
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path,
    }
}

/// 平台相关的可执行文件路径
fn executable(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{name}{EXE_SUFFIX}"))
}

impl ServiceCatalog {
    /// 根据安装设置构建服务目录
    pub fn from_settings(settings: &dyn SettingsSource) -> Self {
        let layout = Layout::new(settings);
        let descriptors = ServiceId::ALL
            .iter()
            .map(|&id| (id, Arc::new(build_descriptor(id, &layout))))
            .collect::<BTreeMap<_, _>>();

        debug!("服务目录已构建，安装根目录: {}", layout.root.display());

        Self {
            root: layout.root,
            descriptors,
        }
    }

    /// 安装根目录
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 查找服务描述
    pub fn resolve(&self, id: ServiceId) -> SupervisorResult<Arc<ServiceDescriptor>> {
        self.descriptors
            .get(&id)
            .cloned()
            .ok_or_else(|| SupervisorError::UnknownService {
                name: id.as_str().to_string(),
            })
    }

    /// 按名称查找服务描述
    pub fn resolve_name(&self, name: &str) -> SupervisorResult<Arc<ServiceDescriptor>> {
        self.resolve(name.parse()?)
    }

    /// 已安装的服务
    pub fn installed_services(&self) -> Vec<ServiceId> {
        self.descriptors
            .values()
            .filter(|d| d.is_installed())
            .map(|d| d.id)
            .collect()
    }

    /// 全部服务描述
    pub fn descriptors(&self) -> impl Iterator<Item = &Arc<ServiceDescriptor>> {
        self.descriptors.values()
    }
}

fn build_descriptor(id: ServiceId, layout: &Layout<'_>) -> ServiceDescriptor {
    let dir = layout.service_dir(id);

    match id {
        ServiceId::Nginx => {
            let exe = executable(&dir, "nginx");
            let conf = dir.join("conf").join("nginx.conf");
            let base = Invocation::new(&exe)
                .arg("-p")
                .path_arg(&layout.root)
                .arg("-c")
                .path_arg(&conf);

            ServiceDescriptor {
                id,
                display_name: id.display_name().to_string(),
                executable_path: exe,
                working_dir: layout.root.clone(),
                log_files: vec![layout.log("error.log"), layout.log("access.log")],
                launch: LaunchSpec::Single(base.clone()),
                stop: StopMethod::Command(base.clone().arg("-s").arg("stop")),
                reload: Some(base.arg("-s").arg("reload")),
                liveness: LivenessStrategy::ProcessState,
                always_assumed_installed: true,
                tooling_dependency: true,
                prepare: Preparation::default(),
            }
        }
        ServiceId::Php => {
            let pool_config = layout.root.join(layout.setting(
                "supervisor/pool_config",
                "bin/stack-supervisor/nginx-upstreams.json",
            ));
            let spawn_helper = layout
                .settings
                .get_path("supervisor/spawn_helper")
                .map(|p| layout.root.join(p))
                .unwrap_or_else(|| executable(&layout.root.join("bin").join("tools"), "spawn"));
            let worker = executable(&dir, "php-cgi");

            ServiceDescriptor {
                id,
                display_name: id.display_name().to_string(),
                executable_path: worker.clone(),
                working_dir: dir.clone(),
                log_files: vec![layout.log("php_error.log")],
                launch: LaunchSpec::Pooled(PoolLaunch {
                    runtime: executable(&dir, "php"),
                    worker,
                    pool_config,
                    spawn_helper,
                    native_pooling: layout.settings.get_bool("php/native_pooling"),
                    env: vec![("PHP_FCGI_MAX_REQUESTS".to_string(), "0".to_string())],
                }),
                stop: StopMethod::Kill,
                reload: None,
                liveness: LivenessStrategy::ProcessState,
                always_assumed_installed: true,
                tooling_dependency: true,
                prepare: Preparation::default(),
            }
        }
        ServiceId::MariaDb => {
            let bin = dir.join("bin");
            let exe = executable(&bin, "mysqld");
            let defaults = format!("--defaults-file={}", dir.join("my.ini").display());

            ServiceDescriptor {
                id,
                display_name: id.display_name().to_string(),
                executable_path: exe.clone(),
                working_dir: dir.clone(),
                log_files: vec![layout.log("mariadb_error.log")],
                launch: LaunchSpec::Single(Invocation::new(exe).arg(defaults.clone())),
                stop: StopMethod::Command(
                    Invocation::new(executable(&bin, "mysqladmin"))
                        .arg(defaults)
                        .arg("-uroot")
                        .arg("-h127.0.0.1")
                        .arg("--protocol=tcp")
                        .arg("shutdown"),
                ),
                reload: None,
                liveness: LivenessStrategy::ProcessState,
                always_assumed_installed: true,
                tooling_dependency: false,
                prepare: Preparation::default(),
            }
        }
        ServiceId::MongoDb => {
            let bin = dir.join("bin");
            let exe = executable(&bin, "mongod");
            let data = dir.join("data").join("db");
            let log = layout.log("mongodb.log");
            let engine = layout.setting("mongodb/storageengine", "wiredTiger");

            ServiceDescriptor {
                id,
                display_name: id.display_name().to_string(),
                executable_path: exe.clone(),
                working_dir: dir.clone(),
                log_files: vec![log.clone()],
                launch: LaunchSpec::Single(
                    Invocation::new(exe)
                        .arg("--config")
                        .path_arg(&dir.join("mongodb.conf"))
                        .arg("--dbpath")
                        .path_arg(&data)
                        .arg("--logpath")
                        .path_arg(&log)
                        .arg(format!("--storageEngine={engine}"))
                        .arg("--journal"),
                ),
                stop: StopMethod::Command(
                    Invocation::new(executable(&bin, "mongo"))
                        .arg("--eval")
                        .arg("db.getSiblingDB('admin').shutdownServer()"),
                ),
                reload: None,
                liveness: LivenessStrategy::ProcessState,
                always_assumed_installed: false,
                tooling_dependency: false,
                prepare: Preparation {
                    dirs: vec![data],
                    files: vec![log],
                },
            }
        }
        ServiceId::Memcached => {
            let exe = executable(&dir, "memcached");
            let launch = Invocation::new(&exe)
                .arg("-p")
                .arg(layout.setting("memcached/tcpport", "11211"))
                .arg("-U")
                .arg(layout.setting("memcached/udpport", "0"))
                .arg("-t")
                .arg(layout.setting("memcached/threads", "2"))
                .arg("-c")
                .arg(layout.setting("memcached/maxconnections", "2048"))
                .arg("-m")
                .arg(layout.setting("memcached/maxmemory", "512"));

            ServiceDescriptor {
                id,
                display_name: id.display_name().to_string(),
                executable_path: exe,
                working_dir: dir.clone(),
                log_files: Vec::new(),
                launch: LaunchSpec::Single(launch),
                stop: StopMethod::Kill,
                reload: None,
                liveness: LivenessStrategy::ProcessState,
                always_assumed_installed: false,
                tooling_dependency: false,
                prepare: Preparation::default(),
            }
        }
        ServiceId::PostgreSql => {
            let exe = executable(&dir.join("bin"), "pg_ctl");
            let data = dir.join("data");
            let log = layout.log("postgresql.log");

            ServiceDescriptor {
                id,
                display_name: id.display_name().to_string(),
                executable_path: exe.clone(),
                working_dir: dir.clone(),
                log_files: vec![log.clone()],
                launch: LaunchSpec::Single(
                    Invocation::new(&exe)
                        .arg("--pgdata")
                        .path_arg(&data)
                        .arg("--log")
                        .path_arg(&log)
                        .arg("start"),
                ),
                stop: StopMethod::Command(
                    Invocation::new(&exe)
                        .arg("stop")
                        .arg("--pgdata")
                        .path_arg(&data)
                        .arg("--log")
                        .path_arg(&log)
                        .arg("--mode=fast")
                        .arg("-W"),
                ),
                reload: None,
                liveness: LivenessStrategy::ExternalArtifact {
                    path: data.join("postmaster.pid"),
                },
                always_assumed_installed: false,
                tooling_dependency: false,
                prepare: Preparation::default(),
            }
        }
        ServiceId::Redis => {
            let exe = executable(&dir, "redis-server");
            let config = layout
                .settings
                .get_path("redis/config")
                .map(|p| dir.join(p))
                .unwrap_or_else(|| dir.join("redis.conf"));

            ServiceDescriptor {
                id,
                display_name: id.display_name().to_string(),
                executable_path: exe.clone(),
                working_dir: dir.clone(),
                log_files: vec![layout.log("redis.log")],
                launch: LaunchSpec::Single(Invocation::new(exe).path_arg(&config)),
                stop: StopMethod::Command(
                    Invocation::new(executable(&dir, "redis-cli"))
                        .arg("-h")
                        .arg(layout.setting("redis/bind", "127.0.0.1"))
                        .arg("-p")
                        .arg(layout.setting("redis/port", "6379"))
                        .arg("shutdown"),
                ),
                reload: None,
                liveness: LivenessStrategy::ProcessState,
                always_assumed_installed: false,
                tooling_dependency: false,
                prepare: Preparation::default(),
            }
        }
    }
}
