//! 服务描述定义
//!
//! 描述每个受监管服务的静态信息：可执行文件、启动/停止方式、存活检测策略等

use crate::error::SupervisorError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// 受监管的服务标识
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceId {
    Nginx,
    Php,
    MariaDb,
    MongoDb,
    Memcached,
    PostgreSql,
    Redis,
}

impl ServiceId {
    /// 目录中的全部服务
    pub const ALL: [ServiceId; 7] = [
        ServiceId::Nginx,
        ServiceId::Php,
        ServiceId::MariaDb,
        ServiceId::MongoDb,
        ServiceId::Memcached,
        ServiceId::PostgreSql,
        ServiceId::Redis,
    ];

    /// 规范的小写键名（同时用作设置键名）
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceId::Nginx => "nginx",
            ServiceId::Php => "php",
            ServiceId::MariaDb => "mariadb",
            ServiceId::MongoDb => "mongodb",
            ServiceId::Memcached => "memcached",
            ServiceId::PostgreSql => "postgresql",
            ServiceId::Redis => "redis",
        }
    }

    /// 展示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            ServiceId::Nginx => "Nginx",
            ServiceId::Php => "PHP",
            ServiceId::MariaDb => "MariaDb",
            ServiceId::MongoDb => "MongoDb",
            ServiceId::Memcached => "Memcached",
            ServiceId::PostgreSql => "PostgreSQL",
            ServiceId::Redis => "Redis",
        }
    }

    /// 安装根目录下 `bin/` 中的默认目录名
    pub fn default_dir_name(&self) -> &'static str {
        match self {
            ServiceId::PostgreSql => "pgsql",
            other => other.as_str(),
        }
    }
}

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

impl FromStr for ServiceId {
    type Err = SupervisorError;

    /// 解析服务名称，接受规范键名、展示名称以及进程名别名
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nginx" => Ok(ServiceId::Nginx),
            "php" | "php-cgi" => Ok(ServiceId::Php),
            "mariadb" | "mysqld" => Ok(ServiceId::MariaDb),
            "mongodb" | "mongod" => Ok(ServiceId::MongoDb),
            "memcached" => Ok(ServiceId::Memcached),
            "postgresql" | "postgres" | "pgsql" => Ok(ServiceId::PostgreSql),
            "redis" | "redis-server" => Ok(ServiceId::Redis),
            _ => Err(SupervisorError::UnknownService {
                name: s.to_string(),
            }),
        }
    }
}

/// 一次进程调用：程序路径、参数和附加环境变量
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub env: Vec<(String, String)>,
}

impl Invocation {
    /// 创建新的调用
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    /// 追加参数
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// 追加路径参数
    pub fn path_arg(self, path: &Path) -> Self {
        let value = path.display().to_string();
        self.arg(value)
    }

    /// 追加环境变量
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// 用于日志输出的命令行
    pub fn command_line(&self) -> String {
        let mut line = self.program.display().to_string();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// 进程池方式启动的参数（PHP FastCGI）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolLaunch {
    /// 用于探测版本的解释器
    pub runtime: PathBuf,
    /// 每个进程池实际运行的 FastCGI 程序
    pub worker: PathBuf,
    /// 上游进程池配置文件
    pub pool_config: PathBuf,
    /// 旧版本使用的派生工具
    pub spawn_helper: PathBuf,
    /// 强制指定的进程池模式
    pub native_pooling: Option<bool>,
    /// 所有工作进程共享的环境变量
    pub env: Vec<(String, String)>,
}

/// 启动方式
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LaunchSpec {
    /// 单个进程
    Single(Invocation),
    /// 按上游配置为每个进程池启动一个进程
    Pooled(PoolLaunch),
}

/// 停止方式
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StopMethod {
    /// 执行专用的优雅停止命令
    Command(Invocation),
    /// 直接终止进程
    Kill,
}

/// 存活检测策略
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LivenessStrategy {
    /// 以被监管进程是否存活为准
    ProcessState,
    /// 以外部文件是否存在为准（启动器会在服务就绪后退出）
    ExternalArtifact { path: PathBuf },
}

/// 启动前必须存在的目录和文件
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Preparation {
    pub dirs: Vec<PathBuf>,
    pub files: Vec<PathBuf>,
}

/// 服务描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    pub id: ServiceId,
    pub display_name: String,
    /// 主可执行文件（用于判断是否安装）
    pub executable_path: PathBuf,
    pub working_dir: PathBuf,
    /// 服务写入的日志文件，可能为空
    pub log_files: Vec<PathBuf>,
    pub launch: LaunchSpec,
    pub stop: StopMethod,
    /// 重新加载配置的命令
    pub reload: Option<Invocation>,
    pub liveness: LivenessStrategy,
    /// 随安装包一起提供，不检查可执行文件
    pub always_assumed_installed: bool,
    /// 参与工具可用性汇总状态
    pub tooling_dependency: bool,
    pub prepare: Preparation,
}

impl ServiceDescriptor {
    /// 服务是否已安装
    pub fn is_installed(&self) -> bool {
        self.always_assumed_installed || self.executable_path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_canonical_names() {
        for id in ServiceId::ALL {
            assert_eq!(id.as_str().parse::<ServiceId>().unwrap(), id);
        }
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("mongod".parse::<ServiceId>().unwrap(), ServiceId::MongoDb);
        assert_eq!("mysqld".parse::<ServiceId>().unwrap(), ServiceId::MariaDb);
        assert_eq!("php-cgi".parse::<ServiceId>().unwrap(), ServiceId::Php);
        assert_eq!(
            "postgres".parse::<ServiceId>().unwrap(),
            ServiceId::PostgreSql
        );
        assert_eq!(
            "redis-server".parse::<ServiceId>().unwrap(),
            ServiceId::Redis
        );
        assert_eq!("MariaDb".parse::<ServiceId>().unwrap(), ServiceId::MariaDb);
    }

    #[test]
    fn test_parse_unknown() {
        let err = "apache".parse::<ServiceId>().unwrap_err();
        assert_eq!(
            err,
            SupervisorError::UnknownService {
                name: "apache".to_string()
            }
        );
    }

    #[test]
    fn test_serde_uses_canonical_key() {
        let json = serde_json::to_string(&ServiceId::PostgreSql).unwrap();
        assert_eq!(json, "\"postgresql\"");
        assert_eq!(ServiceId::PostgreSql.to_string(), "PostgreSQL");
    }

    #[test]
    fn test_invocation_command_line() {
        let inv = Invocation::new("/opt/bin/redis-cli")
            .arg("-h")
            .arg("127.0.0.1")
            .arg("shutdown")
            .env("A", "1");
        assert_eq!(inv.command_line(), "/opt/bin/redis-cli -h 127.0.0.1 shutdown");
        assert_eq!(inv.env, vec![("A".to_string(), "1".to_string())]);
    }
}
