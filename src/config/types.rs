//! 配置数据结构定义
//!
//! 定义应用程序的配置结构体和验证逻辑

use crate::catalog::ServiceId;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 主配置结构
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// 全局配置项
    #[serde(default)]
    pub global: GlobalConfig,
    /// 安装路径配置
    #[serde(default)]
    pub paths: PathsConfig,
    /// 监管器参数
    #[serde(default)]
    pub supervisor: SupervisorConfig,
    /// PHP 运行时参数
    #[serde(default)]
    pub php: PhpConfig,
    /// Memcached 参数
    #[serde(default)]
    pub memcached: MemcachedConfig,
    /// Redis 参数
    #[serde(default)]
    pub redis: RedisConfig,
    /// MongoDB 参数
    #[serde(default)]
    pub mongodb: MongoDbConfig,
}

/// 全局配置结构
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GlobalConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// 启动服务前是否清空日志文件
    #[serde(default)]
    pub clear_logs_on_start: bool,
    /// `run` 命令默认启动的服务
    #[serde(default = "default_autostart")]
    pub autostart: Vec<String>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            clear_logs_on_start: false,
            autostart: default_autostart(),
        }
    }
}

/// 安装路径配置
///
/// 未配置的服务目录按 `<root>/bin/<目录名>` 推导
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    /// 安装根目录
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<PathBuf>,
    /// 日志目录
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nginx: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub php: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mariadb: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mongodb: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memcached: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postgresql: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redis: Option<PathBuf>,
}

/// 监管器参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SupervisorConfig {
    /// 启动器退出后检查 PID 文件前的等待时间（毫秒）
    #[serde(default = "default_settle_delay")]
    pub settle_delay_ms: u64,
    /// 停止服务时等待进程退出的超时时间（毫秒）
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_ms: u64,
    /// 重载配置命令的超时时间（毫秒）
    #[serde(default = "default_reload_timeout")]
    pub reload_timeout_ms: u64,
    /// nginx 上游进程池配置文件（相对路径基于安装根目录）
    #[serde(default = "default_pool_config")]
    pub pool_config: PathBuf,
    /// 旧版本 PHP 使用的进程派生工具
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spawn_helper: Option<PathBuf>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay(),
            stop_timeout_ms: default_stop_timeout(),
            reload_timeout_ms: default_reload_timeout(),
            pool_config: default_pool_config(),
            spawn_helper: None,
        }
    }
}

/// PHP 运行时参数
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PhpConfig {
    /// 强制指定是否使用 PHP_FCGI_CHILDREN 原生进程池（不配置则探测版本）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub native_pooling: Option<bool>,
}

/// Memcached 参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemcachedConfig {
    #[serde(default = "default_memcached_tcp_port")]
    pub tcpport: u16,
    #[serde(default)]
    pub udpport: u16,
    #[serde(default = "default_memcached_threads")]
    pub threads: u32,
    #[serde(default = "default_memcached_max_connections")]
    pub maxconnections: u32,
    /// 最大内存（MB）
    #[serde(default = "default_memcached_max_memory")]
    pub maxmemory: u32,
}

impl Default for MemcachedConfig {
    fn default() -> Self {
        Self {
            tcpport: default_memcached_tcp_port(),
            udpport: 0,
            threads: default_memcached_threads(),
            maxconnections: default_memcached_max_connections(),
            maxmemory: default_memcached_max_memory(),
        }
    }
}

/// Redis 参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedisConfig {
    #[serde(default = "default_redis_bind")]
    pub bind: String,
    #[serde(default = "default_redis_port")]
    pub port: u16,
    /// redis.conf 路径（默认位于 redis 目录下）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<PathBuf>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            bind: default_redis_bind(),
            port: default_redis_port(),
            config: None,
        }
    }
}

/// MongoDB 参数
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MongoDbConfig {
    #[serde(default = "default_storage_engine")]
    pub storageengine: String,
}

impl Default for MongoDbConfig {
    fn default() -> Self {
        Self {
            storageengine: default_storage_engine(),
        }
    }
}

// 默认值函数
fn default_log_level() -> String {
    "info".to_string()
}
fn default_autostart() -> Vec<String> {
    vec!["nginx".to_string(), "php".to_string(), "mariadb".to_string()]
}
fn default_settle_delay() -> u64 {
    1250
}
fn default_stop_timeout() -> u64 {
    2000
}
fn default_reload_timeout() -> u64 {
    1500
}
fn default_pool_config() -> PathBuf {
    PathBuf::from("bin/stack-supervisor/nginx-upstreams.json")
}
fn default_memcached_tcp_port() -> u16 {
    11211
}
fn default_memcached_threads() -> u32 {
    2
}
fn default_memcached_max_connections() -> u32 {
    2048
}
fn default_memcached_max_memory() -> u32 {
    512
}
fn default_redis_bind() -> String {
    "127.0.0.1".to_string()
}
fn default_redis_port() -> u16 {
    6379
}
fn default_storage_engine() -> String {
    "wiredTiger".to_string()
}

/// 配置验证函数
///
/// # 参数
/// * `config` - 要验证的配置
///
/// # 返回
/// * `Result<(), String>` - 验证结果，错误时返回错误信息
pub fn validate_config(config: &Config) -> Result<(), String> {
    // 验证日志级别
    let valid_log_levels = ["debug", "info", "warn", "error"];
    if !valid_log_levels.contains(&config.global.log_level.as_str()) {
        return Err(format!(
            "无效的日志级别: {}，支持的级别: {:?}",
            config.global.log_level, valid_log_levels
        ));
    }

    for name in &config.global.autostart {
        if name.parse::<ServiceId>().is_err() {
            return Err(format!("autostart 中包含未知服务: {name}"));
        }
    }

    if config.supervisor.stop_timeout_ms == 0 {
        return Err("停止超时时间不能为0".to_string());
    }

    if config.supervisor.reload_timeout_ms == 0 {
        return Err("重载超时时间不能为0".to_string());
    }

    if config.supervisor.settle_delay_ms > 60_000 {
        return Err("PID文件检查等待时间不能超过60秒".to_string());
    }

    if config.supervisor.pool_config.as_os_str().is_empty() {
        return Err("进程池配置文件路径不能为空".to_string());
    }

    if config.memcached.tcpport == 0 {
        return Err("Memcached TCP端口不能为0".to_string());
    }

    if config.memcached.threads == 0 {
        return Err("Memcached 线程数不能为0".to_string());
    }

    if config.redis.bind.trim().is_empty() {
        return Err("Redis 绑定地址不能为空".to_string());
    }

    if config.redis.port == 0 {
        return Err("Redis 端口不能为0".to_string());
    }

    if config.mongodb.storageengine.trim().is_empty() {
        return Err("MongoDB 存储引擎不能为空".to_string());
    }

    Ok(())
}
