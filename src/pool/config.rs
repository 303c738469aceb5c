//! 上游进程池配置
//!
//! 解析 nginx 上游配置的 JSON 描述，得到需要在本机启动的进程池

use crate::error::{SupervisorError, SupervisorResult};
use async_trait::async_trait;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// 上游配置文档
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(default)]
    pub pools: BTreeMap<String, UpstreamPool>,
}

/// 单个上游进程池
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamPool {
    #[serde(default, deserialize_with = "deserialize_servers")]
    pub servers: Vec<UpstreamServer>,
}

/// 上游服务器条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamServer {
    pub address: String,
    #[serde(deserialize_with = "deserialize_number")]
    pub port: u16,
    #[serde(
        rename = "workerCount",
        alias = "phpchildren",
        default = "default_worker_count",
        deserialize_with = "deserialize_number"
    )]
    pub worker_count: u32,
}

impl UpstreamServer {
    /// 地址是否为本机回环地址
    pub fn is_loopback(&self) -> bool {
        let address = self.address.trim();
        address.eq_ignore_ascii_case("localhost") || address == "127.0.0.1"
    }
}

fn default_worker_count() -> u32 {
    1
}

/// `servers` 可以是数组，也可以是以序号为键的对象
fn deserialize_servers<'de, D>(deserializer: D) -> Result<Vec<UpstreamServer>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Servers {
        List(Vec<UpstreamServer>),
        Indexed(BTreeMap<String, UpstreamServer>),
    }

    Ok(match Servers::deserialize(deserializer)? {
        Servers::List(servers) => servers,
        Servers::Indexed(map) => {
            let mut entries: Vec<(String, UpstreamServer)> = map.into_iter().collect();
            entries.sort_by_key(|(key, _)| key.parse::<u64>().unwrap_or(u64::MAX));
            entries.into_iter().map(|(_, server)| server).collect()
        }
    })
}

/// 数值字段可以是数字或数字字符串
fn deserialize_number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<u64>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }

    let value = match Raw::deserialize(deserializer)? {
        Raw::Number(n) => n,
        Raw::Text(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|e| de::Error::custom(format!("无效的数值 {s:?}: {e}")))?,
    };

    T::try_from(value).map_err(|_| de::Error::custom(format!("数值超出范围: {value}")))
}

impl UpstreamConfig {
    /// 解析 JSON 文本
    pub fn from_json(content: &str) -> SupervisorResult<Self> {
        serde_json::from_str(content).map_err(|e| SupervisorError::InvalidPoolConfig(e.to_string()))
    }

    /// 绑定在回环地址上的进程池：端口 -> 工作进程数
    ///
    /// 非回环地址的条目由其他主机负责，不在本机启动
    pub fn loopback_pools(&self) -> BTreeMap<u16, u32> {
        self.pools
            .values()
            .flat_map(|pool| pool.servers.iter())
            .filter(|server| server.is_loopback())
            .map(|server| (server.port, server.worker_count))
            .collect()
    }
}

/// 进程池配置来源trait
#[async_trait]
pub trait PoolConfigSource: Send + Sync {
    /// 读取最新的上游配置
    async fn load(&self) -> SupervisorResult<UpstreamConfig>;
}

/// 从 JSON 文件读取上游配置
#[derive(Debug, Clone)]
pub struct JsonPoolConfigSource {
    path: PathBuf,
}

impl JsonPoolConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}

#[async_trait]
impl PoolConfigSource for JsonPoolConfigSource {
    async fn load(&self) -> SupervisorResult<UpstreamConfig> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(SupervisorError::ConfigMissing {
                    path: self.path.display().to_string(),
                });
            }
            Err(e) => {
                return Err(SupervisorError::InvalidPoolConfig(format!(
                    "读取 {} 失败: {e}",
                    self.path.display()
                )));
            }
        };

        UpstreamConfig::from_json(&content)
    }
}

/// 固定的上游配置（用于嵌入调用或测试）
#[derive(Debug, Clone, Default)]
pub struct StaticPoolConfigSource {
    config: UpstreamConfig,
}

impl StaticPoolConfigSource {
    pub fn new(config: UpstreamConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl PoolConfigSource for StaticPoolConfigSource {
    async fn load(&self) -> SupervisorResult<UpstreamConfig> {
        Ok(self.config.clone())
    }
}
