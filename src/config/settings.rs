//! 安装设置查询接口
//!
//! 服务目录只依赖 `section/key` 形式的键值查询，不关心设置如何持久化

use crate::config::types::Config;
use crate::error::{ConfigError, Result};
use std::collections::HashMap;
use std::path::PathBuf;

/// 设置来源trait
pub trait SettingsSource: Send + Sync {
    /// 按 `section/key` 路径读取设置值
    fn get(&self, path: &str) -> Option<String>;

    /// 读取设置值，不存在时使用默认值
    fn get_or(&self, path: &str, default: &str) -> String {
        self.get(path).unwrap_or_else(|| default.to_string())
    }

    /// 读取布尔设置
    fn get_bool(&self, path: &str) -> Option<bool> {
        self.get(path).and_then(|value| value.trim().parse().ok())
    }

    /// 读取路径设置
    fn get_path(&self, path: &str) -> Option<PathBuf> {
        self.get(path)
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
    }
}

/// 基于 TOML 表的设置来源
#[derive(Debug, Clone, Default)]
pub struct TomlSettings {
    table: toml::Table,
}

impl TomlSettings {
    /// 从已加载的配置构建查询表
    pub fn from_config(config: &Config) -> Result<Self> {
        let value = toml::Value::try_from(config)
            .map_err(|e| ConfigError::ParseError(format!("配置转换失败: {e}")))?;

        match value {
            toml::Value::Table(table) => Ok(Self { table }),
            _ => Err(ConfigError::ParseError("配置根节点必须是表".to_string()).into()),
        }
    }
}

impl SettingsSource for TomlSettings {
    fn get(&self, path: &str) -> Option<String> {
        let mut segments = path.split('/');
        let mut current = self.table.get(segments.next()?)?;

        for segment in segments {
            current = current.as_table()?.get(segment)?;
        }

        match current {
            toml::Value::String(value) => Some(value.clone()),
            toml::Value::Integer(value) => Some(value.to_string()),
            toml::Value::Float(value) => Some(value.to_string()),
            toml::Value::Boolean(value) => Some(value.to_string()),
            other => Some(other.to_string()),
        }
    }
}

impl SettingsSource for HashMap<String, String> {
    fn get(&self, path: &str) -> Option<String> {
        HashMap::get(self, path).cloned()
    }
}
