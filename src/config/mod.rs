//! 配置管理模块
//!
//! 提供配置文件解析、验证以及供服务目录使用的设置查询接口

pub mod loader;
pub mod settings;
pub mod types;

// 重新导出主要类型
pub use loader::{get_default_config_path, ConfigLoader, TomlConfigLoader};
pub use settings::{SettingsSource, TomlSettings};
pub use types::{
    validate_config, Config, GlobalConfig, MemcachedConfig, MongoDbConfig, PathsConfig,
    PhpConfig, RedisConfig, SupervisorConfig,
};
