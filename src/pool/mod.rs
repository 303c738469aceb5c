//! 进程池模块
//!
//! 读取上游配置并为本机的每个 FastCGI 进程池启动进程

pub mod config;
pub mod spawner;

pub use config::{
    JsonPoolConfigSource, PoolConfigSource, StaticPoolConfigSource, UpstreamConfig, UpstreamPool,
    UpstreamServer,
};
pub use spawner::{PoolPlan, PoolSpawner, PoolingMode, NATIVE_POOLING_MIN_VERSION};
