//! 服务目录模块
//!
//! 定义受监管服务的标识、描述以及按安装设置构建的服务目录

pub mod descriptor;
pub mod registry;

pub use descriptor::{
    Invocation, LaunchSpec, LivenessStrategy, PoolLaunch, Preparation, ServiceDescriptor,
    ServiceId, StopMethod,
};
pub use registry::ServiceCatalog;
