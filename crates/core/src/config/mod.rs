//! 配置管理
//!
//! 配置按“默认值 → TOML文件 → 环境变量”的顺序叠加，加载完成后整体校验。
//! 各组件只接收属于自己的配置段。

pub mod models;

pub use models::{
    AppConfig, LoggingConfig, RegistryConfig, ResilienceConfig, RetryPolicy, RouterConfig,
    SchedulerConfig,
};

#[cfg(test)]
mod tests;
