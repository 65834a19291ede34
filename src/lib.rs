//! 进程内Agent编排运行时
//!
//! 组合 Worker 注册表、任务路由、周期调度器和弹性组件，
//! 由 [`Orchestrator`] 统一创建、启动和关闭。

pub mod app;
pub mod shutdown;

pub use app::{Orchestrator, OrchestratorStatus};
pub use orchestrator_core::AppConfig;
pub use shutdown::ShutdownManager;
