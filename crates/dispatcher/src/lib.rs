//! 任务分发：Worker注册表、Worker选择策略、心跳失效检测以及任务路由。

pub mod strategies;
pub mod task_router;
pub mod worker_failure_detector;
pub mod worker_registry;

pub use strategies::{IdleFirstStrategy, LoadBasedStrategy, WorkerSelectionStrategy};
pub use task_router::{
    RouterSnapshot, RouterStatistics, SubscriptionId, TaskEventCallback, TaskRouter,
};
pub use worker_failure_detector::WorkerFailureDetector;
pub use worker_registry::{RegistrySnapshot, RegistryStats, WorkerRegistry};
