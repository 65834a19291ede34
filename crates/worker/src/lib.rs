//! 周期执行的Worker：`ScheduledWorker` 约定、带健康重启的调度器，
//! 以及把已分配任务经由熔断器执行并回报结果的执行管理器。

pub mod components;
pub mod scheduler;
pub mod worker;

pub use components::{TaskExecutionManager, DEFAULT_TASK_DEAD_LETTER_QUEUE};
pub use scheduler::Scheduler;
pub use worker::{HealthReport, WorkerHealth, ScheduledWorker};
