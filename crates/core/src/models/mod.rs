pub mod task;
pub mod worker;

pub use task::{Task, TaskEvent, TaskEventType, TaskPriority, TaskStatus};
pub use worker::{Capability, HeartbeatReport, WorkerInfo, WorkerRegistration, WorkerStatus};
