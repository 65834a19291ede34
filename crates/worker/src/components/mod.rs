pub mod task_execution;

pub use task_execution::{TaskExecutionManager, DEFAULT_TASK_DEAD_LETTER_QUEUE};
