//! 编排运行时的基础组件：错误、配置、日志、数据模型以及容错原语
//! （限流器、熔断器、死信队列）。

pub mod circuit_breaker;
pub mod config;
pub mod dead_letter;
pub mod errors;
pub mod logging;
pub mod models;
pub mod rate_limiter;
pub mod resilience;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
pub use config::{
    AppConfig, LoggingConfig, RegistryConfig, ResilienceConfig, RetryPolicy, RouterConfig,
    SchedulerConfig,
};
pub use dead_letter::{DeadLetterEntry, DeadLetterQueue, DEFAULT_DEAD_LETTER_CAPACITY};
pub use errors::{OrchestratorError, OrchestratorResult};
pub use logging::{init_logging, init_logging_from_config};
pub use models::{
    Capability, HeartbeatReport, Task, TaskEvent, TaskEventType, TaskPriority, TaskStatus,
    WorkerInfo, WorkerRegistration, WorkerStatus,
};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};
pub use resilience::{CircuitBreakerRegistry, DeadLetterRegistry};
