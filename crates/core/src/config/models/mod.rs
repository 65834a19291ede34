pub mod app_config;
pub mod dispatcher_worker;
pub mod observability;
pub mod resilience;

// Re-export main types for easier imports
pub use app_config::AppConfig;
pub use dispatcher_worker::{RegistryConfig, RouterConfig, SchedulerConfig};
pub use observability::LoggingConfig;
pub use resilience::{ResilienceConfig, RetryPolicy};
