//! 按名称管理的熔断器与死信队列注册表
//!
//! 每个受保护的下游资源对应一个熔断器，首次访问时惰性创建，
//! 之后同名访问始终返回同一个实例。注册表由编排上下文在进程启动时
//! 创建一次，并通过构造函数注入需要它的组件。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::info;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerMetrics};
use crate::dead_letter::DeadLetterQueue;

pub struct CircuitBreakerRegistry {
    default_config: CircuitBreakerConfig,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreakerRegistry {
    pub fn new(default_config: CircuitBreakerConfig) -> Self {
        Self {
            default_config,
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// 获取或创建熔断器；`config` 只在首次创建时生效
    pub async fn get_or_create(
        &self,
        name: &str,
        config: Option<CircuitBreakerConfig>,
    ) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().await.get(name) {
            return Arc::clone(breaker);
        }

        let mut breakers = self.breakers.write().await;
        let breaker = breakers.entry(name.to_string()).or_insert_with(|| {
            info!("创建熔断器: {}", name);
            Arc::new(CircuitBreaker::with_config(
                name,
                config.unwrap_or_else(|| self.default_config.clone()),
            ))
        });
        Arc::clone(breaker)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.breakers.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn all_metrics(&self) -> BTreeMap<String, CircuitBreakerMetrics> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.read().await.values().cloned().collect();
        let mut metrics = BTreeMap::new();
        for breaker in breakers {
            metrics.insert(breaker.name().to_string(), breaker.metrics().await);
        }
        metrics
    }

    pub async fn reset_all(&self) {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.read().await.values().cloned().collect();
        for breaker in &breakers {
            breaker.reset().await;
        }
        info!("已重置 {} 个熔断器", breakers.len());
    }
}

pub struct DeadLetterRegistry {
    default_capacity: usize,
    queues: RwLock<HashMap<String, Arc<DeadLetterQueue>>>,
}

impl Default for DeadLetterRegistry {
    fn default() -> Self {
        Self::new(crate::dead_letter::DEFAULT_DEAD_LETTER_CAPACITY)
    }
}

impl DeadLetterRegistry {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            default_capacity,
            queues: RwLock::new(HashMap::new()),
        }
    }

    /// 获取或创建死信队列；`max_size` 只在首次创建时生效
    pub async fn get_or_create(&self, name: &str, max_size: Option<usize>) -> Arc<DeadLetterQueue> {
        if let Some(queue) = self.queues.read().await.get(name) {
            return Arc::clone(queue);
        }

        let mut queues = self.queues.write().await;
        let queue = queues.entry(name.to_string()).or_insert_with(|| {
            Arc::new(DeadLetterQueue::new(
                name,
                max_size.unwrap_or(self.default_capacity),
            ))
        });
        Arc::clone(queue)
    }

    pub async fn get(&self, name: &str) -> Option<Arc<DeadLetterQueue>> {
        self.queues.read().await.get(name).cloned()
    }

    /// 每个队列当前的记录数
    pub async fn sizes(&self) -> BTreeMap<String, usize> {
        let queues: Vec<Arc<DeadLetterQueue>> = self.queues.read().await.values().cloned().collect();
        let mut sizes = BTreeMap::new();
        for queue in queues {
            sizes.insert(queue.name().to_string(), queue.len().await);
        }
        sizes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitState;

    #[tokio::test]
    async fn test_same_name_returns_same_breaker() {
        let registry = CircuitBreakerRegistry::default();
        let a = registry.get_or_create("crm_api", None).await;
        let b = registry
            .get_or_create(
                "crm_api",
                Some(CircuitBreakerConfig {
                    failure_threshold: 1,
                    ..Default::default()
                }),
            )
            .await;

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.config().failure_threshold, 5);
        assert_eq!(registry.names().await, vec!["crm_api".to_string()]);
    }

    #[tokio::test]
    async fn test_reset_all_and_metrics() {
        let registry = CircuitBreakerRegistry::new(CircuitBreakerConfig {
            failure_threshold: 1,
            ..Default::default()
        });
        let a = registry.get_or_create("a", None).await;
        let _b = registry.get_or_create("b", None).await;
        a.record_failure().await;
        assert_eq!(a.state().await, CircuitState::Open);

        let metrics = registry.all_metrics().await;
        assert_eq!(metrics.len(), 2);
        assert_eq!(metrics["a"].state, CircuitState::Open);

        registry.reset_all().await;
        assert_eq!(a.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn test_dead_letter_registry_capacity() {
        let registry = DeadLetterRegistry::new(50);
        let default_queue = registry.get_or_create("default", None).await;
        let small = registry.get_or_create("small", Some(2)).await;
        let again = registry.get_or_create("small", Some(99)).await;

        assert_eq!(default_queue.capacity(), 50);
        assert_eq!(small.capacity(), 2);
        assert!(Arc::ptr_eq(&small, &again));
    }
}
