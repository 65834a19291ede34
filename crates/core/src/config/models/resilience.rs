use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::circuit_breaker::CircuitBreakerConfig;
use crate::dead_letter::DEFAULT_DEAD_LETTER_CAPACITY;

/// 重试策略配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// 最大尝试次数（包含第一次）
    pub max_attempts: u32,
    /// 首次重试前的等待（毫秒）
    pub initial_delay_ms: u64,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 最大等待（毫秒）
    pub max_delay_ms: u64,
    /// 随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            backoff_multiplier: 2.0,
            max_delay_ms: 60_000,
            jitter_factor: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow::anyhow!("最大尝试次数必须大于0"));
        }
        if self.backoff_multiplier < 1.0 {
            return Err(anyhow::anyhow!("退避倍数不能小于1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter_factor) {
            return Err(anyhow::anyhow!("抖动范围必须在0.0到1.0之间"));
        }
        if self.max_delay_ms < self.initial_delay_ms {
            return Err(anyhow::anyhow!("最大等待不能小于首次等待"));
        }
        Ok(())
    }

    /// 第 `attempt` 次失败后的等待时间（attempt 从1开始）
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let base = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = base.min(self.max_delay_ms as f64);

        // 添加随机抖动以避免雷群效应
        let jitter = capped * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let delay = (capped + jitter).clamp(0.0, self.max_delay_ms as f64);
        Duration::from_millis(delay as u64)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// 新建熔断器的默认配置
    pub circuit_breaker: CircuitBreakerConfig,
    /// 新建死信队列的默认容量
    pub dead_letter_capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            circuit_breaker: CircuitBreakerConfig::default(),
            dead_letter_capacity: DEFAULT_DEAD_LETTER_CAPACITY,
            retry: RetryPolicy::default(),
        }
    }
}

impl ResilienceConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.circuit_breaker.validate()?;
        if self.dead_letter_capacity == 0 {
            return Err(anyhow::anyhow!("死信队列容量必须大于0"));
        }
        self.retry.validate()
    }
}
