use std::collections::VecDeque;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::rate_limiter::{RateLimiter, RateLimiterConfig};
use crate::{OrchestratorError, OrchestratorResult};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed - normal operation
    Closed,
    /// Circuit is open - calls fail fast
    Open,
    /// Circuit is half-open - trial calls decide whether the resource recovered
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Failures inside the window that open the circuit
    pub failure_threshold: usize,
    /// Consecutive half-open successes that close the circuit
    pub success_threshold: usize,
    /// Time spent open before a trial call is allowed
    pub open_timeout_seconds: u64,
    /// Length of the failure-counting window
    pub window_seconds: u64,
    /// Maximum failure timestamps kept in the window
    pub failure_window_capacity: usize,
    /// Optional per-call timeout, counted as a failure when exceeded
    pub call_timeout_seconds: Option<u64>,
    pub rate_limit: RateLimiterConfig,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 2,
            open_timeout_seconds: 60,
            window_seconds: 60,
            failure_window_capacity: 100,
            call_timeout_seconds: None,
            rate_limit: RateLimiterConfig::default(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.failure_threshold == 0 {
            return Err(anyhow::anyhow!("失败阈值必须大于0"));
        }
        if self.success_threshold == 0 {
            return Err(anyhow::anyhow!("恢复成功阈值必须大于0"));
        }
        if self.window_seconds == 0 {
            return Err(anyhow::anyhow!("失败统计窗口必须大于0"));
        }
        if self.failure_window_capacity < self.failure_threshold {
            return Err(anyhow::anyhow!(
                "失败窗口容量({})不能小于失败阈值({})",
                self.failure_window_capacity,
                self.failure_threshold
            ));
        }
        if self.call_timeout_seconds == Some(0) {
            return Err(anyhow::anyhow!("调用超时时间必须大于0"));
        }
        self.rate_limit.validate()
    }

    fn open_timeout(&self) -> Duration {
        Duration::from_secs(self.open_timeout_seconds)
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// Point-in-time view of a breaker, safe to serialize for operational tooling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerMetrics {
    pub name: String,
    pub state: CircuitState,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    pub rejected_calls: u64,
    pub success_rate: f64,
    pub consecutive_successes: usize,
    pub consecutive_failures: usize,
    pub recent_failure_count: usize,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_opened_at: Option<DateTime<Utc>>,
    pub last_half_opened_at: Option<DateTime<Utc>>,
    pub last_closed_at: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_window: VecDeque<Instant>,
    consecutive_successes: usize,
    consecutive_failures: usize,
    opened_at: Option<Instant>,
    total_calls: u64,
    successful_calls: u64,
    failed_calls: u64,
    rejected_calls: u64,
    last_failure_at: Option<DateTime<Utc>>,
    last_success_at: Option<DateTime<Utc>>,
    last_opened_at: Option<DateTime<Utc>>,
    last_half_opened_at: Option<DateTime<Utc>>,
    last_closed_at: Option<DateTime<Utc>>,
}

impl BreakerState {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_window: VecDeque::new(),
            consecutive_successes: 0,
            consecutive_failures: 0,
            opened_at: None,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            rejected_calls: 0,
            last_failure_at: None,
            last_success_at: None,
            last_opened_at: None,
            last_half_opened_at: None,
            last_closed_at: None,
        }
    }

    fn success_rate(&self) -> f64 {
        if self.total_calls == 0 {
            1.0
        } else {
            self.successful_calls as f64 / self.total_calls as f64
        }
    }
}

/// Circuit breaker - wraps calls to one downstream resource and fails fast
/// while that resource is considered unhealthy. Owns the resource's rate limiter.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
    limiter: RateLimiter,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, CircuitBreakerConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        let limiter = RateLimiter::new(config.rate_limit.clone());
        Self {
            name: name.into(),
            config,
            state: Mutex::new(BreakerState::new()),
            limiter,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute operation with rate limiting and circuit breaker protection.
    ///
    /// An open circuit is rejected before waiting on the limiter. Errors from
    /// `operation` are recorded and returned unchanged.
    pub async fn call<F, Fut, T>(&self, operation: F) -> OrchestratorResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = OrchestratorResult<T>>,
    {
        self.ensure_not_open().await?;
        self.limiter.acquire().await;
        // state may have moved while waiting for a token
        self.ensure_not_open().await?;
        self.run_recorded(operation).await
    }

    /// 不等待令牌的调用：桶空时直接返回 `RateLimited`，不计入失败
    pub async fn try_call<F, Fut, T>(&self, operation: F) -> OrchestratorResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = OrchestratorResult<T>>,
    {
        self.ensure_not_open().await?;
        if !self.limiter.try_acquire().await {
            counter!("orchestrator_rate_limited_total", "breaker" => self.name.clone())
                .increment(1);
            return Err(OrchestratorError::RateLimited {
                name: self.name.clone(),
            });
        }
        self.run_recorded(operation).await
    }

    async fn run_recorded<F, Fut, T>(&self, operation: F) -> OrchestratorResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = OrchestratorResult<T>>,
    {
        let result = match self.config.call_timeout_seconds {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), operation()).await
            {
                Ok(result) => result,
                Err(_) => Err(OrchestratorError::Timeout(format!(
                    "{} call exceeded {}s",
                    self.name, secs
                ))),
            },
            None => operation().await,
        };

        match &result {
            Ok(_) => self.record_success().await,
            Err(e) => {
                debug!("Circuit breaker {} recorded failure: {}", self.name, e);
                self.record_failure().await;
            }
        }
        result
    }

    async fn ensure_not_open(&self) -> OrchestratorResult<()> {
        let mut state = self.state.lock().await;
        self.evaluate(&mut state, Instant::now());
        if state.state == CircuitState::Open {
            state.rejected_calls += 1;
            counter!("orchestrator_circuit_breaker_rejections_total", "breaker" => self.name.clone())
                .increment(1);
            return Err(OrchestratorError::circuit_open(&self.name));
        }
        Ok(())
    }

    /// Record successful call
    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        state.total_calls += 1;
        state.successful_calls += 1;
        state.consecutive_successes += 1;
        state.consecutive_failures = 0;
        state.last_success_at = Some(Utc::now());
        self.evaluate(&mut state, Instant::now());
    }

    /// Record failed call
    pub async fn record_failure(&self) {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        state.total_calls += 1;
        state.failed_calls += 1;
        state.consecutive_failures += 1;
        state.consecutive_successes = 0;
        state.last_failure_at = Some(Utc::now());

        while state.failure_window.len() >= self.config.failure_window_capacity.max(1) {
            state.failure_window.pop_front();
        }
        state.failure_window.push_back(now);

        if state.state == CircuitState::HalfOpen {
            // any failure during the trial reopens the circuit
            self.transition(&mut state, CircuitState::Open, now);
        } else {
            self.evaluate(&mut state, now);
        }
    }

    fn prune_window(&self, state: &mut BreakerState, now: Instant) {
        let window = self.config.window();
        while let Some(oldest) = state.failure_window.front() {
            if now.saturating_duration_since(*oldest) > window {
                state.failure_window.pop_front();
            } else {
                break;
            }
        }
    }

    fn evaluate(&self, state: &mut BreakerState, now: Instant) {
        self.prune_window(state, now);
        match state.state {
            CircuitState::Closed => {
                if state.failure_window.len() >= self.config.failure_threshold {
                    self.transition(state, CircuitState::Open, now);
                }
            }
            CircuitState::Open => {
                let opened_at = state.opened_at.unwrap_or(now);
                if now.saturating_duration_since(opened_at) >= self.config.open_timeout() {
                    self.transition(state, CircuitState::HalfOpen, now);
                }
            }
            CircuitState::HalfOpen => {
                if state.consecutive_successes >= self.config.success_threshold {
                    self.transition(state, CircuitState::Closed, now);
                }
            }
        }
    }

    fn transition(&self, state: &mut BreakerState, next: CircuitState, now: Instant) {
        let previous = state.state;
        state.state = next;
        match next {
            CircuitState::Open => {
                state.opened_at = Some(now);
                state.last_opened_at = Some(Utc::now());
                warn!(
                    "Circuit breaker {} opened ({:?} -> Open, {} recent failures)",
                    self.name,
                    previous,
                    state.failure_window.len()
                );
            }
            CircuitState::HalfOpen => {
                state.consecutive_successes = 0;
                state.last_half_opened_at = Some(Utc::now());
                info!("Circuit breaker {} half-open, allowing trial calls", self.name);
            }
            CircuitState::Closed => {
                state.opened_at = None;
                state.failure_window.clear();
                state.last_closed_at = Some(Utc::now());
                info!("Circuit breaker {} closed", self.name);
            }
        }
    }

    /// Get current circuit state, applying any time-based transition first
    pub async fn state(&self) -> CircuitState {
        let mut state = self.state.lock().await;
        self.evaluate(&mut state, Instant::now());
        state.state
    }

    pub async fn metrics(&self) -> CircuitBreakerMetrics {
        let mut state = self.state.lock().await;
        self.evaluate(&mut state, Instant::now());
        CircuitBreakerMetrics {
            name: self.name.clone(),
            state: state.state,
            total_calls: state.total_calls,
            successful_calls: state.successful_calls,
            failed_calls: state.failed_calls,
            rejected_calls: state.rejected_calls,
            success_rate: state.success_rate(),
            consecutive_successes: state.consecutive_successes,
            consecutive_failures: state.consecutive_failures,
            recent_failure_count: state.failure_window.len(),
            last_failure_at: state.last_failure_at,
            last_success_at: state.last_success_at,
            last_opened_at: state.last_opened_at,
            last_half_opened_at: state.last_half_opened_at,
            last_closed_at: state.last_closed_at,
        }
    }

    /// Reset circuit breaker to closed state and clear all counters
    pub async fn reset(&self) {
        let mut state = self.state.lock().await;
        *state = BreakerState::new();
        drop(state);
        self.limiter.reset().await;
        info!("Circuit breaker {} reset", self.name);
    }

    /// Force open circuit (for maintenance)
    pub async fn force_open(&self) {
        let mut state = self.state.lock().await;
        self.transition(&mut state, CircuitState::Open, Instant::now());
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }
}
