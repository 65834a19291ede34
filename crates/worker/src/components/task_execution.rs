use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use serde_json::json;
use tokio::time::Instant;
use tracing::{error, info, warn};

use orchestrator_core::config::RetryPolicy;
use orchestrator_core::resilience::{CircuitBreakerRegistry, DeadLetterRegistry};
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_dispatcher::{TaskRouter, WorkerRegistry};

/// 任务失败记录默认写入的死信队列
pub const DEFAULT_TASK_DEAD_LETTER_QUEUE: &str = "tasks";

/// 执行已分配的任务并把结果回报给路由和注册表
///
/// 执行经过指定名称的熔断器，可重试的错误按重试策略指数退避后重试；
/// 最终失败的任务写入死信队列。
pub struct TaskExecutionManager {
    router: Arc<TaskRouter>,
    registry: Arc<WorkerRegistry>,
    breakers: Arc<CircuitBreakerRegistry>,
    dead_letters: Arc<DeadLetterRegistry>,
    retry_policy: RetryPolicy,
    dead_letter_queue: String,
}

impl TaskExecutionManager {
    pub fn new(
        router: Arc<TaskRouter>,
        registry: Arc<WorkerRegistry>,
        breakers: Arc<CircuitBreakerRegistry>,
        dead_letters: Arc<DeadLetterRegistry>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            router,
            registry,
            breakers,
            dead_letters,
            retry_policy,
            dead_letter_queue: DEFAULT_TASK_DEAD_LETTER_QUEUE.to_string(),
        }
    }

    pub fn with_dead_letter_queue(mut self, name: impl Into<String>) -> Self {
        self.dead_letter_queue = name.into();
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn dead_letter_queue(&self) -> &str {
        &self.dead_letter_queue
    }

    /// 在 `worker_id` 上执行已分配给它的任务
    ///
    /// 任务必须处于 ASSIGNED 状态且分配给该Worker。返回操作的最终结果；
    /// 无论成功与否，任务都会被标记为结束。
    pub async fn execute<F, Fut>(
        &self,
        task_id: &str,
        worker_id: &str,
        breaker_name: &str,
        operation: F,
    ) -> OrchestratorResult<serde_json::Value>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = OrchestratorResult<serde_json::Value>>,
    {
        let task = self
            .router
            .get_task(task_id)
            .await
            .ok_or_else(|| OrchestratorError::unknown_task(task_id))?;
        if task.assigned_worker.as_deref() != Some(worker_id) {
            return Err(OrchestratorError::validation_error(format!(
                "任务 {task_id} 未分配给Worker {worker_id}"
            )));
        }
        if !self.router.start(task_id).await {
            return Err(OrchestratorError::InvalidStatus(format!(
                "任务 {task_id} 当前状态为 {}，无法开始执行",
                task.status
            )));
        }

        let breaker = self.breakers.get_or_create(breaker_name, None).await;
        let started = Instant::now();
        let max_attempts = self.retry_policy.max_attempts.max(1);
        let mut attempts = 0;

        let result = loop {
            attempts += 1;
            match breaker.call(&operation).await {
                Ok(value) => break Ok(value),
                Err(e) if e.is_retryable() && attempts < max_attempts => {
                    let delay = self.retry_policy.delay_for_attempt(attempts);
                    warn!(
                        task_id = %task_id,
                        "任务第 {} 次执行失败: {}，{:?} 后重试",
                        attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break Err(e),
            }
        };

        let duration_ms = started.elapsed().as_secs_f64() * 1000.0;
        let reported = match &result {
            Ok(value) => {
                info!(task_id = %task_id, worker_id = %worker_id, "任务执行成功 (尝试 {} 次)", attempts);
                self.router.complete(task_id, Some(value.clone()), None).await
            }
            Err(e) => {
                error!(task_id = %task_id, worker_id = %worker_id, "任务最终失败 (尝试 {} 次): {}", attempts, e);
                self.router.complete(task_id, None, Some(e.to_string())).await
            }
        };
        if !reported {
            warn!(
                task_id = %task_id,
                worker_id = %worker_id,
                "任务在执行期间已被取消或结束，执行结果未写回路由"
            );
        }

        if !self
            .registry
            .record_execution(worker_id, duration_ms, result.is_ok())
            .await
        {
            warn!("Worker {} 已不在注册表中，无法记录执行结果", worker_id);
        }

        if let Err(e) = &result {
            let context = HashMap::from([
                ("task_id".to_string(), json!(task_id)),
                ("worker_id".to_string(), json!(worker_id)),
                ("attempts".to_string(), json!(attempts)),
                ("breaker".to_string(), json!(breaker_name)),
                ("parameters".to_string(), json!(task.parameters)),
            ]);
            self.dead_letters
                .get_or_create(&self.dead_letter_queue, None)
                .await
                .add(format!("task:{}", task.capability), e, context)
                .await;
        }

        result
    }
}
