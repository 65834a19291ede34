//! 任务路由
//!
//! 任务在任意时刻只属于 pending / active / completed 三个集合中的一个，
//! 集合归属与任务状态始终一致：
//!
//! | 集合      | 状态                          |
//! |-----------|-------------------------------|
//! | pending   | PENDING                       |
//! | active    | ASSIGNED, RUNNING             |
//! | completed | COMPLETED, FAILED, CANCELLED  |
//!
//! 生命周期事件在状态修改完成、锁释放之后才广播给订阅者。

use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use orchestrator_core::config::RouterConfig;
use orchestrator_core::models::{
    Capability, Task, TaskEvent, TaskEventType, TaskPriority, TaskStatus,
};
use orchestrator_core::{OrchestratorError, OrchestratorResult};

use crate::worker_registry::WorkerRegistry;

/// 订阅句柄，用于取消订阅
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

/// 事件订阅者回调
pub type TaskEventCallback = Arc<dyn Fn(&TaskEvent) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouterStatistics {
    pub pending: usize,
    pub active: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
    pub total_submitted: u64,
    pub average_duration_ms: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterSnapshot {
    pub pending: Vec<Task>,
    pub active: Vec<Task>,
    /// 最近完成的任务，按完成顺序排列
    pub completed: Vec<Task>,
}

#[derive(Default)]
struct RouterState {
    pending: Vec<Task>,
    active: HashMap<String, Task>,
    completed: VecDeque<Task>,
    total_submitted: u64,
    completed_count: u64,
    failed_count: u64,
    cancelled_count: u64,
    total_duration_ms: i64,
    timed_count: u64,
}

impl RouterState {
    fn contains(&self, task_id: &str) -> bool {
        self.active.contains_key(task_id)
            || self.pending.iter().any(|t| t.id == task_id)
            || self.completed.iter().any(|t| t.id == task_id)
    }

    fn find(&self, task_id: &str) -> Option<&Task> {
        self.active
            .get(task_id)
            .or_else(|| self.pending.iter().find(|t| t.id == task_id))
            .or_else(|| self.completed.iter().find(|t| t.id == task_id))
    }

    fn archive(&mut self, task: Task, limit: usize) {
        match task.status {
            TaskStatus::Completed => self.completed_count += 1,
            TaskStatus::Failed => self.failed_count += 1,
            TaskStatus::Cancelled => self.cancelled_count += 1,
            _ => {}
        }
        if let Some(duration) = task.duration_ms() {
            self.total_duration_ms += duration;
            self.timed_count += 1;
        }

        self.completed.push_back(task);
        while self.completed.len() > limit {
            self.completed.pop_front();
        }
    }

    fn sorted_active(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.active.values().cloned().collect();
        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        tasks
    }
}

pub struct TaskRouter {
    config: RouterConfig,
    registry: Arc<WorkerRegistry>,
    state: RwLock<RouterState>,
    subscribers: RwLock<Vec<(SubscriptionId, TaskEventCallback)>>,
    next_subscription: AtomicU64,
}

impl TaskRouter {
    pub fn new(registry: Arc<WorkerRegistry>, config: RouterConfig) -> Self {
        Self {
            config,
            registry,
            state: RwLock::new(RouterState::default()),
            subscribers: RwLock::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
        }
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// 提交任务并尝试立即分配
    ///
    /// 返回提交后的任务：找到Worker时为 ASSIGNED，否则为 PENDING。
    pub async fn submit(
        &self,
        task_id: &str,
        capability: Capability,
        parameters: HashMap<String, serde_json::Value>,
        priority: TaskPriority,
    ) -> OrchestratorResult<Task> {
        if task_id.trim().is_empty() {
            return Err(OrchestratorError::validation_error("任务ID不能为空"));
        }

        let mut events = Vec::new();
        let task = {
            let mut state = self.state.write().await;
            if state.contains(task_id) {
                return Err(OrchestratorError::duplicate_task(task_id));
            }

            let mut task = Task::new(task_id, capability, parameters, priority);
            state.total_submitted += 1;
            counter!("orchestrator_tasks_submitted_total", "capability" => capability.as_str())
                .increment(1);
            info!(task_id = %task_id, "提交任务 (能力: {}, 优先级: {:?})", capability, priority);
            events.push(TaskEvent::new(
                TaskEventType::TaskSubmitted,
                json!({
                    "task_id": task.id,
                    "capability": capability,
                    "priority": priority,
                }),
            ));

            if self.try_assign(&mut task).await {
                events.push(assigned_event(&task));
                state.active.insert(task.id.clone(), task.clone());
            } else {
                state.pending.push(task.clone());
                self.report_pending(state.pending.len());
            }
            task
        };

        self.emit_all(events).await;
        Ok(task)
    }

    async fn try_assign(&self, task: &mut Task) -> bool {
        let Some(worker) = self.registry.find_best_worker(task.capability, true).await else {
            debug!("任务 {} 暂无可用Worker (能力: {})", task.id, task.capability);
            return false;
        };

        task.assigned_worker = Some(worker.id.clone());
        task.status = TaskStatus::Assigned;
        info!(task_id = %task.id, worker_id = %worker.id, "任务已分配");
        true
    }

    fn report_pending(&self, pending: usize) {
        gauge!("orchestrator_pending_tasks").set(pending as f64);
        if pending > self.config.pending_warn_threshold {
            warn!(
                "待分配任务数 {} 超过告警阈值 {}",
                pending, self.config.pending_warn_threshold
            );
        }
    }

    /// ASSIGNED -> RUNNING
    pub async fn start(&self, task_id: &str) -> bool {
        let event = {
            let mut state = self.state.write().await;
            let Some(task) = state.active.get_mut(task_id) else {
                warn!("启动未知或非活跃任务: {}", task_id);
                return false;
            };
            if task.status != TaskStatus::Assigned {
                warn!("任务 {} 当前状态为 {}，无法启动", task_id, task.status);
                return false;
            }

            task.status = TaskStatus::Running;
            task.started_at = Some(Utc::now());
            debug!("任务 {} 开始执行", task_id);
            TaskEvent::new(
                TaskEventType::TaskStarted,
                json!({ "task_id": task.id, "worker_id": task.assigned_worker }),
            )
        };

        self.emit(event).await;
        true
    }

    /// RUNNING -> COMPLETED（无错误）或 FAILED（错误非空）
    pub async fn complete(
        &self,
        task_id: &str,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) -> bool {
        let event = {
            let mut state = self.state.write().await;
            match state.active.get(task_id) {
                Some(task) if task.status == TaskStatus::Running => {}
                Some(task) => {
                    warn!("任务 {} 当前状态为 {}，无法完成", task_id, task.status);
                    return false;
                }
                None => {
                    warn!("完成未知或非活跃任务: {}", task_id);
                    return false;
                }
            }
            let Some(mut task) = state.active.remove(task_id) else {
                return false;
            };

            let error = error.filter(|e| !e.is_empty());
            task.status = if error.is_some() {
                TaskStatus::Failed
            } else {
                TaskStatus::Completed
            };
            task.completed_at = Some(Utc::now());
            task.result = result;
            task.error = error;

            let duration_ms = task.duration_ms();
            if let Some(duration) = duration_ms {
                histogram!("orchestrator_task_duration_ms").record(duration as f64);
            }
            counter!("orchestrator_tasks_completed_total", "outcome" => task.status.as_str())
                .increment(1);

            if let Some(error) = &task.error {
                warn!(task_id = %task_id, "任务执行失败: {}", error);
            } else {
                info!(task_id = %task_id, "任务执行完成 (耗时: {:?}ms)", duration_ms);
            }

            let event = TaskEvent::new(
                TaskEventType::TaskCompleted,
                json!({
                    "task_id": task.id,
                    "worker_id": task.assigned_worker,
                    "status": task.status,
                    "success": task.status == TaskStatus::Completed,
                    "duration_ms": duration_ms,
                    "error": task.error,
                }),
            );
            state.archive(task, self.config.completed_history_limit);
            event
        };

        self.emit(event).await;
        true
    }

    /// 取消 pending 或 active 中的任务
    pub async fn cancel(&self, task_id: &str) -> bool {
        let event = {
            let mut state = self.state.write().await;
            let task = if let Some(task) = state.active.remove(task_id) {
                Some(task)
            } else if let Some(pos) = state.pending.iter().position(|t| t.id == task_id) {
                let task = state.pending.remove(pos);
                gauge!("orchestrator_pending_tasks").set(state.pending.len() as f64);
                Some(task)
            } else {
                None
            };

            let Some(mut task) = task else {
                debug!("取消未知或已结束的任务: {}", task_id);
                return false;
            };

            let previous = task.status;
            task.status = TaskStatus::Cancelled;
            task.completed_at = Some(Utc::now());
            counter!("orchestrator_tasks_completed_total", "outcome" => task.status.as_str())
                .increment(1);
            info!(task_id = %task_id, "任务已取消 (原状态: {})", previous);

            let event = TaskEvent::new(
                TaskEventType::TaskCancelled,
                json!({
                    "task_id": task.id,
                    "worker_id": task.assigned_worker,
                    "previous_status": previous,
                }),
            );
            state.archive(task, self.config.completed_history_limit);
            event
        };

        self.emit(event).await;
        true
    }

    /// 按提交顺序为仍处于 PENDING 的任务重新分配Worker，返回本次分配成功的数量
    pub async fn process_pending(&self) -> usize {
        let mut events = Vec::new();
        {
            let mut state = self.state.write().await;
            if state.pending.is_empty() {
                return 0;
            }

            let pending = std::mem::take(&mut state.pending);
            for mut task in pending {
                if self.try_assign(&mut task).await {
                    events.push(assigned_event(&task));
                    state.active.insert(task.id.clone(), task);
                } else {
                    state.pending.push(task);
                }
            }
            self.report_pending(state.pending.len());
        }

        if !events.is_empty() {
            info!("重新分配了 {} 个待分配任务", events.len());
        }
        let assigned = events.len();
        self.emit_all(events).await;
        assigned
    }

    /// 启动待分配任务的周期重试循环
    pub fn start_pending_loop(
        self: &Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let router = Arc::clone(self);
        let period = Duration::from_secs(self.config.pending_retry_interval_seconds);

        tokio::spawn(async move {
            info!("启动待分配任务重试循环 (间隔: {:?})", period);
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        router.process_pending().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("收到关闭信号，停止待分配任务重试循环");
                        break;
                    }
                }
            }
        })
    }

    pub async fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&TaskEvent) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().await.push((id, Arc::new(callback)));
        debug!("新增任务事件订阅者: {:?}", id);
        id
    }

    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let before = subscribers.len();
        subscribers.retain(|(sid, _)| *sid != id);
        before != subscribers.len()
    }

    async fn emit_all(&self, events: Vec<TaskEvent>) {
        for event in events {
            self.emit(event).await;
        }
    }

    /// 逐个通知订阅者，单个订阅者的错误或panic不影响其他订阅者
    async fn emit(&self, event: TaskEvent) {
        let subscribers: Vec<(SubscriptionId, TaskEventCallback)> =
            self.subscribers.read().await.clone();

        for (id, callback) in subscribers {
            match catch_unwind(AssertUnwindSafe(|| callback(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    warn!("任务事件订阅者 {:?} 处理 {:?} 失败: {}", id, event.event_type, e);
                }
                Err(_) => {
                    error!("任务事件订阅者 {:?} 处理 {:?} 时panic", id, event.event_type);
                }
            }
        }
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.state.read().await.find(task_id).cloned()
    }

    /// 分配给指定Worker的任务，活跃任务在前，历史任务在后
    pub async fn worker_tasks(&self, worker_id: &str) -> Vec<Task> {
        let state = self.state.read().await;
        let assigned_to = |task: &Task| task.assigned_worker.as_deref() == Some(worker_id);

        let mut tasks: Vec<Task> = state
            .sorted_active()
            .into_iter()
            .filter(|t| assigned_to(t))
            .collect();
        tasks.extend(state.completed.iter().filter(|t| assigned_to(*t)).cloned());
        tasks
    }

    pub async fn statistics(&self) -> RouterStatistics {
        let state = self.state.read().await;
        let average_duration_ms = if state.timed_count == 0 {
            0.0
        } else {
            state.total_duration_ms as f64 / state.timed_count as f64
        };

        RouterStatistics {
            pending: state.pending.len(),
            active: state.active.len(),
            completed: state.completed_count,
            failed: state.failed_count,
            cancelled: state.cancelled_count,
            total_submitted: state.total_submitted,
            average_duration_ms,
        }
    }

    pub async fn snapshot(&self) -> RouterSnapshot {
        let state = self.state.read().await;
        let skip = state
            .completed
            .len()
            .saturating_sub(RouterConfig::SNAPSHOT_COMPLETED_LIMIT);

        RouterSnapshot {
            pending: state.pending.clone(),
            active: state.sorted_active(),
            completed: state.completed.iter().skip(skip).cloned().collect(),
        }
    }

    pub async fn to_json(&self) -> OrchestratorResult<serde_json::Value> {
        Ok(serde_json::to_value(self.snapshot().await)?)
    }
}

fn assigned_event(task: &Task) -> TaskEvent {
    TaskEvent::new(
        TaskEventType::TaskAssigned,
        json!({
            "task_id": task.id,
            "worker_id": task.assigned_worker,
            "capability": task.capability,
        }),
    )
}
