//! Worker注册表
//!
//! 注册表是Worker元数据的唯一所有者。Worker记录与能力索引放在同一把锁下，
//! 每次注册/注销都在同一个临界区内同时更新两者，索引永远不会引用已删除的Worker。

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use orchestrator_core::config::RegistryConfig;
use orchestrator_core::models::{
    Capability, HeartbeatReport, WorkerInfo, WorkerRegistration, WorkerStatus,
};
use orchestrator_core::{OrchestratorError, OrchestratorResult};

use crate::strategies::{IdleFirstStrategy, LoadBasedStrategy, WorkerSelectionStrategy};

/// 注册表统计信息
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_workers: usize,
    pub by_status: BTreeMap<WorkerStatus, usize>,
    pub by_capability: BTreeMap<Capability, usize>,
    pub healthy_workers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub workers: Vec<WorkerInfo>,
    pub stats: RegistryStats,
}

#[derive(Default)]
struct RegistryState {
    workers: HashMap<String, WorkerInfo>,
    capability_index: HashMap<Capability, BTreeSet<String>>,
}

impl RegistryState {
    fn index_worker(&mut self, worker: &WorkerInfo) {
        for capability in &worker.capabilities {
            self.capability_index
                .entry(*capability)
                .or_default()
                .insert(worker.id.clone());
        }
    }

    fn unindex_worker(&mut self, worker: &WorkerInfo) {
        for capability in &worker.capabilities {
            if let Some(ids) = self.capability_index.get_mut(capability) {
                ids.remove(&worker.id);
                if ids.is_empty() {
                    self.capability_index.remove(capability);
                }
            }
        }
    }

    fn sorted_workers(&self, filter: impl Fn(&WorkerInfo) -> bool) -> Vec<WorkerInfo> {
        let mut workers: Vec<WorkerInfo> =
            self.workers.values().filter(|w| filter(w)).cloned().collect();
        workers.sort_by(|a, b| a.id.cmp(&b.id));
        workers
    }

    fn stats(&self) -> RegistryStats {
        let mut by_status = BTreeMap::new();
        let mut healthy_workers = 0;
        for worker in self.workers.values() {
            *by_status.entry(worker.status).or_insert(0) += 1;
            if worker.status.is_healthy() {
                healthy_workers += 1;
            }
        }

        let by_capability = self
            .capability_index
            .iter()
            .map(|(capability, ids)| (*capability, ids.len()))
            .collect();

        RegistryStats {
            total_workers: self.workers.len(),
            by_status,
            by_capability,
            healthy_workers,
        }
    }
}

pub struct WorkerRegistry {
    config: RegistryConfig,
    state: RwLock<RegistryState>,
}

impl Default for WorkerRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl WorkerRegistry {
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            state: RwLock::new(RegistryState::default()),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// 注册Worker
    ///
    /// 同一ID重复注册时覆盖原有信息（保留创建时间），并按新的能力集合重建索引。
    /// 注册完成后Worker进入 READY 状态。
    pub async fn register(&self, registration: WorkerRegistration) -> OrchestratorResult<()> {
        if registration.id.trim().is_empty() {
            return Err(OrchestratorError::validation_error("Worker ID不能为空"));
        }
        if registration.max_concurrent_tasks == 0 {
            return Err(OrchestratorError::validation_error(format!(
                "Worker {} 的最大并发任务数必须大于0",
                registration.id
            )));
        }

        let mut worker = WorkerInfo::new(registration);
        let mut state = self.state.write().await;

        if let Some(previous) = state.workers.remove(&worker.id) {
            warn!("Worker {} 重复注册，覆盖原有信息", worker.id);
            state.unindex_worker(&previous);
            worker.created_at = previous.created_at;
        }

        debug!(
            "Worker {} 状态变更: {} -> {}",
            worker.id,
            worker.status,
            WorkerStatus::Ready
        );
        worker.status = WorkerStatus::Ready;
        state.index_worker(&worker);

        info!(
            worker_id = %worker.id,
            "注册Worker: {} (能力: {:?})",
            worker.name,
            worker.capabilities.iter().map(|c| c.as_str()).collect::<Vec<_>>()
        );
        state.workers.insert(worker.id.clone(), worker);
        Ok(())
    }

    /// 注销Worker，ID不存在时返回 false
    pub async fn unregister(&self, worker_id: &str) -> bool {
        let mut state = self.state.write().await;
        let Some(worker) = state.workers.get(worker_id).cloned() else {
            debug!("注销未知Worker: {}", worker_id);
            return false;
        };

        // 先从索引移除再删除记录
        state.unindex_worker(&worker);
        state.workers.remove(worker_id);
        info!(worker_id = %worker_id, "注销Worker: {}", worker.name);
        true
    }

    /// 更新Worker状态，未知Worker或不允许的状态转换返回 false
    pub async fn update_status(&self, worker_id: &str, status: WorkerStatus) -> bool {
        let mut state = self.state.write().await;
        let Some(worker) = state.workers.get_mut(worker_id) else {
            warn!("更新未知Worker的状态: {}", worker_id);
            return false;
        };

        if !worker.status.can_transition_to(status) {
            warn!(
                "拒绝Worker {} 的状态转换: {} -> {}",
                worker_id, worker.status, status
            );
            return false;
        }

        if worker.status != status {
            info!(
                "Worker {} 状态变更: {} -> {}",
                worker_id, worker.status, status
            );
        }
        worker.status = status;
        worker.last_heartbeat = Utc::now();
        true
    }

    /// 处理Worker心跳并合并上报的指标
    pub async fn heartbeat(&self, worker_id: &str, report: HeartbeatReport) -> bool {
        let mut state = self.state.write().await;
        let Some(worker) = state.workers.get_mut(worker_id) else {
            warn!("收到未知Worker的心跳: {}", worker_id);
            return false;
        };

        worker.apply_heartbeat(&report, Utc::now());

        match (worker.status, report.healthy) {
            (WorkerStatus::Error, Some(false)) => {}
            (WorkerStatus::Error, _) => {
                info!("Worker {} 心跳恢复，状态变更: ERROR -> READY", worker_id);
                worker.status = WorkerStatus::Ready;
            }
            (status, Some(false)) if !status.is_intentionally_offline() => {
                warn!("Worker {} 上报不健康，状态变更: {} -> ERROR", worker_id, status);
                worker.status = WorkerStatus::Error;
            }
            _ => {}
        }

        debug!(
            "Worker {} 心跳 (负载: {:.2}, 执行次数: {})",
            worker_id, worker.current_load, worker.execution_count
        );
        true
    }

    /// 记录一次执行结果，以心跳形式合并执行计数与平均耗时
    ///
    /// 成功的执行让 ERROR 状态的Worker恢复为 READY，失败只累加错误计数。
    pub async fn record_execution(&self, worker_id: &str, duration_ms: f64, success: bool) -> bool {
        let mut state = self.state.write().await;
        let Some(worker) = state.workers.get_mut(worker_id) else {
            debug!("记录未知Worker的执行结果: {}", worker_id);
            return false;
        };

        let report = worker.execution_report(duration_ms, success);
        worker.apply_heartbeat(&report, Utc::now());
        if success && worker.status == WorkerStatus::Error {
            info!("Worker {} 执行成功，状态变更: ERROR -> READY", worker_id);
            worker.status = WorkerStatus::Ready;
        }
        true
    }

    /// 为指定能力选择最合适的Worker
    ///
    /// `prefer_idle` 为 true 时先按状态分层（IDLE < READY < RUNNING）再按负载，
    /// 否则只按负载。负载相同时按Worker ID字典序。
    pub async fn find_best_worker(
        &self,
        capability: Capability,
        prefer_idle: bool,
    ) -> Option<WorkerInfo> {
        let state = self.state.read().await;
        let ids = state.capability_index.get(&capability)?;
        let candidates: Vec<&WorkerInfo> = ids
            .iter()
            .filter_map(|id| state.workers.get(id))
            .filter(|worker| worker.status.is_assignable())
            .collect();

        if candidates.is_empty() {
            debug!("没有支持能力 {} 的可用Worker", capability);
            return None;
        }

        let selected = if prefer_idle {
            IdleFirstStrategy::new().select(&candidates)
        } else {
            LoadBasedStrategy::new().select(&candidates)
        };
        selected.cloned()
    }

    /// 心跳超时检查，返回本次被标记为 ERROR 的Worker ID
    pub async fn check_health(&self) -> Vec<String> {
        self.check_health_at(Utc::now()).await
    }

    pub async fn check_health_at(&self, now: DateTime<Utc>) -> Vec<String> {
        let timeout = self.config.heartbeat_timeout_seconds;
        let mut state = self.state.write().await;
        let mut failed = Vec::new();

        for worker in state.workers.values_mut() {
            if worker.status.is_intentionally_offline() || worker.status == WorkerStatus::Error {
                continue;
            }
            if worker.is_heartbeat_expired(now, timeout) {
                warn!(
                    "检测到失效Worker: {} (上次心跳: {})",
                    worker.id,
                    worker.last_heartbeat.format("%Y-%m-%d %H:%M:%S UTC")
                );
                worker.status = WorkerStatus::Error;
                failed.push(worker.id.clone());
            }
        }

        failed.sort();
        failed
    }

    pub async fn stats(&self) -> RegistryStats {
        self.state.read().await.stats()
    }

    pub async fn get_worker(&self, worker_id: &str) -> Option<WorkerInfo> {
        self.state.read().await.workers.get(worker_id).cloned()
    }

    pub async fn all_workers(&self) -> Vec<WorkerInfo> {
        self.state.read().await.sorted_workers(|_| true)
    }

    pub async fn workers_by_capability(&self, capability: Capability) -> Vec<WorkerInfo> {
        let state = self.state.read().await;
        state
            .capability_index
            .get(&capability)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.workers.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn workers_by_status(&self, status: WorkerStatus) -> Vec<WorkerInfo> {
        self.state
            .read()
            .await
            .sorted_workers(|worker| worker.status == status)
    }

    pub async fn healthy_workers(&self) -> Vec<WorkerInfo> {
        self.state
            .read()
            .await
            .sorted_workers(|worker| worker.status.is_healthy())
    }

    pub async fn worker_count(&self) -> usize {
        self.state.read().await.workers.len()
    }

    /// 能力索引的副本
    pub async fn capability_index(&self) -> BTreeMap<Capability, BTreeSet<String>> {
        self.state
            .read()
            .await
            .capability_index
            .iter()
            .map(|(capability, ids)| (*capability, ids.clone()))
            .collect()
    }

    pub async fn snapshot(&self) -> RegistrySnapshot {
        let state = self.state.read().await;
        RegistrySnapshot {
            workers: state.sorted_workers(|_| true),
            stats: state.stats(),
        }
    }

    pub async fn to_json(&self) -> OrchestratorResult<serde_json::Value> {
        Ok(serde_json::to_value(self.snapshot().await)?)
    }
}
