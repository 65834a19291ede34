use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use orchestrator_core::{
    AppConfig, CircuitBreakerMetrics, CircuitBreakerRegistry, DeadLetterRegistry,
};
use orchestrator_dispatcher::{
    RegistryStats, RouterStatistics, TaskRouter, WorkerFailureDetector, WorkerRegistry,
};
use orchestrator_worker::{Scheduler, TaskExecutionManager};

use crate::shutdown::ShutdownManager;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

/// 运行时状态概览
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStatus {
    pub workers: RegistryStats,
    pub tasks: RouterStatistics,
    pub circuit_breakers: BTreeMap<String, CircuitBreakerMetrics>,
    pub dead_letters: BTreeMap<String, usize>,
}

/// 编排上下文
///
/// 每个进程创建一次，持有所有组件并通过构造函数注入依赖关系。
pub struct Orchestrator {
    config: AppConfig,
    registry: Arc<WorkerRegistry>,
    router: Arc<TaskRouter>,
    scheduler: Arc<Scheduler>,
    breakers: Arc<CircuitBreakerRegistry>,
    dead_letters: Arc<DeadLetterRegistry>,
    executions: Arc<TaskExecutionManager>,
    shutdown_manager: ShutdownManager,
    handles: Mutex<Vec<JoinHandle<()>>>,
    lifecycle: Mutex<Lifecycle>,
}

impl Orchestrator {
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate().context("配置校验失败")?;

        let registry = Arc::new(WorkerRegistry::new(config.registry.clone()));
        let router = Arc::new(TaskRouter::new(
            Arc::clone(&registry),
            config.router.clone(),
        ));
        let scheduler = Arc::new(Scheduler::with_registry(
            config.scheduler.clone(),
            Arc::clone(&registry),
        ));
        let breakers = Arc::new(CircuitBreakerRegistry::new(
            config.resilience.circuit_breaker.clone(),
        ));
        let dead_letters = Arc::new(DeadLetterRegistry::new(
            config.resilience.dead_letter_capacity,
        ));
        let executions = Arc::new(TaskExecutionManager::new(
            Arc::clone(&router),
            Arc::clone(&registry),
            Arc::clone(&breakers),
            Arc::clone(&dead_letters),
            config.resilience.retry.clone(),
        ));

        info!("编排上下文初始化完成");
        Ok(Self {
            config,
            registry,
            router,
            scheduler,
            breakers,
            dead_letters,
            executions,
            shutdown_manager: ShutdownManager::new(),
            handles: Mutex::new(Vec::new()),
            lifecycle: Mutex::new(Lifecycle::Created),
        })
    }

    /// 启动心跳检测、待分配任务重试循环和调度器
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.lifecycle.lock().await;
        match *lifecycle {
            Lifecycle::Running => return Err(anyhow::anyhow!("编排运行时已在运行")),
            Lifecycle::Stopped => return Err(anyhow::anyhow!("编排运行时已关闭，不能重新启动")),
            Lifecycle::Created => {}
        }

        // 调度器启动失败时不能留下已启动的后台循环
        self.scheduler.start().await.context("启动调度器失败")?;

        let detector = WorkerFailureDetector::new(Arc::clone(&self.registry));
        let detector_handle = detector.start(self.shutdown_manager.subscribe().await);
        let pending_handle = self
            .router
            .start_pending_loop(self.shutdown_manager.subscribe().await);
        self.handles
            .lock()
            .await
            .extend([detector_handle, pending_handle]);

        *lifecycle = Lifecycle::Running;
        info!("编排运行时已启动");
        Ok(())
    }

    /// 通知所有后台循环退出并等待，超时后强制中止，最后关闭调度器
    pub async fn shutdown(&self) {
        let mut lifecycle = self.lifecycle.lock().await;
        if *lifecycle == Lifecycle::Stopped {
            return;
        }
        *lifecycle = Lifecycle::Stopped;
        info!("开始关闭编排运行时");

        self.shutdown_manager.shutdown().await;

        let wait = Duration::from_secs(self.config.scheduler.shutdown_timeout_seconds);
        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        for mut handle in handles {
            if tokio::time::timeout(wait, &mut handle).await.is_err() {
                warn!("后台循环未在 {:?} 内退出，强制中止", wait);
                handle.abort();
            }
        }

        self.scheduler.shutdown().await;
        info!("编排运行时已关闭");
    }

    pub async fn is_running(&self) -> bool {
        *self.lifecycle.lock().await == Lifecycle::Running
    }

    pub async fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            workers: self.registry.stats().await,
            tasks: self.router.statistics().await,
            circuit_breakers: self.breakers.all_metrics().await,
            dead_letters: self.dead_letters.sizes().await,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<WorkerRegistry> {
        &self.registry
    }

    pub fn router(&self) -> &Arc<TaskRouter> {
        &self.router
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn circuit_breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn dead_letters(&self) -> &Arc<DeadLetterRegistry> {
        &self.dead_letters
    }

    pub fn executions(&self) -> &Arc<TaskExecutionManager> {
        &self.executions
    }

    pub fn shutdown_manager(&self) -> &ShutdownManager {
        &self.shutdown_manager
    }
}
