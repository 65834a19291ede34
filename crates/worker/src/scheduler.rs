//! 周期调度器
//!
//! 每个Worker一个独立的执行循环，各自持有停止信号。健康监控循环发现
//! 探测结果不健康的Worker时，只停止并重启该Worker的循环，其他循环不受影响。

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use metrics::counter;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use orchestrator_core::config::SchedulerConfig;
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_dispatcher::WorkerRegistry;

use crate::worker::{HealthReport, ScheduledWorker};

struct LoopHandle {
    stop_tx: broadcast::Sender<()>,
    join: JoinHandle<()>,
}

impl LoopHandle {
    /// 发送停止信号并等待循环退出，超时后强制中止
    async fn stop(self, wait: Duration) {
        let _ = self.stop_tx.send(());
        let mut join = self.join;
        if tokio::time::timeout(wait, &mut join).await.is_err() {
            warn!("循环未在 {:?} 内退出，强制中止", wait);
            join.abort();
        }
    }
}

struct WorkerEntry {
    worker: Arc<dyn ScheduledWorker>,
    interval: Duration,
    handle: Option<LoopHandle>,
    restarts: u64,
}

pub struct Scheduler {
    config: SchedulerConfig,
    registry: Option<Arc<WorkerRegistry>>,
    workers: RwLock<BTreeMap<String, WorkerEntry>>,
    monitor: Mutex<Option<LoopHandle>>,
    running: RwLock<bool>,
    shut_down: Mutex<bool>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            registry: None,
            workers: RwLock::new(BTreeMap::new()),
            monitor: Mutex::new(None),
            running: RwLock::new(false),
            shut_down: Mutex::new(false),
        }
    }

    /// 成功执行后向注册表发送心跳
    pub fn with_registry(config: SchedulerConfig, registry: Arc<WorkerRegistry>) -> Self {
        Self {
            registry: Some(registry),
            ..Self::new(config)
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.config.shutdown_timeout_seconds)
    }

    /// 注册Worker及其执行间隔；调度器已启动时立即开始执行
    pub async fn register_worker(
        &self,
        worker: Arc<dyn ScheduledWorker>,
        interval: Duration,
    ) -> OrchestratorResult<()> {
        if interval.is_zero() {
            return Err(OrchestratorError::validation_error(format!(
                "Worker {} 的执行间隔必须大于0",
                worker.name()
            )));
        }

        let name = worker.name().to_string();
        // 持有关闭锁直到插入完成，关闭流程总能收回新注册的循环
        let shut_down = self.shut_down.lock().await;
        if *shut_down {
            return Err(OrchestratorError::Internal(format!(
                "调度器已关闭，无法注册Worker {name}"
            )));
        }
        let running = *self.running.read().await;
        let mut workers = self.workers.write().await;
        if workers.contains_key(&name) {
            return Err(OrchestratorError::duplicate_worker(name));
        }

        let handle = running.then(|| self.spawn_worker_loop(Arc::clone(&worker), interval));
        info!("注册周期Worker: {} (间隔: {:?})", name, interval);
        workers.insert(
            name,
            WorkerEntry {
                worker,
                interval,
                handle,
                restarts: 0,
            },
        );
        Ok(())
    }

    /// 启动所有Worker循环和健康监控循环
    pub async fn start(self: &Arc<Self>) -> OrchestratorResult<()> {
        if *self.shut_down.lock().await {
            return Err(OrchestratorError::Internal("调度器已关闭".to_string()));
        }
        {
            let mut running = self.running.write().await;
            if *running {
                return Err(OrchestratorError::Internal("调度器已在运行".to_string()));
            }
            *running = true;
        }

        {
            let mut workers = self.workers.write().await;
            for entry in workers.values_mut().filter(|entry| entry.handle.is_none()) {
                entry.handle = Some(self.spawn_worker_loop(Arc::clone(&entry.worker), entry.interval));
            }
            info!("启动调度器，共 {} 个Worker", workers.len());
        }

        *self.monitor.lock().await = Some(self.spawn_health_monitor());
        Ok(())
    }

    fn spawn_worker_loop(&self, worker: Arc<dyn ScheduledWorker>, interval: Duration) -> LoopHandle {
        let (stop_tx, mut stop_rx) = broadcast::channel(1);
        let registry = self.registry.clone();

        let join = tokio::spawn(async move {
            let name = worker.name().to_string();
            debug!("Worker {} 执行循环开始", name);

            loop {
                let started = Instant::now();
                let outcome = tokio::select! {
                    outcome = AssertUnwindSafe(worker.execute()).catch_unwind() => outcome,
                    _ = stop_rx.recv() => break,
                };

                match outcome {
                    Ok(Ok(())) => {
                        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
                        debug!("Worker {} 执行完成 ({:.1}ms)", name, elapsed_ms);
                        if let Some(registry) = &registry {
                            if !registry.record_execution(&name, elapsed_ms, true).await {
                                debug!("Worker {} 未在注册表中，跳过心跳", name);
                            }
                        }
                    }
                    Ok(Err(e)) => {
                        error!("Worker {} 执行失败: {}", name, e);
                    }
                    Err(_) => {
                        error!("Worker {} 执行时panic", name);
                    }
                }

                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = stop_rx.recv() => break,
                }
            }

            debug!("Worker {} 执行循环退出", name);
        });

        LoopHandle { stop_tx, join }
    }

    fn spawn_health_monitor(self: &Arc<Self>) -> LoopHandle {
        let (stop_tx, mut stop_rx) = broadcast::channel(1);
        let scheduler = Arc::clone(self);
        let period = Duration::from_secs(self.config.health_check_interval_seconds);

        let join = tokio::spawn(async move {
            info!("启动Worker健康监控循环 (间隔: {:?})", period);
            let mut interval = tokio::time::interval(period);
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        scheduler.check_worker_health().await;
                    }
                    _ = stop_rx.recv() => {
                        info!("健康监控循环退出");
                        break;
                    }
                }
            }
        });

        LoopHandle { stop_tx, join }
    }

    /// 探测所有Worker，重启不健康的Worker，返回被重启的Worker名称
    pub async fn check_worker_health(&self) -> Vec<String> {
        let mut restarted = Vec::new();
        for (name, report) in self.health().await {
            if report.is_healthy() {
                continue;
            }
            warn!("Worker {} 健康探测异常 ({})，重启执行循环", name, report.status);
            if self.restart_worker(&name).await {
                restarted.push(name);
            }
        }
        restarted
    }

    /// 停止并立即重新启动单个Worker的执行循环
    pub async fn restart_worker(&self, name: &str) -> bool {
        if !*self.running.read().await {
            debug!("调度器未运行，忽略Worker {} 的重启", name);
            return false;
        }

        let old_handle = {
            let mut workers = self.workers.write().await;
            let Some(entry) = workers.get_mut(name) else {
                return false;
            };
            entry.handle.take()
        };
        if let Some(handle) = old_handle {
            handle.stop(self.shutdown_timeout()).await;
        }

        // 等待旧循环退出期间调度器可能已关闭
        let running = self.running.read().await;
        if !*running {
            return false;
        }
        let mut workers = self.workers.write().await;
        let Some(entry) = workers.get_mut(name) else {
            return false;
        };
        if entry.handle.is_some() {
            debug!("Worker {} 已被并发重启", name);
            return false;
        }
        entry.handle = Some(self.spawn_worker_loop(Arc::clone(&entry.worker), entry.interval));
        entry.restarts += 1;
        counter!("orchestrator_worker_restarts_total", "worker" => name.to_string()).increment(1);
        info!("Worker {} 已重启 (累计 {} 次)", name, entry.restarts);
        true
    }

    /// 汇总所有Worker的自报健康状况
    pub async fn health(&self) -> BTreeMap<String, HealthReport> {
        let workers: Vec<(String, Arc<dyn ScheduledWorker>)> = self
            .workers
            .read()
            .await
            .iter()
            .map(|(name, entry)| (name.clone(), Arc::clone(&entry.worker)))
            .collect();

        let mut reports = BTreeMap::new();
        for (name, worker) in workers {
            let report = match AssertUnwindSafe(worker.health_check()).catch_unwind().await {
                Ok(report) => report,
                Err(_) => {
                    error!("Worker {} 健康探测时panic", name);
                    HealthReport::unhealthy("health check panicked")
                }
            };
            reports.insert(name, report);
        }
        reports
    }

    pub async fn restart_count(&self, name: &str) -> Option<u64> {
        self.workers.read().await.get(name).map(|entry| entry.restarts)
    }

    pub async fn worker_names(&self) -> Vec<String> {
        self.workers.read().await.keys().cloned().collect()
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// 停止所有循环并等待其退出，然后依次调用每个Worker的关闭钩子
    ///
    /// 重复调用是安全的，关闭钩子只会被调用一次。
    pub async fn shutdown(&self) {
        let mut shut_down = self.shut_down.lock().await;
        if *shut_down {
            debug!("调度器已经关闭");
            return;
        }
        *shut_down = true;
        *self.running.write().await = false;
        info!("关闭调度器");

        let wait = self.shutdown_timeout();
        let monitor = self.monitor.lock().await.take();
        if let Some(monitor) = monitor {
            monitor.stop(wait).await;
        }

        let (handles, workers): (Vec<LoopHandle>, Vec<Arc<dyn ScheduledWorker>>) = {
            let mut entries = self.workers.write().await;
            let handles = entries
                .values_mut()
                .filter_map(|entry| entry.handle.take())
                .collect();
            let workers = entries.values().map(|entry| Arc::clone(&entry.worker)).collect();
            (handles, workers)
        };

        for handle in &handles {
            let _ = handle.stop_tx.send(());
        }
        for handle in handles {
            handle.stop(wait).await;
        }

        for worker in workers {
            match AssertUnwindSafe(worker.shutdown()).catch_unwind().await {
                Ok(Ok(())) => debug!("Worker {} 已关闭", worker.name()),
                Ok(Err(e)) => error!("Worker {} 关闭失败: {}", worker.name(), e),
                Err(_) => error!("Worker {} 关闭时panic", worker.name()),
            }
        }
        info!("调度器已关闭");
    }
}
