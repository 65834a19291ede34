use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use orchestrator_core::config::SchedulerConfig;
use orchestrator_core::models::{Capability, WorkerRegistration};
use orchestrator_core::{OrchestratorError, OrchestratorResult};
use orchestrator_dispatcher::WorkerRegistry;
use orchestrator_worker::{HealthReport, WorkerHealth, ScheduledWorker, Scheduler};

#[derive(Clone, Copy)]
enum Behavior {
    Succeed,
    Fail,
    Panic,
}

struct TestWorker {
    name: String,
    behavior: Behavior,
    runs: AtomicU32,
    shutdowns: AtomicU32,
    healthy: AtomicBool,
}

impl TestWorker {
    fn new(name: &str, behavior: Behavior) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            behavior,
            runs: AtomicU32::new(0),
            shutdowns: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
        })
    }

    fn runs(&self) -> u32 {
        self.runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScheduledWorker for TestWorker {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self) -> OrchestratorResult<()> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        match self.behavior {
            Behavior::Succeed => Ok(()),
            Behavior::Fail => Err(OrchestratorError::operation_failed("sync failed")),
            Behavior::Panic => panic!("worker {} blew up", self.name),
        }
    }

    async fn health_check(&self) -> HealthReport {
        if !self.healthy.load(Ordering::SeqCst) {
            HealthReport::unhealthy("stuck")
        } else if self.runs() == 0 {
            HealthReport::never_run()
        } else {
            HealthReport::ok()
        }
    }

    async fn shutdown(&self) -> OrchestratorResult<()> {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        health_check_interval_seconds: 60,
        shutdown_timeout_seconds: 5,
    }
}

#[tokio::test(start_paused = true)]
async fn test_worker_runs_on_interval() {
    let scheduler = Arc::new(Scheduler::new(test_config()));
    let worker = TestWorker::new("sync", Behavior::Succeed);
    scheduler
        .register_worker(worker.clone(), Duration::from_secs(10))
        .await
        .unwrap();

    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(25)).await;

    // t=0, t=10, t=20
    assert_eq!(worker.runs(), 3);
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failing_and_panicking_workers_are_isolated() {
    let scheduler = Arc::new(Scheduler::new(test_config()));
    let healthy = TestWorker::new("healthy", Behavior::Succeed);
    let failing = TestWorker::new("failing", Behavior::Fail);
    let panicking = TestWorker::new("panicking", Behavior::Panic);
    for worker in [&healthy, &failing, &panicking] {
        scheduler
            .register_worker(worker.clone(), Duration::from_secs(10))
            .await
            .unwrap();
    }

    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(25)).await;

    assert_eq!(healthy.runs(), 3);
    assert_eq!(failing.runs(), 3);
    assert_eq!(panicking.runs(), 3);
    assert!(scheduler.is_running().await);
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_register_rejects_duplicate_and_zero_interval() {
    let scheduler = Scheduler::new(test_config());
    scheduler
        .register_worker(TestWorker::new("sync", Behavior::Succeed), Duration::from_secs(1))
        .await
        .unwrap();

    let err = scheduler
        .register_worker(TestWorker::new("sync", Behavior::Succeed), Duration::from_secs(5))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::DuplicateWorker { .. }));

    let err = scheduler
        .register_worker(TestWorker::new("other", Behavior::Succeed), Duration::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::ValidationError(_)));

    assert_eq!(scheduler.worker_names().await, vec!["sync".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn test_unhealthy_worker_is_restarted_alone() {
    let scheduler = Arc::new(Scheduler::new(test_config()));
    let stuck = TestWorker::new("stuck", Behavior::Succeed);
    let steady = TestWorker::new("steady", Behavior::Succeed);
    scheduler
        .register_worker(stuck.clone(), Duration::from_secs(30))
        .await
        .unwrap();
    scheduler
        .register_worker(steady.clone(), Duration::from_secs(30))
        .await
        .unwrap();
    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(1)).await;

    stuck.healthy.store(false, Ordering::SeqCst);
    let restarted = scheduler.check_worker_health().await;
    assert_eq!(restarted, vec!["stuck".to_string()]);
    assert_eq!(scheduler.restart_count("stuck").await, Some(1));
    assert_eq!(scheduler.restart_count("steady").await, Some(0));
    assert_eq!(scheduler.restart_count("missing").await, None);

    // 重启后的循环立即执行一次
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(stuck.runs(), 2);
    assert_eq!(steady.runs(), 1);

    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_health_monitor_restarts_on_its_own() {
    let scheduler = Arc::new(Scheduler::new(test_config()));
    let stuck = TestWorker::new("stuck", Behavior::Succeed);
    stuck.healthy.store(false, Ordering::SeqCst);
    scheduler
        .register_worker(stuck.clone(), Duration::from_secs(300))
        .await
        .unwrap();

    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(61)).await;

    assert_eq!(scheduler.restart_count("stuck").await, Some(1));
    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_restart_ignored_when_not_running() {
    let scheduler = Scheduler::new(test_config());
    scheduler
        .register_worker(TestWorker::new("sync", Behavior::Succeed), Duration::from_secs(1))
        .await
        .unwrap();

    assert!(!scheduler.restart_worker("sync").await);
    assert_eq!(scheduler.restart_count("sync").await, Some(0));
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_stops_loops_and_calls_hooks_once() {
    let scheduler = Arc::new(Scheduler::new(test_config()));
    let worker = TestWorker::new("sync", Behavior::Succeed);
    scheduler
        .register_worker(worker.clone(), Duration::from_secs(10))
        .await
        .unwrap();
    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(worker.runs(), 1);

    scheduler.shutdown().await;
    scheduler.shutdown().await;
    assert_eq!(worker.shutdowns.load(Ordering::SeqCst), 1);
    assert!(!scheduler.is_running().await);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(worker.runs(), 1);
    assert!(scheduler.start().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_successful_runs_heartbeat_the_registry() {
    let registry = Arc::new(WorkerRegistry::default());
    registry
        .register(WorkerRegistration::new(
            "reporter",
            "reporter",
            "scheduled",
            [Capability::Reporting],
        ))
        .await
        .unwrap();

    let scheduler = Arc::new(Scheduler::with_registry(test_config(), Arc::clone(&registry)));
    let reporter = TestWorker::new("reporter", Behavior::Succeed);
    let failing = TestWorker::new("failing", Behavior::Fail);
    scheduler
        .register_worker(reporter.clone(), Duration::from_secs(10))
        .await
        .unwrap();
    scheduler
        .register_worker(failing.clone(), Duration::from_secs(10))
        .await
        .unwrap();

    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(15)).await;

    let info = registry.get_worker("reporter").await.unwrap();
    assert_eq!(info.execution_count, 2);
    assert_eq!(info.error_count, 0);
    assert!(registry.get_worker("failing").await.is_none());
    scheduler.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_health_aggregates_every_worker() {
    let scheduler = Arc::new(Scheduler::new(test_config()));
    let ran = TestWorker::new("ran", Behavior::Succeed);
    let idle = TestWorker::new("idle", Behavior::Succeed);
    scheduler
        .register_worker(ran.clone(), Duration::from_secs(10))
        .await
        .unwrap();

    scheduler.start().await.unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    idle.healthy.store(false, Ordering::SeqCst);
    scheduler
        .register_worker(idle.clone(), Duration::from_secs(10))
        .await
        .unwrap();

    let health = scheduler.health().await;
    assert_eq!(health.len(), 2);
    assert_eq!(health["ran"].status, WorkerHealth::Ok);
    assert_eq!(health["idle"].status, WorkerHealth::Unhealthy("stuck".to_string()));
    assert!(!health["idle"].is_healthy());

    scheduler.shutdown().await;
}

#[tokio::test]
async fn test_register_after_shutdown_is_rejected() {
    let scheduler = Arc::new(Scheduler::new(test_config()));
    scheduler.start().await.unwrap();
    scheduler.shutdown().await;

    let late = TestWorker::new("late", Behavior::Succeed);
    let err = scheduler
        .register_worker(late.clone(), Duration::from_secs(1))
        .await
        .unwrap_err();
    assert!(matches!(err, OrchestratorError::Internal(_)));
    assert!(scheduler.worker_names().await.is_empty());
    assert_eq!(late.runs(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_registration_racing_shutdown_is_always_collected() {
    for round in 0..50 {
        let scheduler = Arc::new(Scheduler::new(test_config()));
        scheduler.start().await.unwrap();
        let worker = TestWorker::new(&format!("racer-{round}"), Behavior::Succeed);

        let registering = {
            let scheduler = Arc::clone(&scheduler);
            let worker = Arc::clone(&worker);
            tokio::spawn(async move {
                scheduler
                    .register_worker(worker, Duration::from_secs(3600))
                    .await
            })
        };
        let stopping = {
            let scheduler = Arc::clone(&scheduler);
            tokio::spawn(async move { scheduler.shutdown().await })
        };

        let registered = registering.await.unwrap().is_ok();
        stopping.await.unwrap();

        // 注册成功的Worker必须被关闭流程收回
        let expected_shutdowns = if registered { 1 } else { 0 };
        assert_eq!(worker.shutdowns.load(Ordering::SeqCst), expected_shutdowns);
        assert!(!scheduler.is_running().await);
    }
}
