use std::cmp::Ordering;

use tracing::debug;

use orchestrator_core::models::WorkerInfo;

/// Worker选择策略
///
/// 候选集合已经按能力和可分配状态过滤，策略只负责排序并挑出第一个。
/// 所有策略在负载相同的情况下按Worker ID字典序决出胜者，保证同一候选集合
/// 的选择结果稳定。
pub trait WorkerSelectionStrategy: Send + Sync {
    fn select<'a>(&self, candidates: &[&'a WorkerInfo]) -> Option<&'a WorkerInfo>;

    fn name(&self) -> &str;
}

/// 按状态分层选择：IDLE 优先于 READY，READY 优先于 RUNNING，同层内取负载最低者
pub struct IdleFirstStrategy;

/// 只按负载选择
pub struct LoadBasedStrategy;

impl IdleFirstStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for IdleFirstStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSelectionStrategy for IdleFirstStrategy {
    fn select<'a>(&self, candidates: &[&'a WorkerInfo]) -> Option<&'a WorkerInfo> {
        let selected = candidates
            .iter()
            .copied()
            .filter(|worker| worker.status.selection_rank().is_some())
            .min_by(|a, b| {
                a.status
                    .selection_rank()
                    .cmp(&b.status.selection_rank())
                    .then_with(|| compare_load(a, b))
            })?;

        debug!(
            "状态分层策略选择Worker: {} (状态: {}, 负载: {:.2})",
            selected.id, selected.status, selected.current_load
        );
        Some(selected)
    }

    fn name(&self) -> &str {
        "IdleFirst"
    }
}

impl LoadBasedStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LoadBasedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerSelectionStrategy for LoadBasedStrategy {
    fn select<'a>(&self, candidates: &[&'a WorkerInfo]) -> Option<&'a WorkerInfo> {
        let selected = candidates
            .iter()
            .copied()
            .filter(|worker| worker.status.is_assignable())
            .min_by(|a, b| compare_load(a, b))?;

        debug!(
            "负载均衡策略选择Worker: {} (负载: {:.2})",
            selected.id, selected.current_load
        );
        Some(selected)
    }

    fn name(&self) -> &str {
        "LoadBased"
    }
}

fn compare_load(a: &WorkerInfo, b: &WorkerInfo) -> Ordering {
    a.current_load
        .total_cmp(&b.current_load)
        .then_with(|| a.id.cmp(&b.id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use orchestrator_core::models::{Capability, WorkerRegistration, WorkerStatus};

    fn create_test_worker(id: &str, status: WorkerStatus, load: f64) -> WorkerInfo {
        let mut worker = WorkerInfo::new(WorkerRegistration::new(
            id,
            format!("worker {id}"),
            "test",
            [Capability::Analysis],
        ));
        worker.status = status;
        worker.current_load = load;
        worker
    }

    #[test]
    fn test_idle_first_prefers_status_tier_over_load() {
        let idle = create_test_worker("w-idle", WorkerStatus::Idle, 0.9);
        let ready = create_test_worker("w-ready", WorkerStatus::Ready, 0.0);
        let running = create_test_worker("w-running", WorkerStatus::Running, 0.0);

        let strategy = IdleFirstStrategy::new();
        for order in [
            vec![&idle, &ready, &running],
            vec![&running, &ready, &idle],
            vec![&ready, &idle, &running],
        ] {
            assert_eq!(strategy.select(&order).unwrap().id, "w-idle");
        }
    }

    #[test]
    fn test_idle_first_lowest_load_within_tier() {
        let a = create_test_worker("a", WorkerStatus::Ready, 0.6);
        let b = create_test_worker("b", WorkerStatus::Ready, 0.2);
        let c = create_test_worker("c", WorkerStatus::Running, 0.0);

        let selected = IdleFirstStrategy::new().select(&[&a, &b, &c]).unwrap();
        assert_eq!(selected.id, "b");
    }

    #[test]
    fn test_ties_broken_by_worker_id() {
        let b = create_test_worker("b", WorkerStatus::Idle, 0.5);
        let a = create_test_worker("a", WorkerStatus::Idle, 0.5);

        assert_eq!(IdleFirstStrategy::new().select(&[&b, &a]).unwrap().id, "a");
        assert_eq!(LoadBasedStrategy::new().select(&[&b, &a]).unwrap().id, "a");
    }

    #[test]
    fn test_load_based_ignores_status_tier() {
        let idle = create_test_worker("idle", WorkerStatus::Idle, 0.7);
        let running = create_test_worker("running", WorkerStatus::Running, 0.1);

        let selected = LoadBasedStrategy::new().select(&[&idle, &running]).unwrap();
        assert_eq!(selected.id, "running");
    }

    #[test]
    fn test_unassignable_workers_never_selected() {
        let error = create_test_worker("err", WorkerStatus::Error, 0.0);
        let stopped = create_test_worker("stopped", WorkerStatus::Stopped, 0.0);

        assert!(IdleFirstStrategy::new().select(&[&error, &stopped]).is_none());
        assert!(LoadBasedStrategy::new().select(&[&error, &stopped]).is_none());
        assert!(LoadBasedStrategy::new().select(&[]).is_none());
    }
}
