use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orchestrator_core::OrchestratorResult;

/// 健康探测结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerHealth {
    Ok,
    #[serde(rename = "never run")]
    NeverRun,
    Unhealthy(String),
}

impl WorkerHealth {
    /// ok 与 never run 之外的状态都会触发重启
    pub fn is_healthy(&self) -> bool {
        matches!(self, WorkerHealth::Ok | WorkerHealth::NeverRun)
    }
}

impl fmt::Display for WorkerHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerHealth::Ok => f.write_str("ok"),
            WorkerHealth::NeverRun => f.write_str("never run"),
            WorkerHealth::Unhealthy(reason) => write!(f, "unhealthy: {reason}"),
        }
    }
}

/// Worker自报的健康状况
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: WorkerHealth,
    pub last_run_at: Option<DateTime<Utc>>,
    pub details: HashMap<String, serde_json::Value>,
}

impl HealthReport {
    pub fn ok() -> Self {
        Self::with_status(WorkerHealth::Ok)
    }

    pub fn never_run() -> Self {
        Self::with_status(WorkerHealth::NeverRun)
    }

    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self::with_status(WorkerHealth::Unhealthy(reason.into()))
    }

    fn with_status(status: WorkerHealth) -> Self {
        Self {
            status,
            last_run_at: None,
            details: HashMap::new(),
        }
    }

    pub fn last_run(mut self, at: DateTime<Utc>) -> Self {
        self.last_run_at = Some(at);
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.details.insert(key.into(), value);
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status.is_healthy()
    }
}

/// 由调度器周期执行的Worker
///
/// `execute` 可能在强制重启后被再次调用，实现必须能安全地重复执行。
/// `shutdown` 在编排器关闭时恰好被调用一次。
#[async_trait]
pub trait ScheduledWorker: Send + Sync {
    /// 唯一名称；与注册表中的Worker ID相同时，成功执行后会向注册表发送心跳
    fn name(&self) -> &str;

    async fn execute(&self) -> OrchestratorResult<()>;

    async fn health_check(&self) -> HealthReport;

    async fn shutdown(&self) -> OrchestratorResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_health_classification() {
        assert!(WorkerHealth::Ok.is_healthy());
        assert!(WorkerHealth::NeverRun.is_healthy());
        assert!(!WorkerHealth::Unhealthy("stale".into()).is_healthy());
    }

    #[test]
    fn test_health_report_serialization() {
        let json = serde_json::to_value(HealthReport::never_run()).unwrap();
        assert_eq!(json["status"], "never run");

        let json = serde_json::to_value(HealthReport::ok().detail("runs", 3.into())).unwrap();
        assert_eq!(json["status"], "ok");
        assert_eq!(json["details"]["runs"], 3);

        let json = serde_json::to_value(HealthReport::unhealthy("token expired")).unwrap();
        assert_eq!(json["status"]["unhealthy"], "token expired");
    }
}
