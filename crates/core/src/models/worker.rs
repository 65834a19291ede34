use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::OrchestratorError;

/// Worker能够处理的工作类别，用作任务路由键
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    DataCollection,
    DataProcessing,
    Analysis,
    Reporting,
    Notification,
    Integration,
    Monitoring,
    Scheduling,
}

impl Capability {
    pub const ALL: [Capability; 8] = [
        Capability::DataCollection,
        Capability::DataProcessing,
        Capability::Analysis,
        Capability::Reporting,
        Capability::Notification,
        Capability::Integration,
        Capability::Monitoring,
        Capability::Scheduling,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::DataCollection => "data_collection",
            Capability::DataProcessing => "data_processing",
            Capability::Analysis => "analysis",
            Capability::Reporting => "reporting",
            Capability::Notification => "notification",
            Capability::Integration => "integration",
            Capability::Monitoring => "monitoring",
            Capability::Scheduling => "scheduling",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Capability {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| OrchestratorError::InvalidCapability(s.to_string()))
    }
}

/// Worker运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkerStatus {
    Initializing,
    Ready,
    Running,
    Idle,
    Error,
    Maintenance,
    Stopped,
}

impl WorkerStatus {
    pub const ALL: [WorkerStatus; 7] = [
        WorkerStatus::Initializing,
        WorkerStatus::Ready,
        WorkerStatus::Running,
        WorkerStatus::Idle,
        WorkerStatus::Error,
        WorkerStatus::Maintenance,
        WorkerStatus::Stopped,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerStatus::Initializing => "INITIALIZING",
            WorkerStatus::Ready => "READY",
            WorkerStatus::Running => "RUNNING",
            WorkerStatus::Idle => "IDLE",
            WorkerStatus::Error => "ERROR",
            WorkerStatus::Maintenance => "MAINTENANCE",
            WorkerStatus::Stopped => "STOPPED",
        }
    }

    /// 可以接收任务分配的状态
    pub fn is_assignable(&self) -> bool {
        matches!(
            self,
            WorkerStatus::Ready | WorkerStatus::Idle | WorkerStatus::Running
        )
    }

    pub fn is_healthy(&self) -> bool {
        !matches!(self, WorkerStatus::Error | WorkerStatus::Stopped)
    }

    /// 主动下线的状态不参与心跳超时检查
    pub fn is_intentionally_offline(&self) -> bool {
        matches!(self, WorkerStatus::Maintenance | WorkerStatus::Stopped)
    }

    /// 选择Worker时的优先级，数值越小越优先
    pub fn selection_rank(&self) -> Option<u8> {
        match self {
            WorkerStatus::Idle => Some(0),
            WorkerStatus::Ready => Some(1),
            WorkerStatus::Running => Some(2),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: WorkerStatus) -> bool {
        use WorkerStatus::*;

        if *self == next {
            return true;
        }
        match (*self, next) {
            (Stopped, Maintenance) => true,
            (Stopped, _) => false,
            (_, Error) | (_, Maintenance) => true,
            (Initializing, Ready) => true,
            (Ready, Running) | (Ready, Idle) => true,
            (Running, Idle) | (Idle, Running) => true,
            (Error, Ready) | (Error, Idle) => true,
            (Maintenance, Stopped) | (Maintenance, Ready) => true,
            _ => false,
        }
    }
}

impl fmt::Display for WorkerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WorkerStatus {
    type Err = OrchestratorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.to_ascii_uppercase();
        WorkerStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == upper)
            .ok_or_else(|| OrchestratorError::InvalidStatus(s.to_string()))
    }
}

/// Worker注册请求
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRegistration {
    pub id: String,
    pub name: String,
    pub worker_type: String,
    pub capabilities: BTreeSet<Capability>,
    pub version: String,
    pub max_concurrent_tasks: u32,
    pub tags: BTreeSet<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl WorkerRegistration {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        worker_type: impl Into<String>,
        capabilities: impl IntoIterator<Item = Capability>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            worker_type: worker_type.into(),
            capabilities: capabilities.into_iter().collect(),
            version: "1.0.0".to_string(),
            max_concurrent_tasks: 1,
            tags: BTreeSet::new(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_max_concurrent_tasks(mut self, max: u32) -> Self {
        self.max_concurrent_tasks = max;
        self
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Worker节点信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub id: String,
    pub name: String,
    pub worker_type: String,
    pub capabilities: BTreeSet<Capability>,
    pub status: WorkerStatus,
    pub version: String,
    pub last_heartbeat: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub execution_count: u64,
    pub error_count: u64,
    pub avg_execution_time_ms: f64,
    /// 当前负载，已用并发占最大并发的比例 (0.0-1.0)
    pub current_load: f64,
    pub max_concurrent_tasks: u32,
    pub tags: BTreeSet<String>,
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Worker心跳上报的指标，未提供的字段保持不变
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatReport {
    pub execution_count: Option<u64>,
    pub error_count: Option<u64>,
    pub avg_execution_time_ms: Option<f64>,
    pub current_load: Option<f64>,
    pub healthy: Option<bool>,
}

impl HeartbeatReport {
    pub fn with_load(mut self, load: f64) -> Self {
        self.current_load = Some(load);
        self
    }

    pub fn healthy(mut self, healthy: bool) -> Self {
        self.healthy = Some(healthy);
        self
    }
}

impl WorkerInfo {
    /// 根据注册请求创建Worker信息
    pub fn new(registration: WorkerRegistration) -> Self {
        let now = Utc::now();
        Self {
            id: registration.id,
            name: registration.name,
            worker_type: registration.worker_type,
            capabilities: registration.capabilities,
            status: WorkerStatus::Initializing,
            version: registration.version,
            last_heartbeat: now,
            created_at: now,
            execution_count: 0,
            error_count: 0,
            avg_execution_time_ms: 0.0,
            current_load: 0.0,
            max_concurrent_tasks: registration.max_concurrent_tasks,
            tags: registration.tags,
            metadata: registration.metadata,
        }
    }

    pub fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    /// 检查心跳是否超时
    pub fn is_heartbeat_expired(&self, now: DateTime<Utc>, timeout_seconds: i64) -> bool {
        now - self.last_heartbeat > chrono::Duration::seconds(timeout_seconds)
    }

    /// 合并心跳上报的指标
    pub fn apply_heartbeat(&mut self, report: &HeartbeatReport, now: DateTime<Utc>) {
        self.last_heartbeat = now;
        if let Some(count) = report.execution_count {
            self.execution_count = count;
        }
        if let Some(count) = report.error_count {
            self.error_count = count;
        }
        if let Some(avg) = report.avg_execution_time_ms {
            self.avg_execution_time_ms = avg.max(0.0);
        }
        if let Some(load) = report.current_load {
            self.current_load = load.clamp(0.0, 1.0);
        }
    }

    /// 生成一次执行结束后的心跳报告：累加执行/错误次数并更新平均耗时
    pub fn execution_report(&self, duration_ms: f64, success: bool) -> HeartbeatReport {
        let execution_count = self.execution_count + 1;
        let error_count = self.error_count + u64::from(!success);
        let avg = self.avg_execution_time_ms
            + (duration_ms.max(0.0) - self.avg_execution_time_ms) / execution_count as f64;

        HeartbeatReport {
            execution_count: Some(execution_count),
            error_count: Some(error_count),
            avg_execution_time_ms: Some(avg),
            ..Default::default()
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.execution_count == 0 {
            0.0
        } else {
            self.error_count as f64 / self.execution_count as f64
        }
    }
}
