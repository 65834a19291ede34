use serde::{Deserialize, Serialize};

/// Worker注册表配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// 心跳超时时间（秒）
    pub heartbeat_timeout_seconds: i64,
    /// 健康检查间隔（秒）
    pub health_check_interval_seconds: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_seconds: 90,
            health_check_interval_seconds: 30,
        }
    }
}

impl RegistryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.heartbeat_timeout_seconds <= 0 {
            return Err(anyhow::anyhow!("心跳超时时间必须大于0"));
        }
        if self.health_check_interval_seconds == 0 {
            return Err(anyhow::anyhow!("健康检查间隔必须大于0"));
        }
        Ok(())
    }
}

/// 任务路由配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// 待分配任务的重试间隔（秒）
    pub pending_retry_interval_seconds: u64,
    /// 已完成任务的保留条数
    pub completed_history_limit: usize,
    /// 待分配任务数超过此值时发出告警
    pub pending_warn_threshold: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            pending_retry_interval_seconds: 5,
            completed_history_limit: 100,
            pending_warn_threshold: 1000,
        }
    }
}

impl RouterConfig {
    /// 快照中展示的已完成任务条数
    pub const SNAPSHOT_COMPLETED_LIMIT: usize = 20;

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pending_retry_interval_seconds == 0 {
            return Err(anyhow::anyhow!("待分配任务重试间隔必须大于0"));
        }
        if self.completed_history_limit < Self::SNAPSHOT_COMPLETED_LIMIT {
            return Err(anyhow::anyhow!(
                "已完成任务保留条数不能小于{}",
                Self::SNAPSHOT_COMPLETED_LIMIT
            ));
        }
        if self.pending_warn_threshold == 0 {
            return Err(anyhow::anyhow!("待分配任务告警阈值必须大于0"));
        }
        Ok(())
    }
}

/// 周期调度器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Worker健康探测间隔（秒）
    pub health_check_interval_seconds: u64,
    /// 关闭时等待循环退出的超时（秒）
    pub shutdown_timeout_seconds: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            health_check_interval_seconds: 60,
            shutdown_timeout_seconds: 30,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.health_check_interval_seconds == 0 {
            return Err(anyhow::anyhow!("健康探测间隔必须大于0"));
        }
        if self.shutdown_timeout_seconds == 0 {
            return Err(anyhow::anyhow!("关闭超时时间必须大于0"));
        }
        Ok(())
    }
}
