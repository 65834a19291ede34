use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::worker_registry::WorkerRegistry;

/// Worker失效检测服务
///
/// 按固定间隔对注册表执行心跳超时检查，超时的Worker被标记为 ERROR。
pub struct WorkerFailureDetector {
    registry: Arc<WorkerRegistry>,
    detection_interval: Duration,
}

impl WorkerFailureDetector {
    /// 检测间隔取自注册表配置
    pub fn new(registry: Arc<WorkerRegistry>) -> Self {
        let detection_interval =
            Duration::from_secs(registry.config().health_check_interval_seconds);
        Self {
            registry,
            detection_interval,
        }
    }

    pub fn with_interval(registry: Arc<WorkerRegistry>, detection_interval: Duration) -> Self {
        Self {
            registry,
            detection_interval,
        }
    }

    pub fn detection_interval(&self) -> Duration {
        self.detection_interval
    }

    /// 执行一次检测，返回本次被标记为失效的Worker ID
    pub async fn detect_failed_workers(&self) -> Vec<String> {
        debug!("开始检测失效的Worker");
        let failed = self.registry.check_health().await;
        if !failed.is_empty() {
            info!("检测到 {} 个失效的Worker: {:?}", failed.len(), failed);
        }
        failed
    }

    /// 启动检测循环，收到关闭信号后退出
    pub fn start(self, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!("启动Worker失效检测循环 (间隔: {:?})", self.detection_interval);
            let mut interval = tokio::time::interval(self.detection_interval);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.detect_failed_workers().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("收到停止信号，退出Worker失效检测循环");
                        break;
                    }
                }
            }
        })
    }
}
