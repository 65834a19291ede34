use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use crate::OrchestratorError;

pub const DEFAULT_DEAD_LETTER_CAPACITY: usize = 1000;

/// 失败操作的诊断记录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub operation: String,
    pub error: String,
    pub error_kind: String,
    pub context: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

/// 定长环形缓冲区，满后淘汰最旧的记录
#[derive(Debug)]
pub struct DeadLetterQueue {
    name: String,
    capacity: usize,
    entries: Mutex<VecDeque<DeadLetterEntry>>,
}

impl DeadLetterQueue {
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            name: name.into(),
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 追加一条记录，不会失败也不会阻塞调用方
    pub async fn add(
        &self,
        operation: impl Into<String>,
        error: &OrchestratorError,
        context: HashMap<String, serde_json::Value>,
    ) {
        self.push(DeadLetterEntry {
            operation: operation.into(),
            error: error.to_string(),
            error_kind: error.kind().to_string(),
            context,
            timestamp: Utc::now(),
        })
        .await;
    }

    pub async fn push(&self, entry: DeadLetterEntry) {
        let mut entries = self.entries.lock().await;
        if entries.len() >= self.capacity {
            entries.pop_front();
        }
        debug!(
            "死信队列 {} 记录失败操作: {} ({})",
            self.name, entry.operation, entry.error_kind
        );
        entries.push_back(entry);
        counter!("orchestrator_dead_letters_total", "queue" => self.name.clone()).increment(1);
    }

    /// 返回所有记录的快照，按写入顺序排列
    pub async fn get_all(&self) -> Vec<DeadLetterEntry> {
        self.entries.lock().await.iter().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// 清空队列，返回被移除的记录数
    pub async fn clear(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let removed = entries.len();
        entries.clear();
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(i: usize) -> HashMap<String, serde_json::Value> {
        HashMap::from([("seq".to_string(), serde_json::json!(i))])
    }

    #[tokio::test]
    async fn test_add_and_snapshot() {
        let dlq = DeadLetterQueue::new("default", 10);
        dlq.add(
            "send_report",
            &OrchestratorError::operation_failed("smtp down"),
            ctx(0),
        )
        .await;

        let entries = dlq.get_all().await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].operation, "send_report");
        assert_eq!(entries[0].error_kind, "operation_failed");
        assert!(entries[0].error.contains("smtp down"));
    }

    #[tokio::test]
    async fn test_fifo_eviction() {
        let capacity = 5;
        let extra = 3;
        let dlq = DeadLetterQueue::new("bounded", capacity);
        for i in 0..capacity + extra {
            dlq.add("op", &OrchestratorError::operation_failed("x"), ctx(i))
                .await;
        }

        let entries = dlq.get_all().await;
        assert_eq!(entries.len(), capacity);
        let seqs: Vec<usize> = entries
            .iter()
            .map(|e| e.context["seq"].as_u64().unwrap() as usize)
            .collect();
        assert_eq!(seqs, (extra..capacity + extra).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_clear_returns_count() {
        let dlq = DeadLetterQueue::new("default", 10);
        for i in 0..4 {
            dlq.add("op", &OrchestratorError::operation_failed("x"), ctx(i))
                .await;
        }
        assert_eq!(dlq.clear().await, 4);
        assert!(dlq.is_empty().await);
        assert_eq!(dlq.clear().await, 0);
    }
}
