use thiserror::Error;

/// 编排运行时错误类型定义
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("任务ID已存在: {id}")]
    DuplicateTaskId { id: String },

    #[error("Worker已注册: {name}")]
    DuplicateWorker { name: String },

    #[error("Worker未找到: {id}")]
    UnknownWorker { id: String },

    #[error("任务未找到: {id}")]
    UnknownTask { id: String },

    #[error("熔断器已打开: {name}")]
    CircuitOpen { name: String },

    #[error("请求被限流: {name}")]
    RateLimited { name: String },

    #[error("操作失败: {0}")]
    OperationFailed(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("无效的能力类型: {0}")]
    InvalidCapability(String),

    #[error("无效的状态: {0}")]
    InvalidStatus(String),

    #[error("数据验证失败: {0}")]
    ValidationError(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

/// 统一的Result类型
pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

impl OrchestratorError {
    pub fn duplicate_task<S: Into<String>>(id: S) -> Self {
        Self::DuplicateTaskId { id: id.into() }
    }
    pub fn duplicate_worker<S: Into<String>>(name: S) -> Self {
        Self::DuplicateWorker { name: name.into() }
    }
    pub fn unknown_worker<S: Into<String>>(id: S) -> Self {
        Self::UnknownWorker { id: id.into() }
    }
    pub fn unknown_task<S: Into<String>>(id: S) -> Self {
        Self::UnknownTask { id: id.into() }
    }
    pub fn circuit_open<S: Into<String>>(name: S) -> Self {
        Self::CircuitOpen { name: name.into() }
    }
    pub fn operation_failed<S: Into<String>>(msg: S) -> Self {
        Self::OperationFailed(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::ValidationError(msg.into())
    }

    /// 瞬时错误，调用方可以稍后重试
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OrchestratorError::CircuitOpen { .. }
                | OrchestratorError::RateLimited { .. }
                | OrchestratorError::Timeout(_)
                | OrchestratorError::OperationFailed(_)
        )
    }

    /// 由调用方输入引起的错误
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            OrchestratorError::DuplicateTaskId { .. }
                | OrchestratorError::DuplicateWorker { .. }
                | OrchestratorError::InvalidCapability(_)
                | OrchestratorError::InvalidStatus(_)
                | OrchestratorError::ValidationError(_)
        )
    }

    /// 稳定的错误类别标识，用于死信记录
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::DuplicateTaskId { .. } => "duplicate_task_id",
            OrchestratorError::DuplicateWorker { .. } => "duplicate_worker",
            OrchestratorError::UnknownWorker { .. } => "unknown_worker",
            OrchestratorError::UnknownTask { .. } => "unknown_task",
            OrchestratorError::CircuitOpen { .. } => "circuit_open",
            OrchestratorError::RateLimited { .. } => "rate_limited",
            OrchestratorError::OperationFailed(_) => "operation_failed",
            OrchestratorError::Timeout(_) => "timeout",
            OrchestratorError::InvalidCapability(_) => "invalid_capability",
            OrchestratorError::InvalidStatus(_) => "invalid_status",
            OrchestratorError::ValidationError(_) => "validation_error",
            OrchestratorError::Configuration(_) => "configuration",
            OrchestratorError::Serialization(_) => "serialization",
            OrchestratorError::Internal(_) => "internal",
        }
    }
}

impl From<serde_json::Error> for OrchestratorError {
    fn from(err: serde_json::Error) -> Self {
        OrchestratorError::Serialization(err.to_string())
    }
}

impl From<config::ConfigError> for OrchestratorError {
    fn from(err: config::ConfigError) -> Self {
        OrchestratorError::Configuration(err.to_string())
    }
}

impl From<anyhow::Error> for OrchestratorError {
    fn from(err: anyhow::Error) -> Self {
        OrchestratorError::Internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(OrchestratorError::circuit_open("payments").is_retryable());
        assert!(OrchestratorError::Timeout("call".to_string()).is_retryable());
        assert!(!OrchestratorError::duplicate_task("t1").is_retryable());
        assert!(!OrchestratorError::unknown_worker("w1").is_retryable());
    }

    #[test]
    fn test_client_error_classification() {
        assert!(OrchestratorError::duplicate_task("t1").is_client_error());
        assert!(OrchestratorError::InvalidCapability("teleport".to_string()).is_client_error());
        assert!(!OrchestratorError::circuit_open("x").is_client_error());
    }

    #[test]
    fn test_kind_tags() {
        assert_eq!(OrchestratorError::circuit_open("x").kind(), "circuit_open");
        assert_eq!(
            OrchestratorError::operation_failed("boom").kind(),
            "operation_failed"
        );
        let err: OrchestratorError = anyhow::anyhow!("wrapped").into();
        assert_eq!(err.kind(), "internal");

        let err = OrchestratorError::RateLimited {
            name: "crm".to_string(),
        };
        assert_eq!(err.kind(), "rate_limited");
        assert!(err.is_retryable());
        assert!(!err.is_client_error());

        let err: OrchestratorError =
            config::ConfigError::NotFound("scheduler.tick".to_string()).into();
        assert_eq!(err.kind(), "configuration");
        assert!(!err.is_retryable());
    }
}
