use thiserror::Error;

/// Vigil 统一错误类型
///
/// 所有错误都可恢复，由调用方决定如何处理。
#[derive(Error, Debug)]
pub enum VigilError {
    /// 输入校验失败（未产生任何写入）
    #[error("Validation error: {0}")]
    Validation(String),

    /// 指标类型已存在
    #[error("Metric type already exists: {0}")]
    DuplicateType(String),

    /// 指标类型不存在
    #[error("Unknown metric type: {0}")]
    UnknownType(String),

    /// 实体不存在
    #[error("Not found: {0}")]
    NotFound(String),

    /// 非法的告警状态转换
    #[error("Invalid state: cannot {action} alert {id} in state {state}")]
    InvalidState {
        id: String,
        state: String,
        action: String,
    },

    /// 指标类型不支持该聚合方法
    #[error("Aggregation method {method} is not supported by metric type {metric_type}")]
    UnsupportedMethod { metric_type: String, method: String },

    /// 样本数量不足
    #[error("Insufficient data for group {group}: required {required} samples, got {actual}")]
    InsufficientData {
        group: String,
        required: usize,
        actual: usize,
    },

    /// 存储后端不可用
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, VigilError>;

impl VigilError {
    pub fn validation(msg: impl Into<String>) -> Self {
        VigilError::Validation(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        VigilError::NotFound(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        VigilError::StorageUnavailable(msg.into())
    }

    pub fn invalid_state(
        id: impl Into<String>,
        state: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        VigilError::InvalidState {
            id: id.into(),
            state: state.into(),
            action: action.into(),
        }
    }

    /// 是否为存储后端故障
    pub fn is_storage(&self) -> bool {
        matches!(self, VigilError::StorageUnavailable(_))
    }
}
