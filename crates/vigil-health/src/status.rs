use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use vigil_core::Level;

/// 健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Warning,
    Critical,
    /// 探针失败或超时
    Unknown,
}

impl HealthStatus {
    /// 是否需要告警
    pub fn needs_alert(&self) -> bool {
        matches!(self, HealthStatus::Warning | HealthStatus::Critical)
    }

    /// 对应的告警级别
    pub fn level(&self) -> Option<Level> {
        match self {
            HealthStatus::Warning => Some(Level::Warning),
            HealthStatus::Critical => Some(Level::Critical),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Ok => "ok",
            HealthStatus::Warning => "warning",
            HealthStatus::Critical => "critical",
            HealthStatus::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次健康检查的结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthEvent {
    pub service_name: String,
    pub status: HealthStatus,
    pub value: Option<f64>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_status: Option<HealthStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthEvent {
    /// 相对上一次状态是否发生了变化
    ///
    /// 首次观测到非 ok 状态也算一次变化。
    pub fn is_transition(&self) -> bool {
        match self.previous_status {
            Some(prev) => prev != self.status,
            None => self.status != HealthStatus::Ok,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(status: HealthStatus, previous: Option<HealthStatus>) -> HealthEvent {
        HealthEvent {
            service_name: "api".to_string(),
            status,
            value: None,
            timestamp: Utc::now(),
            previous_status: previous,
            error: None,
        }
    }

    #[test]
    fn test_transition_detection() {
        assert!(!event(HealthStatus::Ok, None).is_transition());
        assert!(event(HealthStatus::Critical, None).is_transition());
        assert!(event(HealthStatus::Critical, Some(HealthStatus::Ok)).is_transition());
        assert!(!event(HealthStatus::Critical, Some(HealthStatus::Critical)).is_transition());
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(event(HealthStatus::Unknown, None)).unwrap();
        assert_eq!(json["status"], "unknown");
        assert_eq!(json["service_name"], "api");
        assert!(json.get("previous_status").is_none());
    }
}
