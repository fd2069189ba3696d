use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;
use vigil_core::{Level, Result, VigilError};

/// 告警附加信息
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// 告警类别
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertType {
    Health,
    Metric,
    Security,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Health => "health",
            AlertType::Metric => "metric",
            AlertType::Security => "security",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 告警状态：`open → acknowledged → resolved` 或 `open → resolved`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertState {
    Open,
    Acknowledged,
    Resolved,
}

impl AlertState {
    /// open 和 acknowledged 都算未解决
    pub fn is_open(&self) -> bool {
        !matches!(self, AlertState::Resolved)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Open => "open",
            AlertState::Acknowledged => "acknowledged",
            AlertState::Resolved => "resolved",
        }
    }
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 告警去重键，同一键最多一个未解决告警
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AlertKey {
    pub service_name: String,
    pub alert_type: AlertType,
}

impl AlertKey {
    pub fn new(service_name: impl Into<String>, alert_type: AlertType) -> Self {
        Self {
            service_name: service_name.into(),
            alert_type,
        }
    }

    pub fn health(service_name: impl Into<String>) -> Self {
        Self::new(service_name, AlertType::Health)
    }

    pub fn metric(service_name: impl Into<String>) -> Self {
        Self::new(service_name, AlertType::Metric)
    }

    pub fn security(event_type: impl Into<String>) -> Self {
        Self::new(event_type, AlertType::Security)
    }
}

impl fmt::Display for AlertKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.alert_type, self.service_name)
    }
}

/// 告警实例
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthAlert {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub level: Level,
    pub state: AlertState,
    pub service_name: String,
    pub message: String,
    #[serde(default)]
    pub metadata: Metadata,
    pub triggered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_at: Option<DateTime<Utc>>,
    /// 合并进此告警的触发次数
    pub occurrences: u64,
}

impl HealthAlert {
    pub fn new(
        key: &AlertKey,
        level: Level,
        message: impl Into<String>,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            alert_type: key.alert_type,
            level,
            state: AlertState::Open,
            service_name: key.service_name.clone(),
            message: message.into(),
            metadata,
            triggered_at: now,
            updated_at: now,
            acknowledged_at: None,
            resolved_at: None,
            occurrences: 1,
        }
    }

    pub fn key(&self) -> AlertKey {
        AlertKey::new(self.service_name.clone(), self.alert_type)
    }

    pub fn is_open(&self) -> bool {
        self.state.is_open()
    }

    /// 再次触发：刷新内容，级别只升不降
    pub fn refresh(
        &mut self,
        level: Level,
        message: impl Into<String>,
        metadata: Metadata,
        now: DateTime<Utc>,
    ) {
        self.level = self.level.max(level);
        self.message = message.into();
        self.metadata = metadata;
        self.updated_at = now;
        self.occurrences += 1;
    }

    /// 确认告警，返回状态是否发生变化
    ///
    /// 已确认的告警再次确认不产生变化。
    pub fn acknowledge(&mut self, now: DateTime<Utc>) -> Result<bool> {
        match self.state {
            AlertState::Open => {
                self.state = AlertState::Acknowledged;
                self.acknowledged_at = Some(now);
                self.updated_at = now;
                Ok(true)
            }
            AlertState::Acknowledged => Ok(false),
            AlertState::Resolved => Err(VigilError::invalid_state(
                self.id.to_string(),
                self.state.as_str(),
                "acknowledge",
            )),
        }
    }

    pub fn resolve(&mut self, now: DateTime<Utc>) -> Result<()> {
        if !self.is_open() {
            return Err(VigilError::invalid_state(
                self.id.to_string(),
                self.state.as_str(),
                "resolve",
            ));
        }
        self.state = AlertState::Resolved;
        self.resolved_at = Some(now);
        self.updated_at = now;
        Ok(())
    }
}

/// 告警查询条件，未设置的字段不参与过滤
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertFilter {
    pub level: Option<Level>,
    pub service_name: Option<String>,
    pub alert_type: Option<AlertType>,
    pub state: Option<AlertState>,
}

impl AlertFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: Level) -> Self {
        self.level = Some(level);
        self
    }

    pub fn service(mut self, service_name: impl Into<String>) -> Self {
        self.service_name = Some(service_name.into());
        self
    }

    pub fn alert_type(mut self, alert_type: AlertType) -> Self {
        self.alert_type = Some(alert_type);
        self
    }

    pub fn state(mut self, state: AlertState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn matches(&self, alert: &HealthAlert) -> bool {
        self.level.map_or(true, |l| alert.level == l)
            && self
                .service_name
                .as_deref()
                .map_or(true, |s| alert.service_name == s)
            && self.alert_type.map_or(true, |t| alert.alert_type == t)
            && self.state.map_or(true, |s| alert.state == s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn alert() -> HealthAlert {
        let now = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        HealthAlert::new(
            &AlertKey::health("api"),
            Level::Warning,
            "api is warning",
            Metadata::new(),
            now,
        )
    }

    #[test]
    fn test_state_machine() {
        let mut a = alert();
        let now = a.triggered_at;

        assert!(a.acknowledge(now).unwrap());
        assert!(!a.acknowledge(now).unwrap());
        a.resolve(now).unwrap();
        assert_eq!(a.resolved_at, Some(now));

        assert!(matches!(a.resolve(now), Err(VigilError::InvalidState { .. })));
        assert!(matches!(a.acknowledge(now), Err(VigilError::InvalidState { .. })));
    }

    #[test]
    fn test_refresh_escalates_only() {
        let mut a = alert();
        let now = a.triggered_at;

        a.refresh(Level::Critical, "worse", Metadata::new(), now);
        assert_eq!(a.level, Level::Critical);
        a.refresh(Level::Warning, "better", Metadata::new(), now);
        assert_eq!(a.level, Level::Critical);
        assert_eq!(a.message, "better");
        assert_eq!(a.occurrences, 3);
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_value(alert()).unwrap();
        assert_eq!(json["type"], "health");
        assert_eq!(json["level"], "warning");
        assert_eq!(json["state"], "open");
        assert!(json["acknowledged_at"].is_null());
    }

    #[test]
    fn test_filter() {
        let a = alert();
        assert!(AlertFilter::new().matches(&a));
        assert!(AlertFilter::new().service("api").state(AlertState::Open).matches(&a));
        assert!(!AlertFilter::new().alert_type(AlertType::Metric).matches(&a));
        assert!(!AlertFilter::new().level(Level::Critical).matches(&a));
    }
}
