use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;
use vigil_alert::Metadata;
use vigil_core::Level;

/// 审计条目的处理状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReviewStatus {
    #[default]
    Pending,
    Reviewed,
    Actioned,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Reviewed => "reviewed",
            ReviewStatus::Actioned => "actioned",
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 安全审计条目，除 `status` 外写入后不可修改
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityLogEntry {
    pub id: Uuid,
    pub event_type: String,
    pub severity: Level,
    pub description: String,
    pub actor: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub status: ReviewStatus,
    pub created_at: DateTime<Utc>,
}

/// 待写入的安全事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSecurityEvent {
    pub event_type: String,
    pub severity: Level,
    pub description: String,
    #[serde(default)]
    pub actor: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl NewSecurityEvent {
    pub fn new(event_type: impl Into<String>, severity: Level, description: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            severity,
            description: description.into(),
            actor: None,
            ip_address: None,
            user_agent: None,
            metadata: Metadata::new(),
        }
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = Some(user_agent.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    pub(crate) fn into_entry(self, created_at: DateTime<Utc>) -> SecurityLogEntry {
        SecurityLogEntry {
            id: Uuid::new_v4(),
            event_type: self.event_type,
            severity: self.severity,
            description: self.description,
            actor: self.actor,
            ip_address: self.ip_address,
            user_agent: self.user_agent,
            metadata: self.metadata,
            status: ReviewStatus::Pending,
            created_at,
        }
    }
}
