use crate::model::{ReviewStatus, SecurityLogEntry};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use vigil_core::Level;

/// 严重程度过滤方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "match", content = "level")]
pub enum SeverityFilter {
    Exactly(Level),
    AtLeast(Level),
}

impl SeverityFilter {
    pub fn matches(&self, severity: Level) -> bool {
        match self {
            SeverityFilter::Exactly(level) => severity == *level,
            SeverityFilter::AtLeast(level) => severity >= *level,
        }
    }
}

/// 审计查询条件，未设置的字段不参与过滤
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditFilter {
    pub event_type: Option<String>,
    pub severity: Option<SeverityFilter>,
    pub status: Option<ReviewStatus>,
    pub actor: Option<String>,
    pub ip_address: Option<String>,
}

impl AuditFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn severity(mut self, level: Level) -> Self {
        self.severity = Some(SeverityFilter::Exactly(level));
        self
    }

    pub fn min_severity(mut self, level: Level) -> Self {
        self.severity = Some(SeverityFilter::AtLeast(level));
        self
    }

    pub fn status(mut self, status: ReviewStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn ip_address(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn matches(&self, entry: &SecurityLogEntry) -> bool {
        fn same(expected: &Option<String>, actual: Option<&str>) -> bool {
            expected.as_deref().map_or(true, |e| actual == Some(e))
        }

        same(&self.event_type, Some(entry.event_type.as_str()))
            && self.severity.map_or(true, |s| s.matches(entry.severity))
            && self.status.map_or(true, |s| entry.status == s)
            && same(&self.actor, entry.actor.as_deref())
            && same(&self.ip_address, entry.ip_address.as_deref())
    }
}

/// 审计查询结果
///
/// 按写入时间倒序迭代，过滤在迭代时惰性执行，`iter()` 可反复调用。
#[derive(Debug, Clone)]
pub struct AuditTrail {
    /// 按 created_at 升序
    entries: Arc<[SecurityLogEntry]>,
    filter: AuditFilter,
}

impl AuditTrail {
    pub(crate) fn new(entries: Vec<SecurityLogEntry>, filter: AuditFilter) -> Self {
        Self {
            entries: entries.into(),
            filter,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &SecurityLogEntry> + '_ {
        self.entries
            .iter()
            .rev()
            .filter(move |e| self.filter.matches(e))
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn to_vec(&self) -> Vec<SecurityLogEntry> {
        self.iter().cloned().collect()
    }
}

impl<'a> IntoIterator for &'a AuditTrail {
    type Item = &'a SecurityLogEntry;
    type IntoIter = Box<dyn Iterator<Item = &'a SecurityLogEntry> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
