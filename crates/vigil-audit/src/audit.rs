use crate::model::{NewSecurityEvent, ReviewStatus, SecurityLogEntry};
use crate::query::{AuditFilter, AuditTrail};
use crate::repository::AuditRepository;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vigil_alert::{AlertKey, AlertManager};
use vigil_core::{Level, Result, SharedClock, TimeRange, VigilError};

/// 安全审计日志
///
/// 只追加；`critical` 条目会转发给告警管理器，
/// 转发失败只记录日志，不影响写入结果。
pub struct SecurityAuditLog {
    repository: Arc<dyn AuditRepository>,
    clock: SharedClock,
    alerts: Option<Arc<AlertManager>>,
}

impl SecurityAuditLog {
    pub fn new(repository: Arc<dyn AuditRepository>, clock: SharedClock) -> Self {
        Self {
            repository,
            clock,
            alerts: None,
        }
    }

    pub fn with_alerts(mut self, alerts: Arc<AlertManager>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// 写入安全事件
    ///
    /// # 错误
    /// * `StorageUnavailable` - 存储不可用
    pub async fn append(&self, event: NewSecurityEvent) -> Result<SecurityLogEntry> {
        let entry = event.into_entry(self.clock.now());
        self.repository.append(&entry).await?;

        if entry.severity == Level::Critical {
            info!(
                entry_id = %entry.id,
                event_type = %entry.event_type,
                actor = ?entry.actor,
                ip_address = ?entry.ip_address,
                "Critical security event recorded"
            );
            self.forward(&entry).await;
        } else {
            debug!(
                entry_id = %entry.id,
                event_type = %entry.event_type,
                severity = %entry.severity,
                "Security event recorded"
            );
        }

        Ok(entry)
    }

    async fn forward(&self, entry: &SecurityLogEntry) {
        let Some(alerts) = &self.alerts else {
            return;
        };

        let mut metadata = entry.metadata.clone();
        metadata.insert("entry_id".to_string(), json!(entry.id));
        metadata.insert("actor".to_string(), json!(entry.actor));
        metadata.insert("ip_address".to_string(), json!(entry.ip_address));
        metadata.insert("user_agent".to_string(), json!(entry.user_agent));

        let key = AlertKey::security(entry.event_type.clone());
        if let Err(e) = alerts
            .raise(key, Level::Critical, entry.description.clone(), metadata)
            .await
        {
            warn!(
                entry_id = %entry.id,
                event_type = %entry.event_type,
                error = %e,
                "Failed to forward security event to alerts"
            );
        }
    }

    /// 查询时间范围内的审计条目，按写入时间倒序
    pub async fn query(&self, filter: AuditFilter, range: TimeRange) -> Result<AuditTrail> {
        let entries = self.repository.range(range).await?;
        Ok(AuditTrail::new(entries, filter))
    }

    pub async fn get(&self, id: Uuid) -> Result<SecurityLogEntry> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| VigilError::not_found(format!("security log entry {}", id)))
    }

    /// 更新处理状态（条目唯一可修改的字段）
    pub async fn update_status(&self, id: Uuid, status: ReviewStatus) -> Result<SecurityLogEntry> {
        let entry = self
            .repository
            .update_status(id, status)
            .await?
            .ok_or_else(|| VigilError::not_found(format!("security log entry {}", id)))?;

        info!(entry_id = %id, status = %status, "Security event status updated");
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryAuditRepository;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use vigil_alert::{
        AlertEventBus, AlertFilter, AlertRepository, AlertType, HealthAlert,
        InMemoryAlertRepository,
    };
    use vigil_core::ManualClock;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 4, 1, 0, 0, 0).unwrap()
    }

    fn audit_log() -> (SecurityAuditLog, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0()));
        let log = SecurityAuditLog::new(Arc::new(InMemoryAuditRepository::new()), clock.clone());
        (log, clock)
    }

    struct OfflineAlerts;

    #[async_trait]
    impl AlertRepository for OfflineAlerts {
        async fn save(&self, _alert: &HealthAlert) -> Result<()> {
            Err(VigilError::storage("alerts offline"))
        }

        async fn get(&self, _id: Uuid) -> Result<Option<HealthAlert>> {
            Err(VigilError::storage("alerts offline"))
        }

        async fn find_open(&self, _key: &AlertKey) -> Result<Option<HealthAlert>> {
            Err(VigilError::storage("alerts offline"))
        }

        async fn list(&self, _filter: &AlertFilter) -> Result<Vec<HealthAlert>> {
            Err(VigilError::storage("alerts offline"))
        }
    }

    struct OfflineAudit;

    #[async_trait]
    impl AuditRepository for OfflineAudit {
        async fn append(&self, _entry: &SecurityLogEntry) -> Result<()> {
            Err(VigilError::storage("audit offline"))
        }

        async fn get(&self, _id: Uuid) -> Result<Option<SecurityLogEntry>> {
            Err(VigilError::storage("audit offline"))
        }

        async fn range(&self, _range: TimeRange) -> Result<Vec<SecurityLogEntry>> {
            Err(VigilError::storage("audit offline"))
        }

        async fn update_status(
            &self,
            _id: Uuid,
            _status: ReviewStatus,
        ) -> Result<Option<SecurityLogEntry>> {
            Err(VigilError::storage("audit offline"))
        }
    }

    #[tokio::test]
    async fn test_query_newest_first_with_filters() {
        let (log, clock) = audit_log();
        for (event_type, severity, actor) in [
            ("login_failed", Level::Warning, "alice"),
            ("login_failed", Level::Info, "bob"),
            ("privilege_escalation", Level::Critical, "mallory"),
        ] {
            log.append(NewSecurityEvent::new(event_type, severity, "event").actor(actor))
                .await
                .unwrap();
            clock.advance(Duration::seconds(1));
        }

        let trail = log.query(AuditFilter::new(), TimeRange::all()).await.unwrap();
        let actors: Vec<&str> = trail.iter().filter_map(|e| e.actor.as_deref()).collect();
        assert_eq!(actors, vec!["mallory", "bob", "alice"]);
        // 可重复迭代
        assert_eq!(trail.count(), 3);
        assert_eq!(trail.count(), 3);

        let warnings = log
            .query(AuditFilter::new().min_severity(Level::Warning), TimeRange::all())
            .await
            .unwrap();
        assert_eq!(warnings.count(), 2);

        let failed = log
            .query(
                AuditFilter::new().event_type("login_failed").severity(Level::Info),
                TimeRange::all(),
            )
            .await
            .unwrap();
        assert_eq!(failed.to_vec()[0].actor.as_deref(), Some("bob"));

        let early = log
            .query(AuditFilter::new(), TimeRange::new(t0(), t0() + Duration::seconds(1)))
            .await
            .unwrap();
        assert_eq!(early.count(), 1);
    }

    #[tokio::test]
    async fn test_critical_entry_raises_security_alert() {
        let clock = Arc::new(ManualClock::new(t0()));
        let alerts = Arc::new(AlertManager::new(
            Arc::new(InMemoryAlertRepository::new()),
            clock.clone(),
            AlertEventBus::new(16),
        ));
        let log = SecurityAuditLog::new(Arc::new(InMemoryAuditRepository::new()), clock)
            .with_alerts(alerts.clone());

        log.append(NewSecurityEvent::new("login_failed", Level::Warning, "bad password"))
            .await
            .unwrap();
        let entry = log
            .append(
                NewSecurityEvent::new("privilege_escalation", Level::Critical, "sudo abuse")
                    .ip_address("10.1.2.3"),
            )
            .await
            .unwrap();

        let raised = alerts
            .list(AlertFilter::new().alert_type(AlertType::Security))
            .await
            .unwrap();
        assert_eq!(raised.len(), 1);
        assert_eq!(raised[0].service_name, "privilege_escalation");
        assert_eq!(raised[0].level, Level::Critical);
        assert_eq!(raised[0].metadata["entry_id"], json!(entry.id));
        assert_eq!(raised[0].metadata["ip_address"], json!("10.1.2.3"));
    }

    #[tokio::test]
    async fn test_forwarding_failure_does_not_fail_append() {
        let clock = Arc::new(ManualClock::new(t0()));
        let alerts = Arc::new(AlertManager::new(
            Arc::new(OfflineAlerts),
            clock.clone(),
            AlertEventBus::new(16),
        ));
        let log = SecurityAuditLog::new(Arc::new(InMemoryAuditRepository::new()), clock)
            .with_alerts(alerts);

        let entry = log
            .append(NewSecurityEvent::new("data_exfiltration", Level::Critical, "large export"))
            .await
            .unwrap();
        assert_eq!(log.get(entry.id).await.unwrap(), entry);
    }

    #[tokio::test]
    async fn test_storage_failure_propagates() {
        let log = SecurityAuditLog::new(Arc::new(OfflineAudit), Arc::new(ManualClock::new(t0())));
        let err = log
            .append(NewSecurityEvent::new("login_failed", Level::Info, "x"))
            .await
            .unwrap_err();
        assert!(err.is_storage());
    }

    #[tokio::test]
    async fn test_update_status() {
        let (log, _) = audit_log();
        let entry = log
            .append(NewSecurityEvent::new("login_failed", Level::Warning, "bad password"))
            .await
            .unwrap();

        let reviewed = log.update_status(entry.id, ReviewStatus::Reviewed).await.unwrap();
        assert_eq!(reviewed.status, ReviewStatus::Reviewed);
        assert_eq!(reviewed.description, entry.description);

        let pending = log
            .query(AuditFilter::new().status(ReviewStatus::Pending), TimeRange::all())
            .await
            .unwrap();
        assert!(pending.is_empty());

        assert!(matches!(
            log.update_status(Uuid::new_v4(), ReviewStatus::Actioned).await.unwrap_err(),
            VigilError::NotFound(_)
        ));
    }
}
