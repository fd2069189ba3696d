use crate::bus::{AlertEvent, AlertEventBus};
use crate::model::{AlertFilter, AlertKey, AlertType, HealthAlert, Metadata};
use crate::repository::AlertRepository;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;
use vigil_core::{Comparison, Level, Result, SharedClock, VigilError};
use vigil_health::{HealthEvent, HealthEventSink, HealthStatus};
use vigil_metrics::{AggregationResult, GroupKey, MetricAggregation};

/// 告警策略
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertPolicy {
    /// `unknown` 健康状态对应的告警级别，未设置时忽略 `unknown`
    #[serde(default)]
    pub unknown_status_level: Option<Level>,
}

/// 聚合值告警阈值
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregationThreshold {
    pub op: Comparison,
    pub value: f64,
    pub level: Level,
}

impl AggregationThreshold {
    pub fn new(op: Comparison, value: f64, level: Level) -> Self {
        Self { op, value, level }
    }

    pub fn is_breached(&self, observed: f64) -> bool {
        self.op.evaluate(observed, self.value)
    }
}

/// 告警管理器
///
/// 同一 [`AlertKey`] 上的状态变化串行执行，不同键之间互不阻塞。
/// 每次变化只调用一次 `save`，写入成功后才发布 [`AlertEvent`]。
pub struct AlertManager {
    repository: Arc<dyn AlertRepository>,
    clock: SharedClock,
    bus: AlertEventBus,
    policy: AlertPolicy,
    locks: DashMap<AlertKey, Arc<Mutex<()>>>,
}

impl AlertManager {
    pub fn new(repository: Arc<dyn AlertRepository>, clock: SharedClock, bus: AlertEventBus) -> Self {
        Self {
            repository,
            clock,
            bus,
            policy: AlertPolicy::default(),
            locks: DashMap::new(),
        }
    }

    pub fn with_policy(mut self, policy: AlertPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    pub fn bus(&self) -> &AlertEventBus {
        &self.bus
    }

    fn key_lock(&self, key: &AlertKey) -> Arc<Mutex<()>> {
        self.locks
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// 打开或更新 `key` 下的告警
    ///
    /// 已有未解决告警时刷新内容并累计触发次数，否则新建告警。
    pub async fn raise(
        &self,
        key: AlertKey,
        level: Level,
        message: impl Into<String>,
        metadata: Metadata,
    ) -> Result<HealthAlert> {
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let now = self.clock.now();
        match self.repository.find_open(&key).await? {
            Some(mut alert) => {
                alert.refresh(level, message, metadata, now);
                self.repository.save(&alert).await?;

                debug!(
                    alert_id = %alert.id,
                    key = %key,
                    occurrences = alert.occurrences,
                    "Alert updated"
                );
                self.bus.publish(AlertEvent::Updated(alert.clone()));
                Ok(alert)
            }
            None => {
                let alert = HealthAlert::new(&key, level, message, metadata, now);
                self.repository.save(&alert).await?;

                info!(
                    alert_id = %alert.id,
                    key = %key,
                    level = %alert.level,
                    message = %alert.message,
                    "Alert raised"
                );
                self.bus.publish(AlertEvent::Raised(alert.clone()));
                Ok(alert)
            }
        }
    }

    /// 解决 `key` 下的未解决告警，没有时返回 `None`
    pub async fn clear(&self, key: &AlertKey) -> Result<Option<HealthAlert>> {
        let lock = self.key_lock(key);
        let _guard = lock.lock().await;

        let Some(mut alert) = self.repository.find_open(key).await? else {
            return Ok(None);
        };

        alert.resolve(self.clock.now())?;
        self.repository.save(&alert).await?;

        info!(alert_id = %alert.id, key = %key, "Alert resolved");
        self.bus.publish(AlertEvent::Resolved(alert.clone()));
        Ok(Some(alert))
    }

    /// 确认告警
    ///
    /// # 错误
    /// * `NotFound` - 告警不存在
    /// * `InvalidState` - 告警已解决
    pub async fn acknowledge(&self, id: Uuid) -> Result<HealthAlert> {
        let key = self.get(id).await?.key();
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        // 加锁后重新读取
        let mut alert = self.get(id).await?;
        if !alert.acknowledge(self.clock.now())? {
            return Ok(alert);
        }
        self.repository.save(&alert).await?;

        info!(alert_id = %alert.id, key = %key, "Alert acknowledged");
        self.bus.publish(AlertEvent::Acknowledged(alert.clone()));
        Ok(alert)
    }

    /// 手动解决告警
    ///
    /// # 错误
    /// * `NotFound` - 告警不存在
    /// * `InvalidState` - 告警已解决
    pub async fn resolve(&self, id: Uuid) -> Result<HealthAlert> {
        let key = self.get(id).await?.key();
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        let mut alert = self.get(id).await?;
        alert.resolve(self.clock.now())?;
        self.repository.save(&alert).await?;

        info!(alert_id = %alert.id, key = %key, "Alert resolved");
        self.bus.publish(AlertEvent::Resolved(alert.clone()));
        Ok(alert)
    }

    pub async fn get(&self, id: Uuid) -> Result<HealthAlert> {
        self.repository
            .get(id)
            .await?
            .ok_or_else(|| VigilError::not_found(format!("alert {}", id)))
    }

    /// 按触发时间倒序列出告警
    pub async fn list(&self, filter: AlertFilter) -> Result<Vec<HealthAlert>> {
        let mut alerts = self.repository.list(&filter).await?;
        alerts.sort_by(|a, b| b.triggered_at.cmp(&a.triggered_at));
        Ok(alerts)
    }

    /// 处理健康状态变化
    ///
    /// warning/critical 打开或更新告警，ok 解决告警，
    /// unknown 按 [`AlertPolicy::unknown_status_level`] 处理。
    pub async fn on_health_event(&self, event: &HealthEvent) -> Result<Option<HealthAlert>> {
        let key = AlertKey::health(event.service_name.clone());

        let level = match event.status {
            HealthStatus::Ok => return self.clear(&key).await,
            HealthStatus::Warning | HealthStatus::Critical => event.status.level(),
            HealthStatus::Unknown => self.policy.unknown_status_level,
        };

        let Some(level) = level else {
            debug!(service = %event.service_name, "Unknown health status ignored by policy");
            return Ok(None);
        };

        let message = match (&event.error, event.value) {
            (Some(error), _) => format!("Service {} is {}: {}", event.service_name, event.status, error),
            (None, Some(value)) => format!(
                "Service {} is {} (value={:.2})",
                event.service_name, event.status, value
            ),
            (None, None) => format!("Service {} is {}", event.service_name, event.status),
        };

        let mut metadata = Metadata::new();
        metadata.insert("status".to_string(), json!(event.status));
        metadata.insert("value".to_string(), json!(event.value));
        metadata.insert("checked_at".to_string(), json!(event.timestamp));
        if let Some(previous) = event.previous_status {
            metadata.insert("previous_status".to_string(), json!(previous));
        }
        if let Some(error) = &event.error {
            metadata.insert("error".to_string(), json!(error));
        }

        self.raise(key, level, message, metadata).await.map(Some)
    }

    /// 处理单个分组的聚合值：越过阈值时打开或更新告警，否则解决告警
    pub async fn on_aggregation_breach(
        &self,
        spec: &MetricAggregation,
        group: &GroupKey,
        value: f64,
        threshold: &AggregationThreshold,
    ) -> Result<Option<HealthAlert>> {
        let subject = spec.describe_group(group);
        let key = AlertKey::metric(subject.clone());

        if !threshold.is_breached(value) {
            return self.clear(&key).await;
        }

        let message = format!(
            "{} {} = {:.2} {} {}",
            subject,
            spec.aggregation.method(),
            value,
            threshold.op,
            threshold.value
        );

        let mut metadata = Metadata::new();
        metadata.insert("aggregation_id".to_string(), json!(spec.id));
        metadata.insert("metric_type".to_string(), json!(spec.metric_type));
        metadata.insert("group".to_string(), json!(group));
        metadata.insert("method".to_string(), json!(spec.aggregation.method()));
        metadata.insert("value".to_string(), json!(value));
        metadata.insert("threshold".to_string(), json!(threshold.value));
        metadata.insert("op".to_string(), json!(threshold.op));
        metadata.insert("window_secs".to_string(), json!(spec.window_secs));

        self.raise(key, threshold.level, message, metadata)
            .await
            .map(Some)
    }

    /// 对聚合结果的每个分组应用阈值，返回发生变化的告警
    ///
    /// 该聚合下已不在结果中的分组（窗口内没有样本）的未解决告警会被解决。
    pub async fn evaluate_aggregation(
        &self,
        spec: &MetricAggregation,
        result: &AggregationResult,
        threshold: &AggregationThreshold,
    ) -> Result<Vec<HealthAlert>> {
        let mut changed = Vec::new();
        for (group, aggregate) in &result.groups {
            if let Some(alert) = self
                .on_aggregation_breach(spec, group, aggregate.value, threshold)
                .await?
            {
                changed.push(alert);
            }
        }

        let reporting: HashSet<String> = result
            .groups
            .keys()
            .map(|group| spec.describe_group(group))
            .collect();
        let spec_id = json!(spec.id);
        let stale: Vec<AlertKey> = self
            .repository
            .list(&AlertFilter::new().alert_type(AlertType::Metric))
            .await?
            .into_iter()
            .filter(|alert| alert.is_open())
            .filter(|alert| alert.metadata.get("aggregation_id") == Some(&spec_id))
            .filter(|alert| !reporting.contains(&alert.service_name))
            .map(|alert| alert.key())
            .collect();

        for key in stale {
            debug!(key = %key, "Metric group stopped reporting");
            if let Some(alert) = self.clear(&key).await? {
                changed.push(alert);
            }
        }
        Ok(changed)
    }
}

#[async_trait]
impl HealthEventSink for AlertManager {
    async fn on_health_event(&self, event: &HealthEvent) -> Result<()> {
        AlertManager::on_health_event(self, event).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AlertState;
    use crate::repository::InMemoryAlertRepository;
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::sync::broadcast::error::TryRecvError;
    use vigil_core::ManualClock;
    use vigil_metrics::{Aggregation, GroupAggregate, GroupLabel};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn manager() -> (Arc<AlertManager>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(t0()));
        let manager = AlertManager::new(
            Arc::new(InMemoryAlertRepository::new()),
            clock.clone(),
            AlertEventBus::new(64),
        );
        (Arc::new(manager), clock)
    }

    fn health(status: HealthStatus, previous: Option<HealthStatus>, value: f64) -> HealthEvent {
        HealthEvent {
            service_name: "api".to_string(),
            status,
            value: Some(value),
            timestamp: t0(),
            previous_status: previous,
            error: None,
        }
    }

    fn meta(n: i64) -> Metadata {
        let mut m = Metadata::new();
        m.insert("n".to_string(), json!(n));
        m
    }

    /// 保存可以被切换为失败的存储
    struct FlakyRepository {
        inner: InMemoryAlertRepository,
        fail: AtomicBool,
    }

    #[async_trait]
    impl AlertRepository for FlakyRepository {
        async fn save(&self, alert: &HealthAlert) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(VigilError::storage("database offline"));
            }
            self.inner.save(alert).await
        }

        async fn get(&self, id: Uuid) -> Result<Option<HealthAlert>> {
            self.inner.get(id).await
        }

        async fn find_open(&self, key: &AlertKey) -> Result<Option<HealthAlert>> {
            self.inner.find_open(key).await
        }

        async fn list(&self, filter: &AlertFilter) -> Result<Vec<HealthAlert>> {
            self.inner.list(filter).await
        }
    }

    #[tokio::test]
    async fn test_repeated_breaches_fold_into_one_alert() {
        let (manager, clock) = manager();
        let key = AlertKey::health("api");

        for n in 0..5 {
            manager
                .raise(key.clone(), Level::Warning, format!("breach {}", n), meta(n))
                .await
                .unwrap();
            clock.advance(Duration::seconds(10));
        }

        let open = manager
            .list(AlertFilter::new().service("api").state(AlertState::Open))
            .await
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].occurrences, 5);
        assert_eq!(open[0].metadata["n"], json!(4));
        assert_eq!(open[0].triggered_at, t0());
        assert_eq!(open[0].updated_at, t0() + Duration::seconds(40));
    }

    #[tokio::test]
    async fn test_acknowledge_is_idempotent_and_resolve_is_not() {
        let (manager, _) = manager();
        let alert = manager
            .raise(AlertKey::health("api"), Level::Critical, "down", Metadata::new())
            .await
            .unwrap();

        let first = manager.acknowledge(alert.id).await.unwrap();
        let second = manager.acknowledge(alert.id).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(second.state, AlertState::Acknowledged);

        let resolved = manager.resolve(alert.id).await.unwrap();
        assert!(resolved.resolved_at.is_some());
        assert!(matches!(
            manager.resolve(alert.id).await.unwrap_err(),
            VigilError::InvalidState { .. }
        ));
        assert!(matches!(
            manager.acknowledge(alert.id).await.unwrap_err(),
            VigilError::InvalidState { .. }
        ));
        assert!(matches!(
            manager.acknowledge(Uuid::new_v4()).await.unwrap_err(),
            VigilError::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_health_transitions_drive_alert_lifecycle() {
        let (manager, _) = manager();
        let mut rx = manager.bus().subscribe();

        let raised = manager
            .on_health_event(&health(HealthStatus::Critical, Some(HealthStatus::Ok), 150.0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(raised.level, Level::Critical);
        assert_eq!(raised.alert_type, AlertType::Health);

        let resolved = manager
            .on_health_event(&health(HealthStatus::Ok, Some(HealthStatus::Critical), 10.0))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved.id, raised.id);
        assert_eq!(resolved.state, AlertState::Resolved);

        assert_eq!(rx.try_recv().unwrap().kind(), "raised");
        assert_eq!(rx.try_recv().unwrap().kind(), "resolved");
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));

        // 没有未解决告警时 ok 不产生任何变化
        assert!(manager
            .on_health_event(&health(HealthStatus::Ok, None, 1.0))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_unknown_status_policy() {
        let mut event = health(HealthStatus::Unknown, Some(HealthStatus::Ok), 0.0);
        event.value = None;
        event.error = Some("probe timed out".to_string());

        let (manager, _) = manager();
        assert!(manager.on_health_event(&event).await.unwrap().is_none());

        let clock = Arc::new(ManualClock::new(t0()));
        let strict = AlertManager::new(
            Arc::new(InMemoryAlertRepository::new()),
            clock,
            AlertEventBus::default(),
        )
        .with_policy(AlertPolicy {
            unknown_status_level: Some(Level::Warning),
        });
        let alert = strict.on_health_event(&event).await.unwrap().unwrap();
        assert_eq!(alert.level, Level::Warning);
        assert!(alert.message.contains("probe timed out"));
    }

    #[tokio::test]
    async fn test_failed_save_leaves_state_untouched() {
        let repo = Arc::new(FlakyRepository {
            inner: InMemoryAlertRepository::new(),
            fail: AtomicBool::new(false),
        });
        let manager = AlertManager::new(
            repo.clone(),
            Arc::new(ManualClock::new(t0())),
            AlertEventBus::new(16),
        );
        let alert = manager
            .raise(AlertKey::health("db"), Level::Warning, "slow", Metadata::new())
            .await
            .unwrap();

        let mut rx = manager.bus().subscribe();
        repo.fail.store(true, Ordering::SeqCst);

        assert!(manager.acknowledge(alert.id).await.unwrap_err().is_storage());
        assert!(manager
            .raise(AlertKey::health("db"), Level::Critical, "down", Metadata::new())
            .await
            .is_err());

        let stored = manager.get(alert.id).await.unwrap();
        assert_eq!(stored, alert);
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_raises_create_one_alert() {
        let (manager, _) = manager();

        let handles: Vec<_> = (0..16)
            .map(|n| {
                let manager = manager.clone();
                tokio::spawn(async move {
                    manager
                        .raise(AlertKey::health("api"), Level::Warning, "flapping", meta(n))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let alerts = manager.list(AlertFilter::new()).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].occurrences, 16);
    }

    #[tokio::test]
    async fn test_aggregation_breach_per_group() {
        let (manager, _) = manager();
        let spec = MetricAggregation::new("latency_ms", Aggregation::Avg, Duration::seconds(60))
            .with_group_by(vec![GroupLabel::required("region")]);
        let threshold = AggregationThreshold::new(Comparison::GreaterThan, 200.0, Level::Critical);

        let mut groups = std::collections::BTreeMap::new();
        groups.insert(GroupKey::of(["eu"]), GroupAggregate { value: 250.0, samples: 3 });
        groups.insert(GroupKey::of(["us"]), GroupAggregate { value: 120.0, samples: 4 });
        let result = AggregationResult {
            spec_id: spec.id,
            window: vigil_core::TimeRange::window(t0(), spec.window()),
            computed_at: t0(),
            groups,
        };

        let changed = manager
            .evaluate_aggregation(&spec, &result, &threshold)
            .await
            .unwrap();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].service_name, "latency_ms[region=eu]");
        assert_eq!(changed[0].alert_type, AlertType::Metric);
        assert_eq!(changed[0].metadata["value"], json!(250.0));

        let cleared = manager
            .on_aggregation_breach(&spec, &GroupKey::of(["eu"]), 150.0, &threshold)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(cleared.state, AlertState::Resolved);
    }

    #[tokio::test]
    async fn test_silent_group_is_resolved() {
        let (manager, _) = manager();
        let spec = MetricAggregation::new("latency_ms", Aggregation::Max, Duration::seconds(60))
            .with_group_by(vec![GroupLabel::required("region")]);
        let other = MetricAggregation::new("latency_ms", Aggregation::Max, Duration::seconds(60))
            .with_group_by(vec![GroupLabel::required("region")]);
        let threshold = AggregationThreshold::new(Comparison::GreaterThan, 200.0, Level::Warning);

        let result = |groups: Vec<(&str, f64)>| AggregationResult {
            spec_id: spec.id,
            window: vigil_core::TimeRange::window(t0(), spec.window()),
            computed_at: t0(),
            groups: groups
                .into_iter()
                .map(|(region, value)| {
                    (GroupKey::of([region]), GroupAggregate { value, samples: 1 })
                })
                .collect(),
        };

        manager
            .evaluate_aggregation(&spec, &result(vec![("eu", 250.0), ("us", 300.0)]), &threshold)
            .await
            .unwrap();
        manager
            .on_aggregation_breach(&other, &GroupKey::of(["ap"]), 400.0, &threshold)
            .await
            .unwrap();

        // eu 不再上报，us 仍在越限
        let changed = manager
            .evaluate_aggregation(&spec, &result(vec![("us", 310.0)]), &threshold)
            .await
            .unwrap();
        let resolved: Vec<&str> = changed
            .iter()
            .filter(|a| a.state == AlertState::Resolved)
            .map(|a| a.service_name.as_str())
            .collect();
        assert_eq!(resolved, vec!["latency_ms[region=eu]"]);

        // 窗口为空时该聚合的告警全部解决，其他聚合的告警不受影响
        manager
            .evaluate_aggregation(&spec, &result(vec![]), &threshold)
            .await
            .unwrap();
        let open: Vec<String> = manager
            .list(AlertFilter::new().alert_type(AlertType::Metric).state(AlertState::Open))
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.service_name)
            .collect();
        assert_eq!(open, vec!["latency_ms[region=ap]"]);
    }

    #[tokio::test]
    async fn test_list_orders_newest_first() {
        let (manager, clock) = manager();
        for service in ["a", "b", "c"] {
            manager
                .raise(AlertKey::health(service), Level::Info, "note", Metadata::new())
                .await
                .unwrap();
            clock.advance(Duration::minutes(1));
        }

        let names: Vec<String> = manager
            .list(AlertFilter::new().alert_type(AlertType::Health))
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.service_name)
            .collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }
}
