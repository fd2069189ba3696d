use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;
use vigil_alert::{AggregationThreshold, AlertEventBus, AlertManager, InMemoryAlertRepository};
use vigil_audit::{InMemoryAuditRepository, SecurityAuditLog};
use vigil_config::{ServiceConfig, VigilConfig};
use vigil_core::{SharedClock, VigilError};
use vigil_health::{HealthEvaluator, HttpProbe, ServiceRegistration};
use vigil_metrics::{Aggregator, InMemoryMetricRepository, MetricAggregation, MetricStore};

/// 带告警阈值的聚合规则
#[derive(Debug, Clone, Serialize)]
pub struct AggregationRule {
    pub name: String,
    pub spec_id: Uuid,
    pub threshold: Option<AggregationThreshold>,
    /// 最近一次应用阈值的结果的计算时间
    pub last_evaluated: Option<DateTime<Utc>>,
}

/// 一次聚合巡检的结果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    /// 成功计算的规则数
    pub evaluated: usize,
    /// 状态发生变化的告警数
    pub alerts_changed: usize,
    /// 样本不足而跳过的规则数
    pub insufficient: usize,
    pub failed: usize,
}

/// 组件装配
///
/// 持有所有核心组件，供调度器和通知器共享。
pub struct Engine {
    clock: SharedClock,
    store: Arc<MetricStore>,
    aggregator: Arc<Aggregator>,
    evaluator: Arc<HealthEvaluator>,
    alerts: Arc<AlertManager>,
    audit: Arc<SecurityAuditLog>,
    bus: AlertEventBus,
    rules: RwLock<Vec<AggregationRule>>,
    retention: chrono::Duration,
}

impl Engine {
    /// 按配置装配组件，使用内存存储
    pub async fn from_config(config: &VigilConfig, clock: SharedClock) -> Result<Self> {
        config.validate()?;

        let bus = AlertEventBus::new(config.alerts.event_capacity);

        let store = Arc::new(MetricStore::new(
            Arc::new(InMemoryMetricRepository::new()),
            clock.clone(),
        ));
        for metric_type in &config.metrics.types {
            store
                .define_type(metric_type.clone())
                .await
                .with_context(|| format!("failed to define metric type {}", metric_type.name))?;
        }

        let alerts = Arc::new(
            AlertManager::new(
                Arc::new(InMemoryAlertRepository::new()),
                clock.clone(),
                bus.clone(),
            )
            .with_policy(config.alerts.policy()),
        );

        let evaluator = Arc::new(
            HealthEvaluator::new(clock.clone(), config.health.default_timeout())
                .with_sink(alerts.clone())
                .with_failure_metrics(store.clone())
                .await?,
        );

        let audit = Arc::new(
            SecurityAuditLog::new(Arc::new(InMemoryAuditRepository::new()), clock.clone())
                .with_alerts(alerts.clone()),
        );

        let engine = Self {
            clock,
            aggregator: Arc::new(Aggregator::new(store.clone())),
            store,
            evaluator,
            alerts,
            audit,
            bus,
            rules: RwLock::new(Vec::new()),
            retention: config.metrics.retention(),
        };

        for service in &config.health.services {
            engine
                .register_http_service(service, config.health.default_timeout())
                .await?;
        }

        for agg in &config.metrics.aggregations {
            engine
                .add_aggregation_rule(agg.name.clone(), agg.to_spec(), agg.alert)
                .await
                .with_context(|| format!("failed to register aggregation {}", agg.name))?;
        }

        info!(
            services = config.health.services.len(),
            metric_types = config.metrics.types.len(),
            aggregations = config.metrics.aggregations.len(),
            "Engine initialized"
        );
        Ok(engine)
    }

    async fn register_http_service(
        &self,
        service: &ServiceConfig,
        default_timeout: std::time::Duration,
    ) -> Result<()> {
        let timeout = service.timeout().unwrap_or(default_timeout);
        let probe = HttpProbe::new(service.url.clone(), timeout)?;

        let mut registration =
            ServiceRegistration::new(service.name.clone(), Arc::new(probe), service.interval())
                .with_thresholds(service.threshold_set()?);
        if let Some(timeout) = service.timeout() {
            registration = registration.with_timeout(timeout);
        }

        self.evaluator.register_service(registration).await?;
        Ok(())
    }

    /// 注册聚合定义，并可选地附加告警阈值
    pub async fn add_aggregation_rule(
        &self,
        name: impl Into<String>,
        spec: MetricAggregation,
        threshold: Option<AggregationThreshold>,
    ) -> Result<AggregationRule> {
        let spec = self.aggregator.register(spec).await?;
        let rule = AggregationRule {
            name: name.into(),
            spec_id: spec.id,
            threshold,
            last_evaluated: None,
        };

        let mut rules = self.rules.write().await;
        rules.push(rule.clone());
        Ok(rule)
    }

    pub async fn rules(&self) -> Vec<AggregationRule> {
        self.rules.read().await.clone()
    }

    /// 计算所有聚合规则并应用阈值
    ///
    /// 单条规则失败不影响其他规则。
    pub async fn sweep_aggregations(&self) -> SweepReport {
        let rules = self.rules().await;
        let mut report = SweepReport::default();

        for rule in rules {
            match self.sweep_rule(&rule).await {
                Ok(changed) => {
                    report.evaluated += 1;
                    report.alerts_changed += changed;
                }
                Err(VigilError::InsufficientData { group, required, actual }) => {
                    debug!(
                        rule = %rule.name,
                        group = %group,
                        required,
                        actual,
                        "Aggregation skipped: insufficient data"
                    );
                    report.insufficient += 1;
                }
                Err(e) => {
                    warn!(rule = %rule.name, error = %e, "Aggregation sweep failed");
                    report.failed += 1;
                }
            }
        }

        debug!(
            evaluated = report.evaluated,
            alerts_changed = report.alerts_changed,
            "Aggregation sweep completed"
        );
        report
    }

    async fn sweep_rule(&self, rule: &AggregationRule) -> vigil_core::Result<usize> {
        let result = self.aggregator.get_or_compute(rule.spec_id).await?;
        let Some(threshold) = &rule.threshold else {
            return Ok(0);
        };

        let spec = self.aggregator.spec(rule.spec_id).await?;

        // 窗口内复用的缓存结果只应用一次阈值
        let previous = {
            let mut rules = self.rules.write().await;
            let Some(entry) = rules.iter_mut().find(|r| r.spec_id == rule.spec_id) else {
                return Ok(0);
            };
            if entry.last_evaluated == Some(result.computed_at) {
                debug!(rule = %rule.name, "Aggregation result already evaluated");
                return Ok(0);
            }
            entry.last_evaluated.replace(result.computed_at)
        };

        match self
            .alerts
            .evaluate_aggregation(&spec, &result, threshold)
            .await
        {
            Ok(changed) => Ok(changed.len()),
            Err(e) => {
                let mut rules = self.rules.write().await;
                if let Some(entry) = rules.iter_mut().find(|r| r.spec_id == rule.spec_id) {
                    entry.last_evaluated = previous;
                }
                Err(e)
            }
        }
    }

    /// 按保留策略清理过期样本
    pub async fn apply_retention(&self) -> vigil_core::Result<usize> {
        self.store.apply_retention(self.retention).await
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    pub fn evaluator(&self) -> &Arc<HealthEvaluator> {
        &self.evaluator
    }

    pub fn alerts(&self) -> &Arc<AlertManager> {
        &self.alerts
    }

    pub fn audit(&self) -> &Arc<SecurityAuditLog> {
        &self.audit
    }

    pub fn bus(&self) -> &AlertEventBus {
        &self.bus
    }
}
