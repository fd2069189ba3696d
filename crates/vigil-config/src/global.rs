use anyhow::{anyhow, bail, Result};
use chrono::Duration as ChronoDuration;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use vigil_alert::{AggregationThreshold, AlertPolicy};
use vigil_core::Level;
use vigil_health::{HealthThreshold, ThresholdSet, PROBE_FAILURE_METRIC};
use vigil_logging::LoggingConfig;
use vigil_metrics::{Aggregation, GroupLabel, MetricAggregation, MetricType, TagFilter};

/// 全局配置（`vigil.toml`）
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct VigilConfig {
    pub system: SystemConfig,
    pub logging: LoggingConfig,
    pub health: HealthConfig,
    pub metrics: MetricsConfig,
    pub alerts: AlertsConfig,
    pub scheduler: SchedulerConfig,
}

/// 系统配置
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SystemConfig {
    pub name: String,
    pub version: String,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            name: "Vigil Health Monitor".to_string(),
            version: "0.1.0".to_string(),
        }
    }
}

/// 健康检查配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    /// 探针默认超时（毫秒）
    #[serde(default = "default_probe_timeout_ms")]
    pub default_timeout_ms: u64,

    #[serde(default)]
    pub services: Vec<ServiceConfig>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: default_probe_timeout_ms(),
            services: Vec::new(),
        }
    }
}

impl HealthConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }
}

/// 被检查的服务（HTTP 探针）
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    pub name: String,
    pub url: String,

    /// 检查间隔（秒）
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// 阈值作用于响应耗时（毫秒）
    #[serde(default)]
    pub thresholds: Vec<HealthThreshold>,
}

impl ServiceConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    pub fn threshold_set(&self) -> vigil_core::Result<ThresholdSet> {
        ThresholdSet::new(self.thresholds.clone())
    }
}

/// 指标配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MetricsConfig {
    /// 样本保留天数
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    #[serde(default)]
    pub types: Vec<MetricType>,

    #[serde(default)]
    pub aggregations: Vec<AggregationConfig>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            retention_days: default_retention_days(),
            types: Vec::new(),
            aggregations: Vec::new(),
        }
    }
}

impl MetricsConfig {
    pub fn retention(&self) -> ChronoDuration {
        ChronoDuration::days(self.retention_days as i64)
    }
}

/// 聚合定义，可选附带告警阈值
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AggregationConfig {
    pub name: String,
    pub metric_type: String,
    pub aggregation: Aggregation,
    pub window_secs: i64,

    #[serde(default)]
    pub group_by: Vec<GroupLabel>,

    #[serde(default)]
    pub filters: TagFilter,

    #[serde(default)]
    pub min_samples: Option<usize>,

    #[serde(default)]
    pub alert: Option<AggregationThreshold>,
}

impl AggregationConfig {
    pub fn to_spec(&self) -> MetricAggregation {
        let spec = MetricAggregation::new(
            self.metric_type.clone(),
            self.aggregation,
            ChronoDuration::seconds(self.window_secs),
        )
        .with_group_by(self.group_by.clone())
        .with_filters(self.filters.clone());

        match self.min_samples {
            Some(n) => spec.with_min_samples(n),
            None => spec,
        }
    }
}

/// 告警配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AlertsConfig {
    /// `unknown` 健康状态的告警级别，不设置则忽略
    #[serde(default)]
    pub unknown_status_level: Option<Level>,

    /// 告警事件总线容量
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// 是否把告警事件写入日志
    #[serde(default = "default_true")]
    pub log_events: bool,

    #[serde(default)]
    pub webhooks: Vec<WebhookConfig>,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            unknown_status_level: None,
            event_capacity: default_event_capacity(),
            log_events: true,
            webhooks: Vec::new(),
        }
    }
}

impl AlertsConfig {
    pub fn policy(&self) -> AlertPolicy {
        AlertPolicy {
            unknown_status_level: self.unknown_status_level,
        }
    }
}

/// Webhook 通知配置
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebhookConfig {
    pub url: String,

    #[serde(default = "default_webhook_timeout_ms")]
    pub timeout_ms: u64,

    /// 低于该级别的告警不推送
    #[serde(default = "default_webhook_level")]
    pub min_level: Level,
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// 调度配置（cron 表达式含秒字段）
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub aggregation_cron: String,
    pub retention_cron: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            aggregation_cron: "0/30 * * * * *".to_string(),
            retention_cron: "0 0 * * * *".to_string(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_probe_timeout_ms() -> u64 {
    5000
}

fn default_interval_secs() -> u64 {
    30
}

fn default_retention_days() -> u64 {
    7
}

fn default_event_capacity() -> usize {
    256
}

fn default_webhook_timeout_ms() -> u64 {
    3000
}

fn default_webhook_level() -> Level {
    Level::Warning
}

impl VigilConfig {
    /// 校验配置的一致性
    pub fn validate(&self) -> Result<()> {
        if self.health.default_timeout_ms == 0 {
            bail!("health.default_timeout_ms must be greater than 0");
        }

        let mut services = HashSet::new();
        for service in &self.health.services {
            if service.name.trim().is_empty() {
                bail!("health service name must not be empty");
            }
            if !services.insert(service.name.as_str()) {
                bail!("duplicate health service: {}", service.name);
            }
            if service.url.trim().is_empty() {
                bail!("health service {} has no url", service.name);
            }
            if service.interval_secs == 0 {
                bail!("interval_secs of service {} must be greater than 0", service.name);
            }
            if service.timeout_ms == Some(0) {
                bail!("timeout_ms of service {} must be greater than 0", service.name);
            }
            service
                .threshold_set()
                .map_err(|e| anyhow!("service {}: {}", service.name, e))?;
        }

        let mut types = HashSet::new();
        for metric_type in &self.metrics.types {
            if metric_type.name.trim().is_empty() {
                bail!("metric type name must not be empty");
            }
            if !types.insert(metric_type.name.as_str()) {
                bail!("duplicate metric type: {}", metric_type.name);
            }
        }

        let mut aggregations = HashSet::new();
        for agg in &self.metrics.aggregations {
            if !aggregations.insert(agg.name.as_str()) {
                bail!("duplicate aggregation: {}", agg.name);
            }
            if !types.contains(agg.metric_type.as_str()) && agg.metric_type != PROBE_FAILURE_METRIC {
                bail!(
                    "aggregation {} references unknown metric type {}",
                    agg.name,
                    agg.metric_type
                );
            }
            if agg.window_secs <= 0 {
                bail!("window_secs of aggregation {} must be greater than 0", agg.name);
            }
            if let Aggregation::Percentile { p } = agg.aggregation {
                if !(0.0..=100.0).contains(&p) {
                    bail!("percentile of aggregation {} must be within [0, 100], got {}", agg.name, p);
                }
            }
            if let Some(alert) = &agg.alert {
                if !alert.value.is_finite() {
                    bail!("alert threshold of aggregation {} must be finite", agg.name);
                }
            }
        }

        if self.alerts.event_capacity == 0 {
            bail!("alerts.event_capacity must be greater than 0");
        }
        for webhook in &self.alerts.webhooks {
            if webhook.url.trim().is_empty() {
                bail!("webhook url must not be empty");
            }
        }

        if self.scheduler.aggregation_cron.trim().is_empty()
            || self.scheduler.retention_cron.trim().is_empty()
        {
            bail!("scheduler cron expressions must not be empty");
        }

        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vigil_core::Comparison;
    use vigil_metrics::DataType;

    fn service(name: &str) -> ServiceConfig {
        ServiceConfig {
            name: name.to_string(),
            url: "http://localhost:8080/health".to_string(),
            interval_secs: 10,
            timeout_ms: None,
            thresholds: vec![HealthThreshold::critical(Comparison::GreaterThan, 500.0)],
        }
    }

    fn aggregation(metric_type: &str, aggregation: Aggregation) -> AggregationConfig {
        AggregationConfig {
            name: "latency".to_string(),
            metric_type: metric_type.to_string(),
            aggregation,
            window_secs: 60,
            group_by: Vec::new(),
            filters: TagFilter::new(),
            min_samples: None,
            alert: None,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = VigilConfig::default();
        assert_eq!(config.system.name, "Vigil Health Monitor");
        assert_eq!(config.metrics.retention_days, 7);
        assert!(config.alerts.policy().unknown_status_level.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_interval_and_duplicates() {
        let mut config = VigilConfig::default();
        let mut zero = service("api");
        zero.interval_secs = 0;
        config.health.services = vec![zero];
        assert!(config.validate().is_err());

        config.health.services = vec![service("api"), service("api")];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_unknown_metric_type_and_bad_percentile() {
        let mut config = VigilConfig::default();
        config.metrics.aggregations = vec![aggregation("latency_ms", Aggregation::Avg)];
        assert!(config.validate().is_err());

        config.metrics.types = vec![MetricType::new("latency_ms", DataType::Numeric)];
        assert!(config.validate().is_ok());

        config.metrics.aggregations = vec![aggregation("latency_ms", Aggregation::Percentile { p: 120.0 })];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_probe_failure_metric_is_builtin() {
        let mut config = VigilConfig::default();
        config.metrics.aggregations = vec![aggregation(PROBE_FAILURE_METRIC, Aggregation::Count)];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_to_spec() {
        let mut agg = aggregation("latency_ms", Aggregation::Max);
        agg.group_by = vec![GroupLabel::nullable("region")];
        agg.min_samples = Some(3);

        let spec = agg.to_spec();
        assert_eq!(spec.window_secs, 60);
        assert_eq!(spec.min_samples, Some(3));
        assert!(spec.group_by[0].nullable);
    }
}
