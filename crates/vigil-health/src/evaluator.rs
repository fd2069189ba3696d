use crate::probe::SharedProbe;
use crate::status::{HealthEvent, HealthStatus};
use crate::threshold::ThresholdSet;
use async_trait::async_trait;
use dashmap::DashMap;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use vigil_core::{Labels, Result, SharedClock, VigilError};
use vigil_metrics::{AggregationMethod, DataType, MetricStore, MetricType};

/// 探针失败计数指标
pub const PROBE_FAILURE_METRIC: &str = "health_check_failures";

/// 健康事件接收方（通常是告警管理器）
#[async_trait]
pub trait HealthEventSink: Send + Sync {
    async fn on_health_event(&self, event: &HealthEvent) -> Result<()>;
}

/// 服务注册信息
pub struct ServiceRegistration {
    pub name: String,
    pub probe: SharedProbe,
    /// 期望的检查间隔，由外部调度器使用
    pub interval: Duration,
    pub thresholds: ThresholdSet,
    /// 单次探测超时，缺省使用评估器的默认值
    pub timeout: Option<Duration>,
}

impl ServiceRegistration {
    pub fn new(name: impl Into<String>, probe: SharedProbe, interval: Duration) -> Self {
        Self {
            name: name.into(),
            probe,
            interval,
            thresholds: ThresholdSet::default(),
            timeout: None,
        }
    }

    pub fn with_thresholds(mut self, thresholds: ThresholdSet) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// 已注册服务的概要
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    pub interval: Duration,
}

/// 健康评估器
///
/// 每次 `evaluate` 只调用一次探针；除最后一次状态外不保存任何状态，
/// 仅在状态发生变化时把事件转发给接收方。
/// 同一服务的评估串行执行，不同服务之间互不阻塞。
pub struct HealthEvaluator {
    services: RwLock<HashMap<String, Arc<ServiceRegistration>>>,
    last_status: DashMap<String, HealthStatus>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    clock: SharedClock,
    default_timeout: Duration,
    metrics: Option<Arc<MetricStore>>,
    sink: Option<Arc<dyn HealthEventSink>>,
}

impl HealthEvaluator {
    pub fn new(clock: SharedClock, default_timeout: Duration) -> Self {
        Self {
            services: RwLock::new(HashMap::new()),
            last_status: DashMap::new(),
            locks: DashMap::new(),
            clock,
            default_timeout,
            metrics: None,
            sink: None,
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn HealthEventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// 探针失败时记录到指标存储，必要时定义失败计数指标类型
    pub async fn with_failure_metrics(mut self, store: Arc<MetricStore>) -> Result<Self> {
        let failure_type = MetricType::new(PROBE_FAILURE_METRIC, DataType::Numeric)
            .with_description("Health probe failures (errors and timeouts)")
            .with_unit("failures")
            .with_methods([AggregationMethod::Count, AggregationMethod::Sum]);

        match store.define_type(failure_type).await {
            Ok(_) | Err(VigilError::DuplicateType(_)) => {}
            Err(e) => return Err(e),
        }

        self.metrics = Some(store);
        Ok(self)
    }

    /// 注册服务
    pub async fn register_service(&self, registration: ServiceRegistration) -> Result<()> {
        if registration.name.trim().is_empty() {
            return Err(VigilError::validation("service name must not be empty"));
        }
        if registration.interval.is_zero() {
            return Err(VigilError::validation(format!(
                "interval for service {} must be positive",
                registration.name
            )));
        }

        let mut services = self.services.write().await;
        if services.contains_key(&registration.name) {
            return Err(VigilError::validation(format!(
                "service {} is already registered",
                registration.name
            )));
        }

        info!(
            service = %registration.name,
            probe = registration.probe.name(),
            interval = ?registration.interval,
            thresholds = registration.thresholds.iter().count(),
            "Service registered"
        );
        services.insert(registration.name.clone(), Arc::new(registration));
        Ok(())
    }

    pub async fn deregister_service(&self, name: &str) -> Result<()> {
        let mut services = self.services.write().await;
        services
            .remove(name)
            .ok_or_else(|| VigilError::not_found(format!("service {}", name)))?;
        self.last_status.remove(name);
        self.locks.remove(name);
        info!(service = %name, "Service deregistered");
        Ok(())
    }

    pub async fn services(&self) -> Vec<ServiceInfo> {
        let services = self.services.read().await;
        let mut list: Vec<ServiceInfo> = services
            .values()
            .map(|s| ServiceInfo {
                name: s.name.clone(),
                interval: s.interval,
            })
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub fn last_status(&self, name: &str) -> Option<HealthStatus> {
        self.last_status.get(name).map(|s| *s)
    }

    fn service_lock(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// 评估单个服务
    ///
    /// 探针失败或超时得到 `unknown` 状态而不是错误。
    ///
    /// # 错误
    /// * `NotFound` - 服务未注册
    /// * 接收方处理状态变化失败时返回其错误，且不更新最后状态
    pub async fn evaluate(&self, name: &str) -> Result<HealthEvent> {
        let service = {
            let services = self.services.read().await;
            services
                .get(name)
                .cloned()
                .ok_or_else(|| VigilError::not_found(format!("service {}", name)))?
        };

        // 探测、更新状态、转发与回滚在同一把锁内完成
        let lock = self.service_lock(name);
        let _guard = lock.lock().await;

        let timeout = service.timeout.unwrap_or(self.default_timeout);
        let outcome = tokio::time::timeout(timeout, service.probe.check()).await;

        let (status, value, error) = match outcome {
            Ok(Ok(signal)) => {
                let v = signal.as_f64();
                if v.is_finite() {
                    (service.thresholds.classify(v), Some(v), None)
                } else {
                    self.record_failure(name, "error").await;
                    (HealthStatus::Unknown, None, Some(format!("non-finite signal {}", v)))
                }
            }
            Ok(Err(e)) => {
                warn!(service = %name, error = %e, "Health probe failed");
                self.record_failure(name, "error").await;
                (HealthStatus::Unknown, None, Some(e.to_string()))
            }
            Err(_) => {
                warn!(service = %name, timeout = ?timeout, "Health probe timed out");
                self.record_failure(name, "timeout").await;
                (
                    HealthStatus::Unknown,
                    None,
                    Some(format!("probe timed out after {:?}", timeout)),
                )
            }
        };

        let previous = self.last_status.insert(name.to_string(), status);
        let event = HealthEvent {
            service_name: name.to_string(),
            status,
            value,
            timestamp: self.clock.now(),
            previous_status: previous,
            error,
        };

        if !event.is_transition() {
            debug!(service = %name, status = %status, "Health status unchanged");
            return Ok(event);
        }

        info!(
            service = %name,
            from = ?previous,
            to = %status,
            value = ?value,
            "Health status changed"
        );

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.on_health_event(&event).await {
                // 回滚，下一次评估会重新检测到这次变化
                match previous {
                    Some(prev) => {
                        self.last_status.insert(name.to_string(), prev);
                    }
                    None => {
                        self.last_status.remove(name);
                    }
                }
                return Err(e);
            }
        }

        Ok(event)
    }

    /// 并发评估所有已注册服务
    pub async fn evaluate_all(&self) -> Vec<(String, Result<HealthEvent>)> {
        let names: Vec<String> = {
            let services = self.services.read().await;
            services.keys().cloned().collect()
        };

        let results = join_all(names.iter().map(|name| self.evaluate(name))).await;
        names.into_iter().zip(results).collect()
    }

    async fn record_failure(&self, service: &str, reason: &str) {
        let Some(store) = &self.metrics else {
            return;
        };

        let mut tags = Labels::new();
        tags.insert("service".to_string(), service.to_string());
        tags.insert("reason".to_string(), reason.to_string());

        if let Err(e) = store.record(PROBE_FAILURE_METRIC, 1.0, tags, None).await {
            warn!(service = %service, error = %e, "Failed to record probe failure metric");
        }
    }
}
