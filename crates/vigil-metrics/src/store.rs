use crate::aggregator::AggregationMethod;
use crate::model::{MetricSample, MetricType, MetricValue};
use crate::query::{MetricSeries, TagFilter};
use crate::repository::MetricRepository;
use crate::validation::Validator;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use vigil_core::{Labels, Result, SharedClock, TimeRange, VigilError};

struct RegisteredType {
    definition: MetricType,
    validator: Arc<Validator>,
}

/// 指标存储
///
/// 独占管理指标类型与样本的生命周期：定义类型、校验并追加样本、按时间区间查询。
pub struct MetricStore {
    types: RwLock<HashMap<String, RegisteredType>>,
    repository: Arc<dyn MetricRepository>,
    clock: SharedClock,
}

impl MetricStore {
    pub fn new(repository: Arc<dyn MetricRepository>, clock: SharedClock) -> Self {
        Self {
            types: RwLock::new(HashMap::new()),
            repository,
            clock,
        }
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// 定义指标类型
    ///
    /// # 错误
    /// * `DuplicateType` - 同名类型已存在
    /// * `Validation` - 名称为空或校验规则非法
    pub async fn define_type(&self, metric_type: MetricType) -> Result<MetricType> {
        if metric_type.name.trim().is_empty() {
            return Err(VigilError::validation("metric type name must not be empty"));
        }

        let validator = Validator::compile(&metric_type)?;

        let mut types = self.types.write().await;
        if types.contains_key(&metric_type.name) {
            return Err(VigilError::DuplicateType(metric_type.name));
        }

        info!(
            metric_type = %metric_type.name,
            data_type = %metric_type.data_type,
            methods = ?metric_type.aggregation_methods,
            "Metric type defined"
        );

        types.insert(
            metric_type.name.clone(),
            RegisteredType {
                definition: metric_type.clone(),
                validator: Arc::new(validator),
            },
        );
        Ok(metric_type)
    }

    /// 替换指标类型定义，仅在该类型尚无样本时允许
    pub async fn replace_type(&self, metric_type: MetricType) -> Result<MetricType> {
        let validator = Validator::compile(&metric_type)?;

        let mut types = self.types.write().await;
        if !types.contains_key(&metric_type.name) {
            return Err(VigilError::UnknownType(metric_type.name));
        }
        if self.repository.count(&metric_type.name).await? > 0 {
            return Err(VigilError::validation(format!(
                "metric type {} is immutable once samples exist",
                metric_type.name
            )));
        }

        types.insert(
            metric_type.name.clone(),
            RegisteredType {
                definition: metric_type.clone(),
                validator: Arc::new(validator),
            },
        );
        info!(metric_type = %metric_type.name, "Metric type replaced");
        Ok(metric_type)
    }

    /// 扩展允许的聚合方法（已有样本时唯一允许的修改）
    pub async fn extend_aggregation_methods(
        &self,
        name: &str,
        methods: impl IntoIterator<Item = AggregationMethod>,
    ) -> Result<MetricType> {
        let mut types = self.types.write().await;
        let registered = types
            .get_mut(name)
            .ok_or_else(|| VigilError::UnknownType(name.to_string()))?;

        registered.definition.aggregation_methods.extend(methods);
        debug!(
            metric_type = %name,
            methods = ?registered.definition.aggregation_methods,
            "Aggregation methods extended"
        );
        Ok(registered.definition.clone())
    }

    pub async fn get_type(&self, name: &str) -> Result<MetricType> {
        let types = self.types.read().await;
        types
            .get(name)
            .map(|t| t.definition.clone())
            .ok_or_else(|| VigilError::UnknownType(name.to_string()))
    }

    pub async fn list_types(&self) -> Vec<MetricType> {
        let types = self.types.read().await;
        let mut list: Vec<MetricType> = types.values().map(|t| t.definition.clone()).collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    /// 记录样本
    ///
    /// # 错误
    /// * `UnknownType` - 类型不存在
    /// * `Validation` - 值不符合类型或校验规则，此时不写入
    pub async fn record(
        &self,
        type_name: &str,
        value: impl Into<MetricValue>,
        tags: Labels,
        timestamp: Option<DateTime<Utc>>,
    ) -> Result<MetricSample> {
        let value = value.into();

        // 持有读锁直到写入完成，替换定义必须等待进行中的写入
        let types = self.types.read().await;
        let registered = types
            .get(type_name)
            .ok_or_else(|| VigilError::UnknownType(type_name.to_string()))?;
        registered.validator.validate(&value)?;

        let timestamp = timestamp.unwrap_or_else(|| self.clock.now());
        let sample = MetricSample::new(type_name, value, tags, timestamp);
        self.repository.append(sample.clone()).await?;
        drop(types);

        debug!(
            metric_type = %type_name,
            value = %sample.value,
            timestamp = %sample.timestamp,
            "Metric sample recorded"
        );
        Ok(sample)
    }

    /// 查询样本，返回按时间升序、可重复迭代的序列
    pub async fn query(
        &self,
        type_name: &str,
        range: TimeRange,
        filter: TagFilter,
    ) -> Result<MetricSeries> {
        {
            let types = self.types.read().await;
            if !types.contains_key(type_name) {
                return Err(VigilError::UnknownType(type_name.to_string()));
            }
        }

        let samples = self.repository.range(type_name, range).await?;
        Ok(MetricSeries::new(samples, filter))
    }

    /// 按保留策略清理过期样本
    pub async fn apply_retention(&self, max_age: Duration) -> Result<usize> {
        let cutoff = self.clock.now() - max_age;
        let removed = self.repository.purge_before(cutoff).await?;
        if removed > 0 {
            info!(removed, cutoff = %cutoff, "Expired metric samples purged");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::DataType;
    use crate::repository::InMemoryMetricRepository;
    use crate::validation::ValidationRule;
    use chrono::TimeZone;
    use vigil_core::ManualClock;

    fn store_at(start: DateTime<Utc>) -> (MetricStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start));
        let store = MetricStore::new(Arc::new(InMemoryMetricRepository::new()), clock.clone());
        (store, clock)
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 8, 0, 0).unwrap()
    }

    fn latency() -> MetricType {
        MetricType::new("latency_ms", DataType::Numeric)
            .with_unit("ms")
            .with_rule(ValidationRule::range(0.0, 10_000.0))
            .with_methods([AggregationMethod::Avg])
    }

    #[tokio::test]
    async fn test_define_duplicate_type() {
        let (store, _) = store_at(t0());
        store.define_type(latency()).await.unwrap();

        let err = store.define_type(latency()).await.unwrap_err();
        assert!(matches!(err, VigilError::DuplicateType(name) if name == "latency_ms"));
    }

    #[tokio::test]
    async fn test_record_then_query_preserves_values_in_order() {
        let (store, clock) = store_at(t0());
        store.define_type(latency()).await.unwrap();

        for v in [42.0, 17.5, 99.0] {
            store.record("latency_ms", v, Labels::new(), None).await.unwrap();
            clock.advance(Duration::seconds(1));
        }

        let series = store
            .query("latency_ms", TimeRange::all(), TagFilter::new())
            .await
            .unwrap();
        let values: Vec<MetricValue> = series.iter().map(|s| s.value.clone()).collect();
        assert_eq!(
            values,
            vec![
                MetricValue::Numeric(42.0),
                MetricValue::Numeric(17.5),
                MetricValue::Numeric(99.0)
            ]
        );
        // 可重复迭代
        assert_eq!(series.count(), 3);
        assert_eq!(series.iter().count(), 3);
    }

    #[tokio::test]
    async fn test_record_rejects_invalid_values_without_writing() {
        let (store, _) = store_at(t0());
        store.define_type(latency()).await.unwrap();

        let err = store
            .record("latency_ms", -5.0, Labels::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::Validation(_)));

        let err = store
            .record("latency_ms", "slow", Labels::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::Validation(_)));

        let series = store
            .query("latency_ms", TimeRange::all(), TagFilter::new())
            .await
            .unwrap();
        assert!(series.is_empty());
    }

    #[tokio::test]
    async fn test_record_unknown_type() {
        let (store, _) = store_at(t0());
        let err = store
            .record("nope", 1.0, Labels::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::UnknownType(_)));
    }

    #[tokio::test]
    async fn test_duplicate_timestamps_accepted() {
        let (store, _) = store_at(t0());
        store.define_type(latency()).await.unwrap();

        store.record("latency_ms", 1.0, Labels::new(), Some(t0())).await.unwrap();
        store.record("latency_ms", 2.0, Labels::new(), Some(t0())).await.unwrap();

        let series = store
            .query("latency_ms", TimeRange::all(), TagFilter::new())
            .await
            .unwrap();
        assert_eq!(series.count(), 2);
    }

    #[tokio::test]
    async fn test_query_applies_tag_filter() {
        let (store, _) = store_at(t0());
        store.define_type(latency()).await.unwrap();

        let mut eu = Labels::new();
        eu.insert("region".into(), "eu".into());
        let mut us = Labels::new();
        us.insert("region".into(), "us".into());

        store.record("latency_ms", 10.0, eu, None).await.unwrap();
        store.record("latency_ms", 20.0, us, None).await.unwrap();

        let series = store
            .query("latency_ms", TimeRange::all(), TagFilter::new().equals("region", "us"))
            .await
            .unwrap();
        let values: Vec<f64> = series.iter().filter_map(|s| s.value.as_f64()).collect();
        assert_eq!(values, vec![20.0]);
    }

    #[tokio::test]
    async fn test_type_immutable_once_samples_exist() {
        let (store, _) = store_at(t0());
        store.define_type(latency()).await.unwrap();

        // 尚无样本时允许替换
        store
            .replace_type(latency().with_description("p95 request latency"))
            .await
            .unwrap();

        store.record("latency_ms", 5.0, Labels::new(), None).await.unwrap();
        assert!(store.replace_type(latency()).await.is_err());

        let updated = store
            .extend_aggregation_methods("latency_ms", [AggregationMethod::Max])
            .await
            .unwrap();
        assert!(updated.supports(AggregationMethod::Max));
        assert!(updated.supports(AggregationMethod::Avg));
    }

    /// 写入较慢的存储
    struct SlowAppendRepository {
        inner: InMemoryMetricRepository,
    }

    #[async_trait::async_trait]
    impl MetricRepository for SlowAppendRepository {
        async fn append(&self, sample: MetricSample) -> Result<()> {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            self.inner.append(sample).await
        }

        async fn range(&self, metric_type: &str, range: TimeRange) -> Result<Vec<MetricSample>> {
            self.inner.range(metric_type, range).await
        }

        async fn count(&self, metric_type: &str) -> Result<usize> {
            self.inner.count(metric_type).await
        }

        async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
            self.inner.purge_before(cutoff).await
        }
    }

    #[tokio::test]
    async fn test_replace_waits_for_in_flight_record() {
        let clock = Arc::new(ManualClock::new(t0()));
        let store = Arc::new(MetricStore::new(
            Arc::new(SlowAppendRepository {
                inner: InMemoryMetricRepository::new(),
            }),
            clock,
        ));
        store.define_type(latency()).await.unwrap();

        let pending = {
            let store = store.clone();
            tokio::spawn(async move { store.record("latency_ms", 5.0, Labels::new(), None).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        let err = store
            .replace_type(latency().with_rule(ValidationRule::range(0.0, 1.0)))
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::Validation(_)));
        pending.await.unwrap().unwrap();
        let current = store.get_type("latency_ms").await.unwrap();
        assert_eq!(current.validation_rules.len(), latency().validation_rules.len());
    }

    #[tokio::test]
    async fn test_apply_retention() {
        let (store, clock) = store_at(t0());
        store.define_type(latency()).await.unwrap();

        store.record("latency_ms", 1.0, Labels::new(), None).await.unwrap();
        clock.advance(Duration::days(10));
        store.record("latency_ms", 2.0, Labels::new(), None).await.unwrap();

        let removed = store.apply_retention(Duration::days(7)).await.unwrap();
        assert_eq!(removed, 1);
    }
}
