use crate::model::{DataType, MetricSample};
use crate::query::TagFilter;
use crate::store::MetricStore;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};
use uuid::Uuid;
use vigil_core::{Result, TimeRange, VigilError};

/// 聚合方法（指标类型上声明允许的集合）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Percentile,
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AggregationMethod::Sum => "sum",
            AggregationMethod::Avg => "avg",
            AggregationMethod::Min => "min",
            AggregationMethod::Max => "max",
            AggregationMethod::Count => "count",
            AggregationMethod::Percentile => "percentile",
        };
        f.write_str(s)
    }
}

/// 具体的聚合运算（含百分位参数）
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum Aggregation {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    Percentile { p: f64 },
}

impl Aggregation {
    pub fn method(&self) -> AggregationMethod {
        match self {
            Aggregation::Sum => AggregationMethod::Sum,
            Aggregation::Avg => AggregationMethod::Avg,
            Aggregation::Min => AggregationMethod::Min,
            Aggregation::Max => AggregationMethod::Max,
            Aggregation::Count => AggregationMethod::Count,
            Aggregation::Percentile { .. } => AggregationMethod::Percentile,
        }
    }

    /// 对一组值求聚合；min/max/percentile 在空集上无定义
    fn apply(&self, values: &mut [f64]) -> Option<f64> {
        let n = values.len();
        match self {
            Aggregation::Count => Some(n as f64),
            Aggregation::Sum => Some(values.iter().sum()),
            Aggregation::Avg => {
                if n == 0 {
                    Some(0.0)
                } else {
                    Some(values.iter().sum::<f64>() / n as f64)
                }
            }
            Aggregation::Min => values.iter().copied().reduce(f64::min),
            Aggregation::Max => values.iter().copied().reduce(f64::max),
            Aggregation::Percentile { p } => nearest_rank(values, *p),
        }
    }
}

impl fmt::Display for Aggregation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Aggregation::Percentile { p } => write!(f, "p{}", p),
            other => write!(f, "{}", other.method()),
        }
    }
}

/// 最近秩百分位：`rank = ceil(p/100 * n)`，限制在 `[1, n]`
pub fn nearest_rank(values: &mut [f64], p: f64) -> Option<f64> {
    let n = values.len();
    if n == 0 {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let rank = ((p / 100.0) * n as f64).ceil() as usize;
    let rank = rank.clamp(1, n);
    Some(values[rank - 1])
}

/// 分组标签
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupLabel {
    pub label: String,
    /// 缺失该标签的样本归入 null 分组，而不是被排除
    #[serde(default)]
    pub nullable: bool,
}

impl GroupLabel {
    pub fn required(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            nullable: false,
        }
    }

    pub fn nullable(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            nullable: true,
        }
    }
}

impl From<&str> for GroupLabel {
    fn from(label: &str) -> Self {
        GroupLabel::required(label)
    }
}

/// 分组键：按 `group_by` 顺序排列的标签值元组
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey(pub Vec<Option<String>>);

impl GroupKey {
    pub fn ungrouped() -> Self {
        GroupKey(Vec::new())
    }

    pub fn of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        GroupKey(values.into_iter().map(|v| Some(v.into())).collect())
    }

    fn for_sample(group_by: &[GroupLabel], sample: &MetricSample) -> Option<Self> {
        let mut parts = Vec::with_capacity(group_by.len());
        for g in group_by {
            match sample.tag(&g.label) {
                Some(v) => parts.push(Some(v.to_string())),
                None if g.nullable => parts.push(None),
                None => return None,
            }
        }
        Some(GroupKey(parts))
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("*");
        }
        let parts: Vec<&str> = self
            .0
            .iter()
            .map(|p| p.as_deref().unwrap_or("null"))
            .collect();
        f.write_str(&parts.join(","))
    }
}

impl Serialize for GroupKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// 聚合定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricAggregation {
    pub id: Uuid,
    pub metric_type: String,
    pub aggregation: Aggregation,
    /// 时间窗口，以整秒计
    pub window_secs: i64,
    #[serde(default)]
    pub group_by: Vec<GroupLabel>,
    #[serde(default)]
    pub filters: TagFilter,
    /// 每个分组要求的最少样本数，默认不限制
    #[serde(default)]
    pub min_samples: Option<usize>,
}

impl MetricAggregation {
    /// 窗口按整秒保存，不足一秒的部分被截断；不足一秒的窗口在注册时被拒绝
    pub fn new(metric_type: impl Into<String>, aggregation: Aggregation, window: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            metric_type: metric_type.into(),
            aggregation,
            window_secs: window.num_seconds(),
            group_by: Vec::new(),
            filters: TagFilter::new(),
            min_samples: None,
        }
    }

    pub fn with_group_by(mut self, group_by: Vec<GroupLabel>) -> Self {
        self.group_by = group_by;
        self
    }

    pub fn with_filters(mut self, filters: TagFilter) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = Some(min_samples);
        self
    }

    pub fn window(&self) -> Duration {
        Duration::seconds(self.window_secs)
    }

    /// 告警键中使用的分组描述，例如 `latency_ms[region=eu]`
    pub fn describe_group(&self, key: &GroupKey) -> String {
        if self.group_by.is_empty() || key.0.is_empty() {
            return self.metric_type.clone();
        }
        let parts: Vec<String> = self
            .group_by
            .iter()
            .zip(key.0.iter())
            .map(|(g, v)| format!("{}={}", g.label, v.as_deref().unwrap_or("null")))
            .collect();
        format!("{}[{}]", self.metric_type, parts.join(","))
    }
}

/// 单个分组的聚合值
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupAggregate {
    pub value: f64,
    pub samples: usize,
}

/// 聚合结果
#[derive(Debug, Clone, Serialize)]
pub struct AggregationResult {
    pub spec_id: Uuid,
    pub window: TimeRange,
    pub computed_at: DateTime<Utc>,
    pub groups: BTreeMap<GroupKey, GroupAggregate>,
}

impl AggregationResult {
    pub fn value(&self, key: &GroupKey) -> Option<f64> {
        self.groups.get(key).map(|g| g.value)
    }

    /// 无分组聚合的值
    pub fn scalar(&self) -> Option<f64> {
        self.value(&GroupKey::ungrouped())
    }

    pub fn values(&self) -> BTreeMap<GroupKey, f64> {
        self.groups.iter().map(|(k, g)| (k.clone(), g.value)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

type CacheSlot = Arc<Mutex<Option<Arc<AggregationResult>>>>;

/// 窗口聚合器
///
/// 聚合定义注册后可按需计算；`get_or_compute` 对同一定义保证单次计算
/// （并发调用方共享同一次计算结果）。
pub struct Aggregator {
    store: Arc<MetricStore>,
    specs: RwLock<HashMap<Uuid, MetricAggregation>>,
    cache: DashMap<Uuid, CacheSlot>,
}

impl Aggregator {
    pub fn new(store: Arc<MetricStore>) -> Self {
        Self {
            store,
            specs: RwLock::new(HashMap::new()),
            cache: DashMap::new(),
        }
    }

    /// 定义聚合（只有定义，尚无结果）
    pub async fn define_aggregation(
        &self,
        metric_type: &str,
        aggregation: Aggregation,
        window: Duration,
        group_by: Vec<GroupLabel>,
        filters: TagFilter,
    ) -> Result<MetricAggregation> {
        let spec = MetricAggregation::new(metric_type, aggregation, window)
            .with_group_by(group_by)
            .with_filters(filters);
        self.register(spec).await
    }

    /// 校验并注册一个完整的聚合定义
    ///
    /// # 错误
    /// * `UnknownType` - 指标类型不存在
    /// * `UnsupportedMethod` - 类型未声明该方法，或对字符串类型做数值聚合
    /// * `Validation` - 窗口、百分位或分组标签非法
    pub async fn register(&self, spec: MetricAggregation) -> Result<MetricAggregation> {
        let metric_type = self.store.get_type(&spec.metric_type).await?;
        let method = spec.aggregation.method();

        let numeric_on_text =
            metric_type.data_type == DataType::String && method != AggregationMethod::Count;
        if !metric_type.supports(method) || numeric_on_text {
            return Err(VigilError::UnsupportedMethod {
                metric_type: metric_type.name,
                method: method.to_string(),
            });
        }

        if spec.window_secs < 1 {
            return Err(VigilError::validation(format!(
                "aggregation window must be at least 1s (whole seconds), got {}s",
                spec.window_secs
            )));
        }

        if let Aggregation::Percentile { p } = spec.aggregation {
            if !(0.0..=100.0).contains(&p) {
                return Err(VigilError::validation(format!(
                    "percentile must be within [0, 100], got {}",
                    p
                )));
            }
        }

        let mut seen = HashSet::new();
        for g in &spec.group_by {
            if !seen.insert(g.label.as_str()) {
                return Err(VigilError::validation(format!(
                    "duplicate group_by label: {}",
                    g.label
                )));
            }
        }

        info!(
            spec_id = %spec.id,
            metric_type = %spec.metric_type,
            aggregation = %spec.aggregation,
            window_secs = spec.window_secs,
            "Aggregation defined"
        );

        let mut specs = self.specs.write().await;
        specs.insert(spec.id, spec.clone());
        Ok(spec)
    }

    pub async fn spec(&self, spec_id: Uuid) -> Result<MetricAggregation> {
        let specs = self.specs.read().await;
        specs
            .get(&spec_id)
            .cloned()
            .ok_or_else(|| VigilError::not_found(format!("aggregation {}", spec_id)))
    }

    pub async fn list_specs(&self) -> Vec<MetricAggregation> {
        let specs = self.specs.read().await;
        specs.values().cloned().collect()
    }

    pub async fn remove_spec(&self, spec_id: Uuid) -> Result<()> {
        let mut specs = self.specs.write().await;
        specs
            .remove(&spec_id)
            .ok_or_else(|| VigilError::not_found(format!("aggregation {}", spec_id)))?;
        self.cache.remove(&spec_id);
        Ok(())
    }

    /// 在窗口 `[as_of - window, as_of)` 上计算聚合
    pub async fn compute(
        &self,
        spec: &MetricAggregation,
        as_of: DateTime<Utc>,
    ) -> Result<AggregationResult> {
        let window = TimeRange::window(as_of, spec.window());
        let series = self
            .store
            .query(&spec.metric_type, window, spec.filters.clone())
            .await?;

        let mut buckets: BTreeMap<GroupKey, Vec<f64>> = BTreeMap::new();
        for sample in series.iter() {
            let Some(key) = GroupKey::for_sample(&spec.group_by, sample) else {
                continue;
            };
            // 字符串样本只参与计数
            let v = sample.value.as_f64().unwrap_or(0.0);
            buckets.entry(key).or_default().push(v);
        }

        if spec.group_by.is_empty() {
            buckets.entry(GroupKey::ungrouped()).or_default();
        }

        let mut groups = BTreeMap::new();
        for (key, mut values) in buckets {
            let n = values.len();
            if let Some(required) = spec.min_samples {
                if n < required {
                    return Err(VigilError::InsufficientData {
                        group: spec.describe_group(&key),
                        required,
                        actual: n,
                    });
                }
            }
            if let Some(value) = spec.aggregation.apply(&mut values) {
                groups.insert(key, GroupAggregate { value, samples: n });
            }
        }

        debug!(
            spec_id = %spec.id,
            groups = groups.len(),
            window_start = %window.start,
            "Aggregation computed"
        );

        Ok(AggregationResult {
            spec_id: spec.id,
            window,
            computed_at: self.store.clock().now(),
            groups,
        })
    }

    /// 返回未过期的缓存结果，否则以当前时间重新计算
    pub async fn get_or_compute(&self, spec_id: Uuid) -> Result<Arc<AggregationResult>> {
        let spec = self.spec(spec_id).await?;
        let slot = self
            .cache
            .entry(spec_id)
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .clone();

        let mut cached = slot.lock().await;
        let now = self.store.clock().now();
        if let Some(result) = cached.as_ref() {
            if now < result.computed_at + spec.window() {
                debug!(spec_id = %spec_id, "Aggregation cache hit");
                return Ok(result.clone());
            }
        }

        let result = Arc::new(self.compute(&spec, now).await?);
        *cached = Some(result.clone());
        Ok(result)
    }

    /// 当前缓存的结果（可能已过期）
    pub async fn cached(&self, spec_id: Uuid) -> Option<Arc<AggregationResult>> {
        let slot = self.cache.get(&spec_id).map(|entry| entry.value().clone())?;
        let cached = slot.lock().await;
        cached.clone()
    }

    pub fn invalidate(&self, spec_id: Uuid) {
        self.cache.remove(&spec_id);
    }
}
