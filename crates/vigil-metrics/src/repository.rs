use crate::model::MetricSample;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use vigil_core::{Result, TimeRange};

/// 指标样本存储接口
///
/// 实现需保证 `append` 原子；`range` 按时间升序返回，时间相同时保持写入顺序。
#[async_trait]
pub trait MetricRepository: Send + Sync {
    /// 追加一个样本
    async fn append(&self, sample: MetricSample) -> Result<()>;

    /// 读取 `[start, end)` 内的样本
    async fn range(&self, metric_type: &str, range: TimeRange) -> Result<Vec<MetricSample>>;

    /// 该类型下的样本数量
    async fn count(&self, metric_type: &str) -> Result<usize>;

    /// 删除早于 `cutoff` 的样本，返回删除数量
    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize>;
}

/// 指标样本存储（内存实现）
#[derive(Default)]
pub struct InMemoryMetricRepository {
    series: Arc<RwLock<HashMap<String, Vec<MetricSample>>>>,
}

impl InMemoryMetricRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetricRepository for InMemoryMetricRepository {
    async fn append(&self, sample: MetricSample) -> Result<()> {
        let mut series = self.series.write().await;
        let samples = series.entry(sample.metric_type.clone()).or_default();
        // 乱序写入时插到第一个更晚的样本之前
        let idx = samples.partition_point(|s| s.timestamp <= sample.timestamp);
        samples.insert(idx, sample);
        Ok(())
    }

    async fn range(&self, metric_type: &str, range: TimeRange) -> Result<Vec<MetricSample>> {
        let series = self.series.read().await;
        let Some(samples) = series.get(metric_type) else {
            return Ok(Vec::new());
        };

        let lo = samples.partition_point(|s| s.timestamp < range.start);
        let hi = samples.partition_point(|s| s.timestamp < range.end);
        if lo >= hi {
            return Ok(Vec::new());
        }
        Ok(samples[lo..hi].to_vec())
    }

    async fn count(&self, metric_type: &str) -> Result<usize> {
        let series = self.series.read().await;
        Ok(series.get(metric_type).map_or(0, Vec::len))
    }

    async fn purge_before(&self, cutoff: DateTime<Utc>) -> Result<usize> {
        let mut series = self.series.write().await;
        let mut removed = 0;
        for samples in series.values_mut() {
            let idx = samples.partition_point(|s| s.timestamp < cutoff);
            samples.drain(..idx);
            removed += idx;
        }
        Ok(removed)
    }
}
