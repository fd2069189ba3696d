use crate::model::MetricSample;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use vigil_core::Labels;

/// 标签谓词
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "snake_case")]
pub enum TagPredicate {
    Equals(String),
    NotEquals(String),
    OneOf(Vec<String>),
    Exists,
    Absent,
}

impl TagPredicate {
    pub fn matches(&self, value: Option<&str>) -> bool {
        match self {
            TagPredicate::Equals(expected) => value == Some(expected.as_str()),
            TagPredicate::NotEquals(expected) => value != Some(expected.as_str()),
            TagPredicate::OneOf(values) => value.map_or(false, |v| values.iter().any(|x| x == v)),
            TagPredicate::Exists => value.is_some(),
            TagPredicate::Absent => value.is_none(),
        }
    }
}

/// 标签过滤器（label -> 谓词，全部满足才匹配）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagFilter {
    predicates: BTreeMap<String, TagPredicate>,
}

impl TagFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, label: impl Into<String>, predicate: TagPredicate) -> Self {
        self.predicates.insert(label.into(), predicate);
        self
    }

    pub fn equals(self, label: impl Into<String>, value: impl Into<String>) -> Self {
        self.with(label, TagPredicate::Equals(value.into()))
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    pub fn matches(&self, tags: &Labels) -> bool {
        self.predicates
            .iter()
            .all(|(label, predicate)| predicate.matches(tags.get(label).map(String::as_str)))
    }
}

/// 查询结果序列
///
/// 持有按时间升序排列的样本快照，过滤在迭代时惰性执行；
/// `iter()` 可反复调用，每次都从头开始。
#[derive(Debug, Clone)]
pub struct MetricSeries {
    samples: Arc<[MetricSample]>,
    filter: TagFilter,
}

impl MetricSeries {
    pub(crate) fn new(samples: Vec<MetricSample>, filter: TagFilter) -> Self {
        Self {
            samples: samples.into(),
            filter,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricSample> + '_ {
        self.samples.iter().filter(move |s| self.filter.matches(&s.tags))
    }

    pub fn count(&self) -> usize {
        self.iter().count()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }

    pub fn to_vec(&self) -> Vec<MetricSample> {
        self.iter().cloned().collect()
    }
}

impl<'a> IntoIterator for &'a MetricSeries {
    type Item = &'a MetricSample;
    type IntoIter = Box<dyn Iterator<Item = &'a MetricSample> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}
