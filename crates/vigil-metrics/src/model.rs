use crate::aggregator::AggregationMethod;
use crate::validation::ValidationRule;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use uuid::Uuid;
use vigil_core::Labels;

/// 指标值类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Numeric,
    String,
    Boolean,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DataType::Numeric => "numeric",
            DataType::String => "string",
            DataType::Boolean => "boolean",
        };
        f.write_str(s)
    }
}

/// 指标值
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetricValue {
    Numeric(f64),
    Boolean(bool),
    Text(String),
}

impl MetricValue {
    pub fn data_type(&self) -> DataType {
        match self {
            MetricValue::Numeric(_) => DataType::Numeric,
            MetricValue::Boolean(_) => DataType::Boolean,
            MetricValue::Text(_) => DataType::String,
        }
    }

    /// 数值视图，布尔值按 1/0 计
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetricValue::Numeric(v) => Some(*v),
            MetricValue::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            MetricValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            MetricValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<f64> for MetricValue {
    fn from(v: f64) -> Self {
        MetricValue::Numeric(v)
    }
}

impl From<i64> for MetricValue {
    fn from(v: i64) -> Self {
        MetricValue::Numeric(v as f64)
    }
}

impl From<bool> for MetricValue {
    fn from(v: bool) -> Self {
        MetricValue::Boolean(v)
    }
}

impl From<&str> for MetricValue {
    fn from(v: &str) -> Self {
        MetricValue::Text(v.to_string())
    }
}

impl From<String> for MetricValue {
    fn from(v: String) -> Self {
        MetricValue::Text(v)
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Numeric(v) => write!(f, "{}", v),
            MetricValue::Boolean(b) => write!(f, "{}", b),
            MetricValue::Text(s) => f.write_str(s),
        }
    }
}

/// 指标类型定义
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricType {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub unit: Option<String>,
    pub data_type: DataType,
    #[serde(default)]
    pub validation_rules: Vec<ValidationRule>,
    #[serde(default)]
    pub aggregation_methods: BTreeSet<AggregationMethod>,
}

impl MetricType {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            unit: None,
            data_type,
            validation_rules: Vec::new(),
            aggregation_methods: BTreeSet::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_rule(mut self, rule: ValidationRule) -> Self {
        self.validation_rules.push(rule);
        self
    }

    pub fn with_methods(mut self, methods: impl IntoIterator<Item = AggregationMethod>) -> Self {
        self.aggregation_methods.extend(methods);
        self
    }

    pub fn supports(&self, method: AggregationMethod) -> bool {
        self.aggregation_methods.contains(&method)
    }
}

/// 指标样本（只追加，不可变）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    pub id: Uuid,
    pub metric_type: String,
    pub timestamp: DateTime<Utc>,
    pub value: MetricValue,
    #[serde(default)]
    pub tags: Labels,
}

impl MetricSample {
    pub fn new(
        metric_type: impl Into<String>,
        value: MetricValue,
        tags: Labels,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            metric_type: metric_type.into(),
            timestamp,
            value,
            tags,
        }
    }

    pub fn tag(&self, label: &str) -> Option<&str> {
        self.tags.get(label).map(String::as_str)
    }
}
