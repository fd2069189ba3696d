use crate::model::{DataType, MetricType, MetricValue};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use vigil_core::{Result, VigilError};

/// 校验规则
///
/// 规则在定义指标类型时编译一次，记录样本时由 [`Validator`] 依次解释执行。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum ValidationRule {
    /// 数值范围（闭区间，任一端可省略）
    Range {
        #[serde(default)]
        min: Option<f64>,
        #[serde(default)]
        max: Option<f64>,
    },
    /// 枚举成员
    OneOf { values: Vec<String> },
    /// 正则匹配（整串匹配由表达式自身的锚点决定）
    Pattern { regex: String },
    /// 字符串长度（按字符计）
    Length {
        #[serde(default)]
        min: Option<usize>,
        #[serde(default)]
        max: Option<usize>,
    },
    /// 自定义谓词，仅能通过代码注册
    #[serde(skip)]
    Custom(CustomRule),
}

impl ValidationRule {
    pub fn range(min: f64, max: f64) -> Self {
        ValidationRule::Range {
            min: Some(min),
            max: Some(max),
        }
    }

    pub fn one_of<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ValidationRule::OneOf {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn pattern(regex: impl Into<String>) -> Self {
        ValidationRule::Pattern {
            regex: regex.into(),
        }
    }

    pub fn custom<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&MetricValue) -> bool + Send + Sync + 'static,
    {
        ValidationRule::Custom(CustomRule {
            name: name.into(),
            predicate: Arc::new(predicate),
        })
    }

    fn name(&self) -> &str {
        match self {
            ValidationRule::Range { .. } => "range",
            ValidationRule::OneOf { .. } => "one_of",
            ValidationRule::Pattern { .. } => "pattern",
            ValidationRule::Length { .. } => "length",
            ValidationRule::Custom(rule) => &rule.name,
        }
    }
}

/// 自定义校验谓词
#[derive(Clone)]
pub struct CustomRule {
    pub name: String,
    predicate: Arc<dyn Fn(&MetricValue) -> bool + Send + Sync>,
}

impl fmt::Debug for CustomRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomRule").field("name", &self.name).finish()
    }
}

enum CompiledRule {
    Range { min: Option<f64>, max: Option<f64> },
    OneOf(Vec<String>),
    Pattern(Regex),
    Length { min: Option<usize>, max: Option<usize> },
    Custom(CustomRule),
}

/// 编译后的校验器
pub struct Validator {
    metric_type: String,
    data_type: DataType,
    rules: Vec<CompiledRule>,
}

impl Validator {
    /// 编译指标类型上的全部规则，规则本身非法时返回 `Validation`
    pub fn compile(metric_type: &MetricType) -> Result<Self> {
        let mut rules = Vec::with_capacity(metric_type.validation_rules.len());

        for rule in &metric_type.validation_rules {
            let compiled = match rule {
                ValidationRule::Range { min, max } => {
                    Self::require(metric_type, rule, DataType::Numeric)?;
                    if let (Some(lo), Some(hi)) = (min, max) {
                        if lo > hi {
                            return Err(VigilError::validation(format!(
                                "range rule on {} has min {} greater than max {}",
                                metric_type.name, lo, hi
                            )));
                        }
                    }
                    CompiledRule::Range {
                        min: *min,
                        max: *max,
                    }
                }
                ValidationRule::OneOf { values } => {
                    Self::require(metric_type, rule, DataType::String)?;
                    if values.is_empty() {
                        return Err(VigilError::validation(format!(
                            "one_of rule on {} has no values",
                            metric_type.name
                        )));
                    }
                    CompiledRule::OneOf(values.clone())
                }
                ValidationRule::Pattern { regex } => {
                    Self::require(metric_type, rule, DataType::String)?;
                    let re = Regex::new(regex).map_err(|e| {
                        VigilError::validation(format!(
                            "invalid pattern on {}: {}",
                            metric_type.name, e
                        ))
                    })?;
                    CompiledRule::Pattern(re)
                }
                ValidationRule::Length { min, max } => {
                    Self::require(metric_type, rule, DataType::String)?;
                    if let (Some(lo), Some(hi)) = (min, max) {
                        if lo > hi {
                            return Err(VigilError::validation(format!(
                                "length rule on {} has min {} greater than max {}",
                                metric_type.name, lo, hi
                            )));
                        }
                    }
                    CompiledRule::Length {
                        min: *min,
                        max: *max,
                    }
                }
                ValidationRule::Custom(custom) => CompiledRule::Custom(custom.clone()),
            };
            rules.push(compiled);
        }

        Ok(Self {
            metric_type: metric_type.name.clone(),
            data_type: metric_type.data_type,
            rules,
        })
    }

    fn require(metric_type: &MetricType, rule: &ValidationRule, expected: DataType) -> Result<()> {
        if metric_type.data_type != expected {
            return Err(VigilError::validation(format!(
                "{} rule requires a {} metric type, {} is {}",
                rule.name(),
                expected,
                metric_type.name,
                metric_type.data_type
            )));
        }
        Ok(())
    }

    /// 校验单个值
    pub fn validate(&self, value: &MetricValue) -> Result<()> {
        if value.data_type() != self.data_type {
            return Err(VigilError::validation(format!(
                "expected {} value for {}, got {}",
                self.data_type,
                self.metric_type,
                value.data_type()
            )));
        }

        if let MetricValue::Numeric(v) = value {
            if !v.is_finite() {
                return Err(VigilError::validation(format!(
                    "value for {} must be finite, got {}",
                    self.metric_type, v
                )));
            }
        }

        for rule in &self.rules {
            self.check(rule, value)?;
        }

        Ok(())
    }

    fn check(&self, rule: &CompiledRule, value: &MetricValue) -> Result<()> {
        let ok = match (rule, value) {
            (CompiledRule::Range { min, max }, MetricValue::Numeric(v)) => {
                min.map_or(true, |lo| *v >= lo) && max.map_or(true, |hi| *v <= hi)
            }
            (CompiledRule::OneOf(values), MetricValue::Text(s)) => values.iter().any(|x| x == s),
            (CompiledRule::Pattern(re), MetricValue::Text(s)) => re.is_match(s),
            (CompiledRule::Length { min, max }, MetricValue::Text(s)) => {
                let len = s.chars().count();
                min.map_or(true, |lo| len >= lo) && max.map_or(true, |hi| len <= hi)
            }
            (CompiledRule::Custom(custom), v) => (custom.predicate)(v),
            // 类型已在 compile 时对齐
            _ => true,
        };

        if ok {
            Ok(())
        } else {
            Err(VigilError::validation(format!(
                "value {} for {} violates {} rule",
                value,
                self.metric_type,
                Self::rule_name(rule)
            )))
        }
    }

    fn rule_name(rule: &CompiledRule) -> &str {
        match rule {
            CompiledRule::Range { .. } => "range",
            CompiledRule::OneOf(_) => "one_of",
            CompiledRule::Pattern(_) => "pattern",
            CompiledRule::Length { .. } => "length",
            CompiledRule::Custom(custom) => &custom.name,
        }
    }
}
