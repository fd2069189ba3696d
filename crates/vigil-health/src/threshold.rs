use crate::status::HealthStatus;
use serde::{Deserialize, Serialize};
use vigil_core::{Comparison, Result, VigilError};

/// 健康阈值：`value <op> threshold` 成立时判定为 `status`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HealthThreshold {
    pub status: HealthStatus,
    pub op: Comparison,
    pub value: f64,
}

impl HealthThreshold {
    pub fn new(status: HealthStatus, op: Comparison, value: f64) -> Self {
        Self { status, op, value }
    }

    pub fn critical(op: Comparison, value: f64) -> Self {
        Self::new(HealthStatus::Critical, op, value)
    }

    pub fn warning(op: Comparison, value: f64) -> Self {
        Self::new(HealthStatus::Warning, op, value)
    }

    pub fn matches(&self, signal: f64) -> bool {
        self.op.evaluate(signal, self.value)
    }
}

/// 阈值集合，按严重程度从高到低求值
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThresholdSet {
    thresholds: Vec<HealthThreshold>,
}

impl ThresholdSet {
    /// 只接受 warning / critical 两级阈值
    pub fn new(thresholds: Vec<HealthThreshold>) -> Result<Self> {
        for t in &thresholds {
            if !t.status.needs_alert() {
                return Err(VigilError::validation(format!(
                    "threshold status must be warning or critical, got {}",
                    t.status
                )));
            }
            if !t.value.is_finite() {
                return Err(VigilError::validation("threshold value must be finite"));
            }
        }

        let mut thresholds = thresholds;
        // critical 在前；同级保持声明顺序
        thresholds.sort_by_key(|t| match t.status {
            HealthStatus::Critical => 0,
            _ => 1,
        });
        Ok(Self { thresholds })
    }

    /// 第一个命中的阈值决定状态，都不命中则为 ok
    pub fn classify(&self, signal: f64) -> HealthStatus {
        self.thresholds
            .iter()
            .find(|t| t.matches(signal))
            .map(|t| t.status)
            .unwrap_or(HealthStatus::Ok)
    }

    pub fn is_empty(&self) -> bool {
        self.thresholds.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HealthThreshold> {
        self.thresholds.iter()
    }
}
