use serde::{Deserialize, Serialize};
use std::fmt;

/// 阈值比较运算符
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Comparison {
    #[serde(rename = ">", alias = "gt")]
    GreaterThan,
    #[serde(rename = ">=", alias = "gte")]
    GreaterOrEqual,
    #[serde(rename = "<", alias = "lt")]
    LessThan,
    #[serde(rename = "<=", alias = "lte")]
    LessOrEqual,
    #[serde(rename = "==", alias = "eq")]
    Equal,
    #[serde(rename = "!=", alias = "ne")]
    NotEqual,
}

impl Comparison {
    /// `value <op> threshold`
    pub fn evaluate(&self, value: f64, threshold: f64) -> bool {
        match self {
            Comparison::GreaterThan => value > threshold,
            Comparison::GreaterOrEqual => value >= threshold,
            Comparison::LessThan => value < threshold,
            Comparison::LessOrEqual => value <= threshold,
            Comparison::Equal => (value - threshold).abs() < f64::EPSILON,
            Comparison::NotEqual => (value - threshold).abs() >= f64::EPSILON,
        }
    }

    pub fn symbol(&self) -> &'static str {
        match self {
            Comparison::GreaterThan => ">",
            Comparison::GreaterOrEqual => ">=",
            Comparison::LessThan => "<",
            Comparison::LessOrEqual => "<=",
            Comparison::Equal => "==",
            Comparison::NotEqual => "!=",
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparisons() {
        assert!(Comparison::GreaterThan.evaluate(120.0, 100.0));
        assert!(!Comparison::GreaterThan.evaluate(100.0, 100.0));
        assert!(Comparison::GreaterOrEqual.evaluate(100.0, 100.0));
        assert!(Comparison::LessThan.evaluate(0.5, 1.0));
        assert!(Comparison::Equal.evaluate(0.0, 0.0));
        assert!(Comparison::NotEqual.evaluate(1.0, 0.0));
    }

    #[test]
    fn test_symbol_serde() {
        let op: Comparison = serde_json::from_str("\">=\"").unwrap();
        assert_eq!(op, Comparison::GreaterOrEqual);
        let op: Comparison = serde_json::from_str("\"lt\"").unwrap();
        assert_eq!(op, Comparison::LessThan);
        assert_eq!(serde_json::to_string(&Comparison::NotEqual).unwrap(), "\"!=\"");
    }
}
