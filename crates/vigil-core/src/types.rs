use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// 维度标签（label -> value），有序以保证分组键稳定
pub type Labels = BTreeMap<String, String>;

/// 告警级别 / 安全事件严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Info,
    Warning,
    Critical,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Critical => "critical",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Level {
    type Err = crate::VigilError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "info" => Ok(Level::Info),
            "warning" => Ok(Level::Warning),
            "critical" => Ok(Level::Critical),
            other => Err(crate::VigilError::validation(format!(
                "unknown level: {}",
                other
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(Level::Critical > Level::Warning);
        assert!(Level::Warning > Level::Info);
    }

    #[test]
    fn test_level_wire_format() {
        assert_eq!(serde_json::to_string(&Level::Critical).unwrap(), "\"critical\"");
        let level: Level = serde_json::from_str("\"warning\"").unwrap();
        assert_eq!(level, Level::Warning);
        assert_eq!("INFO".parse::<Level>().unwrap(), Level::Info);
        assert!("fatal".parse::<Level>().is_err());
    }
}
