use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// 半开时间区间 `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// 以 `as_of` 结尾、长度为 `window` 的窗口
    pub fn window(as_of: DateTime<Utc>, window: Duration) -> Self {
        Self {
            start: as_of - window,
            end: as_of,
        }
    }

    /// 覆盖所有时间
    pub fn all() -> Self {
        Self {
            start: DateTime::<Utc>::MIN_UTC,
            end: DateTime::<Utc>::MAX_UTC,
        }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        at >= self.start && at < self.end
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_half_open_window() {
        let as_of = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let range = TimeRange::window(as_of, Duration::seconds(60));

        assert!(range.contains(as_of - Duration::seconds(60)));
        assert!(range.contains(as_of - Duration::milliseconds(1)));
        assert!(!range.contains(as_of));
        assert!(!range.is_empty());
    }

    #[test]
    fn test_all_contains_now() {
        assert!(TimeRange::all().contains(Utc::now()));
    }
}
