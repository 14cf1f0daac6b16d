use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::DomainError;

wire_enum! {
    /// 包含/排除开关。
    pub enum FilterOption: "filter_option" {
        Unspecified = 0,
        Exclude = 1,
        Include = 2,
    }
}

/// 时间窗口 `[start, end)`，两端均可缺省，统一为 UTC。
///
/// 反序列化同样经过 [`TimeFilter::new`] 校验。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "TimeFilterParts")]
pub struct TimeFilter {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct TimeFilterParts {
    #[serde(default)]
    start: Option<DateTime<Utc>>,
    #[serde(default)]
    end: Option<DateTime<Utc>>,
}

impl TryFrom<TimeFilterParts> for TimeFilter {
    type Error = DomainError;

    fn try_from(parts: TimeFilterParts) -> Result<Self, Self::Error> {
        Self::new(parts.start, parts.end)
    }
}

impl TimeFilter {
    /// 构造时间窗口；`start > end` 视为非法。
    pub fn new(
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Self, DomainError> {
        if let (Some(start), Some(end)) = (start, end)
            && start > end
        {
            return Err(DomainError::InvalidTimeFilter(format!(
                "start {start} is after end {end}"
            )));
        }
        Ok(Self { start, end })
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, DomainError> {
        Self::new(Some(start), Some(end))
    }

    pub fn start(&self) -> Option<DateTime<Utc>> {
        self.start
    }

    pub fn end(&self) -> Option<DateTime<Utc>> {
        self.end
    }

    /// 判断时间点是否落在窗口内（含起点、不含终点）。
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| ts >= start) && self.end.is_none_or(|end| ts < end)
    }
}

/// 重采样参数，原样透传给服务端。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ResamplingOptions {
    pub resolution_secs: Option<u32>,
}

/// 附加数据开关：上下界与组件状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct IncludeOptions {
    pub filter_option: FilterOption,
    pub bounds: Option<FilterOption>,
    pub states: Option<FilterOption>,
}

impl IncludeOptions {
    /// 请求状态记录。
    pub fn with_states() -> Self {
        Self {
            states: Some(FilterOption::Include),
            ..Self::default()
        }
    }

    /// 请求上下界。
    pub fn with_bounds(mut self) -> Self {
        self.bounds = Some(FilterOption::Include);
        self
    }
}

/// 历史查询过滤条件。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct ListFilter {
    pub resampling: ResamplingOptions,
    pub time_filter: TimeFilter,
    pub include: IncludeOptions,
}

/// 实时流过滤条件（无时间窗口）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct StreamFilter {
    pub resampling: ResamplingOptions,
    pub include: IncludeOptions,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn time_filter_rejects_inverted_window() {
        let start = Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let err = TimeFilter::between(start, end).expect_err("inverted");
        assert!(err.to_string().starts_with("invalid time filter"));
    }

    #[test]
    fn time_filter_is_half_open() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap();
        let filter = TimeFilter::between(start, end).expect("window");
        assert!(filter.contains(start));
        assert!(!filter.contains(end));
        assert!(TimeFilter::default().contains(end));
    }

    #[test]
    fn deserialized_time_filter_is_validated() {
        let inverted = serde_json::json!({
            "start": "2024-01-02T00:00:00Z",
            "end": "2024-01-01T00:00:00Z",
        });
        let err = serde_json::from_value::<TimeFilter>(inverted).expect_err("inverted");
        assert!(err.to_string().contains("invalid time filter"));

        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let filter: TimeFilter =
            serde_json::from_value(serde_json::json!({ "start": "2024-01-01T00:00:00Z" }))
                .expect("open ended");
        assert_eq!(filter.start(), Some(start));
        assert_eq!(filter.end(), None);
    }

    #[test]
    fn empty_window_is_allowed() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert!(TimeFilter::between(ts, ts).is_ok());
    }
}
