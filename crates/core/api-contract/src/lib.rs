//! 报表服务的线协议契约。
//!
//! 两个 RPC：
//! - `ListMicrogridComponentsData`：按 token 分页的历史查询
//! - `ReceiveMicrogridComponentsDataStream`：服务端推送的实时流
//!
//! 枚举字段保持 `i32` 原值，由展平层负责解码，未知编码不会导致整条消息被拒。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

mod convert;

/// 协议时间戳（Unix 纪元起的秒 + 纳秒，UTC）。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Timestamp {
    pub seconds: i64,
    pub nanos: i32,
}

impl Timestamp {
    pub fn from_datetime(value: DateTime<Utc>) -> Self {
        Self {
            seconds: value.timestamp(),
            nanos: value.timestamp_subsec_nanos() as i32,
        }
    }

    /// 转为 UTC 时间；超出可表示范围时返回 `None`。
    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        if !(0..1_000_000_000).contains(&self.nanos) {
            return None;
        }
        DateTime::from_timestamp(self.seconds, self.nanos as u32)
    }
}

/// 组件选择器。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MicrogridComponentIds {
    pub microgrid_id: u64,
    pub component_ids: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaginationParams {
    pub page_size: u32,
    pub page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PaginationInfo {
    pub total_items: u32,
    pub next_page_token: Option<String>,
}

impl PaginationInfo {
    /// 非空的下一页 token。
    pub fn next_token(&self) -> Option<&str> {
        self.next_page_token.as_deref().filter(|token| !token.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TimeFilter {
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ResamplingOptions {
    pub resolution: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IncludeOptions {
    pub filter_option: i32,
    pub bounds: Option<i32>,
    pub states: Option<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListFilter {
    pub resampling_options: Option<ResamplingOptions>,
    pub time_filter: Option<TimeFilter>,
    pub include_options: Option<IncludeOptions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamFilter {
    pub resampling_options: Option<ResamplingOptions>,
    pub include_options: Option<IncludeOptions>,
}

/// 历史查询请求。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListMicrogridComponentsDataRequest {
    pub microgrid_components: Vec<MicrogridComponentIds>,
    pub metrics: Vec<i32>,
    pub filter: Option<ListFilter>,
    pub pagination_params: Option<PaginationParams>,
}

/// 历史查询的一页响应。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ListMicrogridComponentsDataResponse {
    pub microgrids: Vec<MicrogridData>,
    pub pagination_info: Option<PaginationInfo>,
}

impl ListMicrogridComponentsDataResponse {
    pub fn next_token(&self) -> Option<&str> {
        self.pagination_info.as_ref().and_then(PaginationInfo::next_token)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MicrogridData {
    pub microgrid_id: u64,
    pub components: Vec<ComponentData>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComponentData {
    pub component_id: u64,
    pub metric_samples: Vec<MetricSample>,
    pub states: Vec<ComponentState>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricSample {
    pub sampled_at: Option<Timestamp>,
    pub metric: i32,
    pub sample: Option<MetricSampleVariant>,
    pub bounds: Vec<Bounds>,
}

/// 样本变体：协议上是 oneof，两个字段应当恰好一个有值。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MetricSampleVariant {
    pub simple_metric_sample: Option<SimpleMetricSample>,
    pub aggregated_metric_sample: Option<AggregatedMetricSample>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SimpleMetricSample {
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AggregatedMetricSample {
    pub avg_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub raw_values: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Bounds {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComponentState {
    pub sampled_at: Option<Timestamp>,
    pub states: Vec<i32>,
    pub warnings: Vec<i32>,
    pub errors: Vec<i32>,
}

/// 实时流订阅请求。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReceiveMicrogridComponentsDataStreamRequest {
    pub microgrid_components: Vec<MicrogridComponentIds>,
    pub metrics: Vec<i32>,
    pub filter: Option<StreamFilter>,
}

/// 实时流中的一条更新。
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReceiveMicrogridComponentsDataStreamResponse {
    pub microgrid_id: u64,
    pub component_data: Option<ComponentData>,
}
