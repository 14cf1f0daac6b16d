//! 报表客户端的记录模型。
//!
//! 线协议上的编码一律为 `i32`，本 crate 负责把它们解码成前向兼容的枚举：
//! 未知编码解码为 `Unspecified` 并输出告警，而不是拒绝整条消息。

#[macro_use]
mod wire;

pub mod component;
pub mod error;
pub mod filter;
pub mod metric;
pub mod record;
pub mod request;
pub mod sample;

pub use component::{ComponentErrorCode, ComponentState, ComponentStateCode};
pub use error::DomainError;
pub use filter::{
    FilterOption, IncludeOptions, ListFilter, ResamplingOptions, StreamFilter, TimeFilter,
};
pub use metric::Metric;
pub use record::{FlatRecord, RecordData, RecordKind};
pub use request::{HistoryRequest, MicrogridComponents, RequestKey};
pub use sample::{AggregatedValue, Bounds, Sample, SampleValue};

/// 微电网标识。
pub type MicrogridId = u64;

/// 组件标识（在所属微电网内唯一）。
pub type ComponentId = u64;
