use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Metric;

/// 聚合样本：服务端按重采样窗口计算的统计值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedValue {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub raw_values: Vec<f64>,
}

/// 样本值：标量或聚合值，二者恰好其一。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SampleValue {
    Simple { value: f64 },
    Aggregated(AggregatedValue),
}

impl SampleValue {
    pub fn simple(value: f64) -> Self {
        Self::Simple { value }
    }

    /// 标量值；聚合样本取平均值。
    pub fn scalar(&self) -> f64 {
        match self {
            Self::Simple { value } => *value,
            Self::Aggregated(aggregated) => aggregated.avg,
        }
    }
}

/// 样本附带的上下界，任一端可缺省。
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Bounds {
    pub lower: Option<f64>,
    pub upper: Option<f64>,
}

/// 单个指标样本。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: DateTime<Utc>,
    pub metric: Metric,
    pub value: SampleValue,
    pub bounds: Vec<Bounds>,
}
