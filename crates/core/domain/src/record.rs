use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    Bounds, ComponentErrorCode, ComponentId, ComponentState, ComponentStateCode, Metric,
    MicrogridId, Sample, SampleValue,
};

/// 展平后的记录载荷。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordData {
    Metric {
        metric: Metric,
        value: SampleValue,
        bounds: Vec<Bounds>,
    },
    State {
        states: Vec<ComponentStateCode>,
        warnings: Vec<ComponentErrorCode>,
        errors: Vec<ComponentErrorCode>,
    },
}

/// 记录类别：某个指标，或者状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Metric(Metric),
    State,
}

/// 去规范化的输出单元：一条样本或一条状态对应一条记录。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatRecord {
    pub microgrid_id: MicrogridId,
    pub component_id: ComponentId,
    pub timestamp: DateTime<Utc>,
    pub data: RecordData,
}

impl FlatRecord {
    pub fn from_sample(microgrid_id: MicrogridId, component_id: ComponentId, sample: Sample) -> Self {
        Self {
            microgrid_id,
            component_id,
            timestamp: sample.timestamp,
            data: RecordData::Metric {
                metric: sample.metric,
                value: sample.value,
                bounds: sample.bounds,
            },
        }
    }

    pub fn from_state(
        microgrid_id: MicrogridId,
        component_id: ComponentId,
        state: ComponentState,
    ) -> Self {
        let (timestamp, states, warnings, errors) = state.into_parts();
        Self {
            microgrid_id,
            component_id,
            timestamp,
            data: RecordData::State {
                states,
                warnings,
                errors,
            },
        }
    }

    pub fn kind(&self) -> RecordKind {
        match &self.data {
            RecordData::Metric { metric, .. } => RecordKind::Metric(*metric),
            RecordData::State { .. } => RecordKind::State,
        }
    }

    pub fn metric(&self) -> Option<Metric> {
        match &self.data {
            RecordData::Metric { metric, .. } => Some(*metric),
            RecordData::State { .. } => None,
        }
    }

    /// 指标记录的样本值；状态记录返回 `None`。
    pub fn value(&self) -> Option<&SampleValue> {
        match &self.data {
            RecordData::Metric { value, .. } => Some(value),
            RecordData::State { .. } => None,
        }
    }
}
