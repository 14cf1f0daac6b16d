//! 响应树展平：微电网 → 组件 → 样本/状态 ⇒ 有序的 `FlatRecord` 序列。
//!
//! 顺序规则：微电网按收到的顺序，组件按收到的顺序；
//! 同一组件内先输出全部指标样本，再输出全部状态，均保持原有下标顺序，不重新排序。
//!
//! 空容器产出空序列；结构不合法（缺时间戳、时间戳越界、样本变体缺失或同时存在、
//! 实时更新缺少组件数据）返回 [`NormalizeError::Malformed`]，与"空页"区分开。

use api_contract::{
    ComponentData, ListMicrogridComponentsDataResponse, MetricSample,
    ReceiveMicrogridComponentsDataStreamResponse, Timestamp,
};
use chrono::{DateTime, Utc};
use domain::{
    AggregatedValue, Bounds, ComponentErrorCode, ComponentStateCode, FlatRecord, Metric,
    MicrogridId, Sample, SampleValue,
};
use reporting_telemetry::{
    record_duplicate_codes, record_malformed_payloads, record_unknown_codes,
};
use tracing::warn;

/// 展平错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// 展平历史查询的一页。
pub fn flatten_page(
    page: &ListMicrogridComponentsDataResponse,
) -> Result<Vec<FlatRecord>, NormalizeError> {
    let mut records = Vec::new();
    for microgrid in &page.microgrids {
        for component in &microgrid.components {
            flatten_component(microgrid.microgrid_id, component, &mut records)
                .inspect_err(report_malformed)?;
        }
    }
    Ok(records)
}

/// 展平实时流的一条更新。
pub fn flatten_update(
    update: &ReceiveMicrogridComponentsDataStreamResponse,
) -> Result<Vec<FlatRecord>, NormalizeError> {
    let Some(component) = update.component_data.as_ref() else {
        let err = NormalizeError::Malformed(format!(
            "update for microgrid {} has no component data",
            update.microgrid_id
        ));
        report_malformed(&err);
        return Err(err);
    };
    let mut records = Vec::new();
    flatten_component(update.microgrid_id, component, &mut records)
        .inspect_err(report_malformed)?;
    Ok(records)
}

/// 展平单个组件的数据并追加到 `out`。
pub fn flatten_component(
    microgrid_id: MicrogridId,
    component: &ComponentData,
    out: &mut Vec<FlatRecord>,
) -> Result<(), NormalizeError> {
    out.reserve(component.metric_samples.len() + component.states.len());
    for (index, sample) in component.metric_samples.iter().enumerate() {
        let sample = decode_sample(sample).map_err(|err| {
            in_context(err, microgrid_id, component.component_id, "sample", index)
        })?;
        out.push(FlatRecord::from_sample(
            microgrid_id,
            component.component_id,
            sample,
        ));
    }
    for (index, state) in component.states.iter().enumerate() {
        let state = decode_state(state).map_err(|err| {
            in_context(err, microgrid_id, component.component_id, "state", index)
        })?;
        out.push(FlatRecord::from_state(
            microgrid_id,
            component.component_id,
            state,
        ));
    }
    Ok(())
}

/// 解码一条指标样本。
pub fn decode_sample(sample: &MetricSample) -> Result<Sample, NormalizeError> {
    let timestamp = decode_timestamp(sample.sampled_at)?;
    let variant = sample
        .sample
        .as_ref()
        .ok_or_else(|| NormalizeError::Malformed("missing sample value".to_string()))?;
    let value = match (
        variant.simple_metric_sample.as_ref(),
        variant.aggregated_metric_sample.as_ref(),
    ) {
        (Some(simple), None) => SampleValue::simple(simple.value),
        (None, Some(aggregated)) => SampleValue::Aggregated(AggregatedValue {
            avg: aggregated.avg_value,
            min: aggregated.min_value,
            max: aggregated.max_value,
            raw_values: aggregated.raw_values.clone(),
        }),
        (None, None) => {
            return Err(NormalizeError::Malformed(
                "sample has neither simple nor aggregated value".to_string(),
            ));
        }
        (Some(_), Some(_)) => {
            return Err(NormalizeError::Malformed(
                "sample has both simple and aggregated value".to_string(),
            ));
        }
    };

    Ok(Sample {
        timestamp,
        metric: decode_metric(sample.metric),
        value,
        bounds: sample
            .bounds
            .iter()
            .map(|bounds| Bounds {
                lower: bounds.lower,
                upper: bounds.upper,
            })
            .collect(),
    })
}

/// 解码一条组件状态；三个列表去重后保留首次出现的顺序。
pub fn decode_state(
    state: &api_contract::ComponentState,
) -> Result<domain::ComponentState, NormalizeError> {
    let timestamp = decode_timestamp(state.sampled_at)?;
    let states: Vec<ComponentStateCode> = state
        .states
        .iter()
        .map(|code| decode_code(*code, ComponentStateCode::try_from_code, "component_state"))
        .collect();
    let warnings: Vec<ComponentErrorCode> = state
        .warnings
        .iter()
        .map(|code| decode_code(*code, ComponentErrorCode::try_from_code, "component_warning"))
        .collect();
    let errors: Vec<ComponentErrorCode> = state
        .errors
        .iter()
        .map(|code| decode_code(*code, ComponentErrorCode::try_from_code, "component_error"))
        .collect();

    let raw_len = states.len() + warnings.len() + errors.len();
    let decoded = domain::ComponentState::new(timestamp, states, warnings, errors);
    let kept = decoded.states().len() + decoded.warnings().len() + decoded.errors().len();
    if kept < raw_len {
        record_duplicate_codes((raw_len - kept) as u64);
    }
    Ok(decoded)
}

fn decode_timestamp(ts: Option<Timestamp>) -> Result<DateTime<Utc>, NormalizeError> {
    let ts = ts.ok_or_else(|| NormalizeError::Malformed("missing sampled_at".to_string()))?;
    ts.to_datetime().ok_or_else(|| {
        NormalizeError::Malformed(format!(
            "timestamp out of range: {}s {}ns",
            ts.seconds, ts.nanos
        ))
    })
}

fn decode_metric(code: i32) -> Metric {
    decode_code(code, Metric::try_from_code, "metric")
}

/// 未知编码解码为 `Unspecified`（各枚举的 `Default`），并计数告警。
fn decode_code<T: Default>(code: i32, decode: fn(i32) -> Option<T>, kind: &'static str) -> T {
    match decode(code) {
        Some(value) => value,
        None => {
            record_unknown_codes(1);
            warn!(target: "reporting.normalize", kind, code, "unknown_code_unspecified");
            T::default()
        }
    }
}

fn in_context(
    err: NormalizeError,
    microgrid_id: MicrogridId,
    component_id: u64,
    what: &str,
    index: usize,
) -> NormalizeError {
    let NormalizeError::Malformed(reason) = err;
    NormalizeError::Malformed(format!(
        "microgrid {microgrid_id} component {component_id} {what} {index}: {reason}"
    ))
}

fn report_malformed(err: &NormalizeError) {
    record_malformed_payloads(1);
    warn!(target: "reporting.normalize", error = %err, "malformed_payload");
}
