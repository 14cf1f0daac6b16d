use serde::{Deserialize, Serialize};

use crate::{ComponentId, DomainError, ListFilter, Metric, MicrogridId, StreamFilter};

/// 选择器：一个微电网下的若干组件。
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MicrogridComponents {
    pub microgrid_id: MicrogridId,
    pub component_ids: Vec<ComponentId>,
}

impl MicrogridComponents {
    pub fn new(microgrid_id: MicrogridId, component_ids: impl Into<Vec<ComponentId>>) -> Self {
        Self {
            microgrid_id,
            component_ids: component_ids.into(),
        }
    }
}

/// 历史查询请求：可跨多个微电网。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HistoryRequest {
    pub selectors: Vec<MicrogridComponents>,
    pub metrics: Vec<Metric>,
    pub filter: ListFilter,
}

impl HistoryRequest {
    pub fn new(
        selectors: Vec<MicrogridComponents>,
        metrics: Vec<Metric>,
        filter: ListFilter,
    ) -> Result<Self, DomainError> {
        if selectors.is_empty() {
            return Err(DomainError::InvalidSelector(
                "at least one microgrid is required".to_string(),
            ));
        }
        Ok(Self {
            selectors,
            metrics,
            filter,
        })
    }

    pub fn single(
        microgrid_id: MicrogridId,
        component_ids: impl Into<Vec<ComponentId>>,
        metrics: Vec<Metric>,
        filter: ListFilter,
    ) -> Self {
        Self {
            selectors: vec![MicrogridComponents::new(microgrid_id, component_ids)],
            metrics,
            filter,
        }
    }
}

/// 实时请求的结构化身份。
///
/// 构造时规范化：组件 ID 升序去重，指标按编码升序去重。
/// 因此输入顺序不影响相等性，相等的 key 共享同一条网络流。
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestKey {
    microgrid_id: MicrogridId,
    component_ids: Vec<ComponentId>,
    metrics: Vec<Metric>,
    filter: StreamFilter,
}

impl RequestKey {
    pub fn new(
        microgrid_id: MicrogridId,
        component_ids: &[ComponentId],
        metrics: &[Metric],
        filter: StreamFilter,
    ) -> Self {
        let mut component_ids = component_ids.to_vec();
        component_ids.sort_unstable();
        component_ids.dedup();
        Self {
            microgrid_id,
            component_ids,
            metrics: Metric::normalize_list(metrics),
            filter,
        }
    }

    pub fn microgrid_id(&self) -> MicrogridId {
        self.microgrid_id
    }

    pub fn component_ids(&self) -> &[ComponentId] {
        &self.component_ids
    }

    pub fn metrics(&self) -> &[Metric] {
        &self.metrics
    }

    pub fn filter(&self) -> &StreamFilter {
        &self.filter
    }

    /// 日志用的简短标签。
    pub fn label(&self) -> String {
        format!(
            "mg{}:c{:?}:m{:?}",
            self.microgrid_id,
            self.component_ids,
            self.metrics.iter().map(|m| m.code()).collect::<Vec<_>>()
        )
    }
}
