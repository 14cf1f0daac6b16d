//! 记录模型 → 请求 DTO。

use domain::{HistoryRequest, MicrogridComponents, RequestKey};

use crate::{
    IncludeOptions, ListFilter, ListMicrogridComponentsDataRequest, MicrogridComponentIds,
    PaginationParams, ReceiveMicrogridComponentsDataStreamRequest, ResamplingOptions,
    StreamFilter, TimeFilter, Timestamp,
};

impl From<&MicrogridComponents> for MicrogridComponentIds {
    fn from(value: &MicrogridComponents) -> Self {
        Self {
            microgrid_id: value.microgrid_id,
            component_ids: value.component_ids.clone(),
        }
    }
}

impl From<&domain::TimeFilter> for TimeFilter {
    fn from(value: &domain::TimeFilter) -> Self {
        Self {
            start: value.start().map(Timestamp::from_datetime),
            end: value.end().map(Timestamp::from_datetime),
        }
    }
}

impl From<&domain::ResamplingOptions> for ResamplingOptions {
    fn from(value: &domain::ResamplingOptions) -> Self {
        Self {
            resolution: value.resolution_secs,
        }
    }
}

impl From<&domain::IncludeOptions> for IncludeOptions {
    fn from(value: &domain::IncludeOptions) -> Self {
        Self {
            filter_option: value.filter_option.code(),
            bounds: value.bounds.map(|option| option.code()),
            states: value.states.map(|option| option.code()),
        }
    }
}

impl From<&domain::ListFilter> for ListFilter {
    fn from(value: &domain::ListFilter) -> Self {
        Self {
            resampling_options: Some((&value.resampling).into()),
            time_filter: Some((&value.time_filter).into()),
            include_options: Some((&value.include).into()),
        }
    }
}

impl From<&domain::StreamFilter> for StreamFilter {
    fn from(value: &domain::StreamFilter) -> Self {
        Self {
            resampling_options: Some((&value.resampling).into()),
            include_options: Some((&value.include).into()),
        }
    }
}

impl ListMicrogridComponentsDataRequest {
    /// 构造某一页的请求；首页 `page_token` 为 `None`。
    pub fn page(request: &HistoryRequest, page_size: u32, page_token: Option<String>) -> Self {
        Self {
            microgrid_components: request.selectors.iter().map(Into::into).collect(),
            metrics: request.metrics.iter().map(|metric| metric.code()).collect(),
            filter: Some((&request.filter).into()),
            pagination_params: Some(PaginationParams {
                page_size,
                page_token,
            }),
        }
    }

    pub fn page_token(&self) -> Option<&str> {
        self.pagination_params
            .as_ref()
            .and_then(|params| params.page_token.as_deref())
    }

    pub fn page_size(&self) -> u32 {
        self.pagination_params
            .as_ref()
            .map(|params| params.page_size)
            .unwrap_or_default()
    }
}

impl From<&RequestKey> for ReceiveMicrogridComponentsDataStreamRequest {
    fn from(key: &RequestKey) -> Self {
        Self {
            microgrid_components: vec![MicrogridComponentIds {
                microgrid_id: key.microgrid_id(),
                component_ids: key.component_ids().to_vec(),
            }],
            metrics: key.metrics().iter().map(|metric| metric.code()).collect(),
            filter: Some(key.filter().into()),
        }
    }
}
