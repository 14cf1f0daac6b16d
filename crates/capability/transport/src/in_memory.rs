//! 传输层内存实现
//!
//! 仅用于本地测试：按偏移量分页、可脚本化失败、可手动推送实时更新。

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use api_contract::{
    ComponentData, ComponentState, ListMicrogridComponentsDataRequest,
    ListMicrogridComponentsDataResponse, MetricSample, MetricSampleVariant, MicrogridData,
    PaginationInfo, ReceiveMicrogridComponentsDataStreamRequest,
    ReceiveMicrogridComponentsDataStreamResponse, SimpleMetricSample, Timestamp,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{ComponentErrorCode, ComponentStateCode, FilterOption, Metric};
use futures_util::StreamExt;
use futures_util::stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::{ComponentDataStream, ReportingTransport, TransportError};

type StreamItem = Result<ReceiveMicrogridComponentsDataStreamResponse, TransportError>;

/// 数据集中的一条样本或状态。
#[derive(Debug, Clone)]
pub enum FixtureEntry {
    Sample(MetricSample),
    State(ComponentState),
}

/// 数据集的一行，按插入顺序分页。
#[derive(Debug, Clone)]
pub struct FixtureRow {
    pub microgrid_id: u64,
    pub component_id: u64,
    pub entry: FixtureEntry,
}

impl FixtureRow {
    pub fn sample(
        microgrid_id: u64,
        component_id: u64,
        ts: DateTime<Utc>,
        metric: Metric,
        value: f64,
    ) -> Self {
        Self {
            microgrid_id,
            component_id,
            entry: FixtureEntry::Sample(wire_sample(ts, metric, value)),
        }
    }

    pub fn state(
        microgrid_id: u64,
        component_id: u64,
        ts: DateTime<Utc>,
        states: &[ComponentStateCode],
        errors: &[ComponentErrorCode],
    ) -> Self {
        Self {
            microgrid_id,
            component_id,
            entry: FixtureEntry::State(wire_state(ts, states, errors)),
        }
    }

    fn sampled_at(&self) -> Option<Timestamp> {
        match &self.entry {
            FixtureEntry::Sample(sample) => sample.sampled_at,
            FixtureEntry::State(state) => state.sampled_at,
        }
    }
}

/// 构造一条标量样本。
pub fn wire_sample(ts: DateTime<Utc>, metric: Metric, value: f64) -> MetricSample {
    MetricSample {
        sampled_at: Some(Timestamp::from_datetime(ts)),
        metric: metric.code(),
        sample: Some(MetricSampleVariant {
            simple_metric_sample: Some(SimpleMetricSample { value }),
            aggregated_metric_sample: None,
        }),
        bounds: Vec::new(),
    }
}

/// 构造一条状态。
pub fn wire_state(
    ts: DateTime<Utc>,
    states: &[ComponentStateCode],
    errors: &[ComponentErrorCode],
) -> ComponentState {
    ComponentState {
        sampled_at: Some(Timestamp::from_datetime(ts)),
        states: states.iter().map(|code| code.code()).collect(),
        warnings: Vec::new(),
        errors: errors.iter().map(|code| code.code()).collect(),
    }
}

/// 构造只含一条样本的实时更新。
pub fn sample_update(
    microgrid_id: u64,
    component_id: u64,
    ts: DateTime<Utc>,
    metric: Metric,
    value: f64,
) -> ReceiveMicrogridComponentsDataStreamResponse {
    ReceiveMicrogridComponentsDataStreamResponse {
        microgrid_id,
        component_data: Some(ComponentData {
            component_id,
            metric_samples: vec![wire_sample(ts, metric, value)],
            states: Vec::new(),
        }),
    }
}

struct StreamSlot {
    request: ReceiveMicrogridComponentsDataStreamRequest,
    sender: Option<mpsc::UnboundedSender<StreamItem>>,
}

#[derive(Default)]
struct FixtureState {
    rows: Vec<FixtureRow>,
    scripted_pages: Option<VecDeque<ListMicrogridComponentsDataResponse>>,
    trailing_empty_page: bool,
    list_failures: HashMap<usize, TransportError>,
    list_requests: Vec<ListMicrogridComponentsDataRequest>,
    open_failures: VecDeque<TransportError>,
    open_delay: Option<Duration>,
    streams: Vec<StreamSlot>,
    closed: bool,
}

/// 内存传输实现
#[derive(Default)]
pub struct InMemoryTransport {
    state: Mutex<FixtureState>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 以数据集方式响应分页请求（偏移量作为 token）。
    ///
    /// 行先按 (微电网, 组件) 首次出现的顺序归组，组内样本在前、状态在后，
    /// 因此任意分页边界展平后的记录顺序都相同。
    pub fn with_rows(rows: Vec<FixtureRow>) -> Self {
        let transport = Self::new();
        transport.state.lock().rows = canonical_order(rows);
        transport
    }

    /// 按调用顺序原样返回给定的页，忽略 token；用完后返回空页。
    pub fn with_pages(pages: Vec<ListMicrogridComponentsDataResponse>) -> Self {
        let transport = Self::new();
        transport.state.lock().scripted_pages = Some(pages.into());
        transport
    }

    /// 最后一个非空页仍带 token，下一次请求得到空页。
    pub fn with_trailing_empty_page(self) -> Self {
        self.state.lock().trailing_empty_page = true;
        self
    }

    /// 第 `call_index` 次（从 0 计）分页请求返回错误。
    pub fn fail_list_call(&self, call_index: usize, error: TransportError) {
        self.state.lock().list_failures.insert(call_index, error);
    }

    /// 下一次打开实时流返回错误。
    pub fn fail_next_stream_open(&self, error: TransportError) {
        self.state.lock().open_failures.push_back(error);
    }

    /// 打开实时流前等待的时长。
    pub fn set_open_delay(&self, delay: Duration) {
        self.state.lock().open_delay = Some(delay);
    }

    pub fn list_calls(&self) -> usize {
        self.state.lock().list_requests.len()
    }

    pub fn list_requests(&self) -> Vec<ListMicrogridComponentsDataRequest> {
        self.state.lock().list_requests.clone()
    }

    pub fn streams_opened(&self) -> usize {
        self.state.lock().streams.len()
    }

    pub fn stream_request(&self, index: usize) -> Option<ReceiveMicrogridComponentsDataStreamRequest> {
        self.state
            .lock()
            .streams
            .get(index)
            .map(|slot| slot.request.clone())
    }

    /// 向第 `index` 条流推送一条更新；流已关闭时返回 false。
    pub fn send_update(
        &self,
        index: usize,
        update: ReceiveMicrogridComponentsDataStreamResponse,
    ) -> bool {
        self.send(index, Ok(update))
    }

    /// 第 `index` 条流以错误结束。
    pub fn fail_stream(&self, index: usize, error: TransportError) -> bool {
        let sent = self.send(index, Err(error));
        self.end_stream(index);
        sent
    }

    /// 服务端正常结束第 `index` 条流。
    pub fn end_stream(&self, index: usize) {
        if let Some(slot) = self.state.lock().streams.get_mut(index) {
            slot.sender = None;
        }
    }

    /// 客户端是否已丢弃第 `index` 条流（或服务端已结束）。
    pub fn is_stream_closed(&self, index: usize) -> bool {
        self.state
            .lock()
            .streams
            .get(index)
            .is_none_or(|slot| slot.sender.as_ref().is_none_or(|sender| sender.is_closed()))
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    fn send(&self, index: usize, item: StreamItem) -> bool {
        let state = self.state.lock();
        match state.streams.get(index).and_then(|slot| slot.sender.as_ref()) {
            Some(sender) => sender.send(item).is_ok(),
            None => false,
        }
    }

    fn list_page(
        &self,
        request: ListMicrogridComponentsDataRequest,
    ) -> Result<ListMicrogridComponentsDataResponse, TransportError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;
        if state.closed {
            return Err(TransportError::Closed);
        }
        let call_index = state.list_requests.len();
        state.list_requests.push(request.clone());
        if let Some(error) = state.list_failures.remove(&call_index) {
            return Err(error);
        }
        if let Some(pages) = state.scripted_pages.as_mut() {
            return Ok(pages.pop_front().unwrap_or_default());
        }

        let offset = match request.page_token() {
            None => 0,
            Some(token) => token.parse::<usize>().map_err(|_| TransportError::Status {
                code: 3,
                message: format!("invalid page token: {token}"),
            })?,
        };
        let page_size = request.page_size().max(1) as usize;
        let matching: Vec<&FixtureRow> = state
            .rows
            .iter()
            .filter(|row| row_matches(row, &request))
            .collect();
        let end = offset.saturating_add(page_size).min(matching.len());
        let page = matching.get(offset..end).unwrap_or(&[]);
        let next_page_token = if end < matching.len()
            || (state.trailing_empty_page && !page.is_empty())
        {
            Some(end.to_string())
        } else {
            None
        };

        Ok(ListMicrogridComponentsDataResponse {
            microgrids: group_rows(page),
            pagination_info: Some(PaginationInfo {
                total_items: matching.len() as u32,
                next_page_token,
            }),
        })
    }

    fn open_stream(
        &self,
        request: ReceiveMicrogridComponentsDataStreamRequest,
    ) -> Result<ComponentDataStream, TransportError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(TransportError::Closed);
        }
        if let Some(error) = state.open_failures.pop_front() {
            return Err(error);
        }
        let (sender, receiver) = mpsc::unbounded_channel();
        state.streams.push(StreamSlot {
            request,
            sender: Some(sender),
        });
        Ok(stream::unfold(receiver, |mut receiver| async move {
            receiver.recv().await.map(|item| (item, receiver))
        })
        .boxed())
    }
}

#[async_trait]
impl ReportingTransport for InMemoryTransport {
    async fn list_microgrid_components_data(
        &self,
        request: ListMicrogridComponentsDataRequest,
    ) -> Result<ListMicrogridComponentsDataResponse, TransportError> {
        self.list_page(request)
    }

    async fn receive_microgrid_components_data_stream(
        &self,
        request: ReceiveMicrogridComponentsDataStreamRequest,
    ) -> Result<ComponentDataStream, TransportError> {
        let delay = self.state.lock().open_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.open_stream(request)
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.closed = true;
        for slot in state.streams.iter_mut() {
            slot.sender = None;
        }
        Ok(())
    }
}

fn row_matches(row: &FixtureRow, request: &ListMicrogridComponentsDataRequest) -> bool {
    let selected = request.microgrid_components.is_empty()
        || request.microgrid_components.iter().any(|selector| {
            selector.microgrid_id == row.microgrid_id
                && (selector.component_ids.is_empty()
                    || selector.component_ids.contains(&row.component_id))
        });
    if !selected {
        return false;
    }

    let filter = request.filter.unwrap_or_default();
    let kind_selected = match &row.entry {
        FixtureEntry::Sample(sample) => {
            request.metrics.is_empty() || request.metrics.contains(&sample.metric)
        }
        FixtureEntry::State(_) => filter
            .include_options
            .and_then(|include| include.states)
            .is_some_and(|states| states == FilterOption::Include.code()),
    };
    if !kind_selected {
        return false;
    }

    let Some(time) = filter.time_filter else {
        return true;
    };
    let Some(ts) = row.sampled_at() else {
        return true;
    };
    let (seconds, nanos) = (ts.seconds, ts.nanos);
    let after_start = time
        .start
        .is_none_or(|start| (seconds, nanos) >= (start.seconds, start.nanos));
    let before_end = time
        .end
        .is_none_or(|end| (seconds, nanos) < (end.seconds, end.nanos));
    after_start && before_end
}

fn canonical_order(rows: Vec<FixtureRow>) -> Vec<FixtureRow> {
    let mut groups: Vec<(u64, u64)> = Vec::new();
    let mut keyed: Vec<(usize, u8, FixtureRow)> = rows
        .into_iter()
        .map(|row| {
            let group = (row.microgrid_id, row.component_id);
            let index = match groups.iter().position(|seen| *seen == group) {
                Some(index) => index,
                None => {
                    groups.push(group);
                    groups.len() - 1
                }
            };
            let kind = match row.entry {
                FixtureEntry::Sample(_) => 0,
                FixtureEntry::State(_) => 1,
            };
            (index, kind, row)
        })
        .collect();
    keyed.sort_by_key(|(group, kind, _)| (*group, *kind));
    keyed.into_iter().map(|(_, _, row)| row).collect()
}

/// 把连续的行重新组装成 微电网 → 组件 的嵌套结构。
fn group_rows(rows: &[&FixtureRow]) -> Vec<MicrogridData> {
    let mut microgrids: Vec<MicrogridData> = Vec::new();
    for row in rows {
        if microgrids
            .last()
            .is_none_or(|microgrid| microgrid.microgrid_id != row.microgrid_id)
        {
            microgrids.push(MicrogridData {
                microgrid_id: row.microgrid_id,
                components: Vec::new(),
            });
        }
        let Some(microgrid) = microgrids.last_mut() else {
            continue;
        };
        if microgrid
            .components
            .last()
            .is_none_or(|component| component.component_id != row.component_id)
        {
            microgrid.components.push(ComponentData {
                component_id: row.component_id,
                ..ComponentData::default()
            });
        }
        let Some(component) = microgrid.components.last_mut() else {
            continue;
        };
        match &row.entry {
            FixtureEntry::Sample(sample) => component.metric_samples.push(sample.clone()),
            FixtureEntry::State(state) => component.states.push(state.clone()),
        }
    }
    microgrids
}
