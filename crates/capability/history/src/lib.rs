//! 历史查询分页驱动。
//!
//! 把 token 分页的 `ListMicrogridComponentsData` 变成一条有序、惰性的记录流：
//! 只有消费者拉取下一条记录而缓冲已空时才请求下一页。
//!
//! 终止条件：
//! - 某页展平后没有记录
//! - 某页没有（或为空的）`next_page_token`：该页记录照常产出，之后结束
//! - 传输失败或数据不合法：产出一条错误后结束

use std::collections::VecDeque;
use std::sync::Arc;

use api_contract::ListMicrogridComponentsDataRequest;
use chrono::{DateTime, Utc};
use domain::{FlatRecord, HistoryRequest, Metric, SampleValue};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use reporting_normalize::{NormalizeError, flatten_page};
use reporting_telemetry::{
    new_correlation_id, record_history_failures, record_history_records, record_pages_fetched,
};
use reporting_transport::{ReportingTransport, TransportError};
use tracing::{debug, warn};

pub use reporting_config::DEFAULT_PAGE_SIZE;

/// 历史查询错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HistoryError {
    #[error("history transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("history page invalid: {0}")]
    Malformed(#[from] NormalizeError),
}

/// 历史记录流。
pub type RecordStream = BoxStream<'static, Result<FlatRecord, HistoryError>>;

/// 单指标的 (时间戳, 值) 对。
#[derive(Debug, Clone, PartialEq)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    pub value: SampleValue,
}

/// 分页游标状态。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchState {
    Start,
    Next(String),
    Done,
}

/// 分页拉取器：显式状态机，每次 `next_page` 推进一步。
pub struct PageFetcher {
    transport: Arc<dyn ReportingTransport>,
    request: HistoryRequest,
    page_size: u32,
    state: FetchState,
    pages: u64,
    query_id: String,
}

impl PageFetcher {
    /// `page_size` 为 0 时使用默认值。
    pub fn new(
        transport: Arc<dyn ReportingTransport>,
        request: HistoryRequest,
        page_size: u32,
    ) -> Self {
        Self {
            transport,
            request,
            page_size: if page_size == 0 {
                DEFAULT_PAGE_SIZE
            } else {
                page_size
            },
            state: FetchState::Start,
            pages: 0,
            query_id: new_correlation_id(),
        }
    }

    pub fn state(&self) -> &FetchState {
        &self.state
    }

    pub fn is_done(&self) -> bool {
        self.state == FetchState::Done
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn pages_fetched(&self) -> u64 {
        self.pages
    }

    /// 拉取下一页；`Ok(None)` 表示结束。
    ///
    /// 请求进行中被取消（future 被丢弃）时游标不变。
    pub async fn next_page(&mut self) -> Result<Option<Vec<FlatRecord>>, HistoryError> {
        let token = match &self.state {
            FetchState::Start => None,
            FetchState::Next(token) => Some(token.clone()),
            FetchState::Done => return Ok(None),
        };
        let request = ListMicrogridComponentsDataRequest::page(&self.request, self.page_size, token);

        let response = match self.transport.list_microgrid_components_data(request).await {
            Ok(response) => response,
            Err(err) => return Err(self.fail(err.into())),
        };
        let records = match flatten_page(&response) {
            Ok(records) => records,
            Err(err) => return Err(self.fail(err.into())),
        };
        if records.is_empty() {
            debug!(
                target: "reporting.history",
                query_id = %self.query_id,
                page_index = self.pages,
                "empty_page_end"
            );
            self.state = FetchState::Done;
            return Ok(None);
        }

        self.pages += 1;
        record_pages_fetched(1);
        record_history_records(records.len() as u64);
        self.state = match response.next_token() {
            Some(token) => FetchState::Next(token.to_string()),
            None => FetchState::Done,
        };
        debug!(
            target: "reporting.history",
            query_id = %self.query_id,
            page_index = self.pages - 1,
            records = records.len(),
            last = self.is_done(),
            "page_fetched"
        );
        Ok(Some(records))
    }

    /// 转为惰性的记录流；第一次出错后流结束。
    pub fn into_stream(self) -> RecordStream {
        stream::unfold(
            Some((self, VecDeque::new())),
            |state: Option<(PageFetcher, VecDeque<FlatRecord>)>| async move {
                let (mut fetcher, mut buffer) = state?;
                loop {
                    if let Some(record) = buffer.pop_front() {
                        return Some((Ok(record), Some((fetcher, buffer))));
                    }
                    match fetcher.next_page().await {
                        Ok(Some(page)) => buffer.extend(page),
                        Ok(None) => return None,
                        Err(err) => return Some((Err(err), None)),
                    }
                }
            },
        )
        .boxed()
    }

    /// 拉取全部页并收集所有记录。
    pub async fn collect_all(mut self) -> Result<Vec<FlatRecord>, HistoryError> {
        let mut out = Vec::new();
        while let Some(page) = self.next_page().await? {
            out.extend(page);
        }
        Ok(out)
    }

    fn fail(&mut self, err: HistoryError) -> HistoryError {
        self.state = FetchState::Done;
        record_history_failures(1);
        warn!(
            target: "reporting.history",
            query_id = %self.query_id,
            page_index = self.pages,
            error = %err,
            "page_fetch_failed"
        );
        err
    }
}

/// 只保留某一指标的样本，转为 (时间戳, 值) 对；错误原样透传。
pub fn single_metric(
    records: RecordStream,
    metric: Metric,
) -> BoxStream<'static, Result<MetricPoint, HistoryError>> {
    records
        .filter_map(move |item| {
            let point = match item {
                Ok(record) if record.metric() == Some(metric) => {
                    record.value().cloned().map(|value| {
                        Ok(MetricPoint {
                            timestamp: record.timestamp,
                            value,
                        })
                    })
                }
                Ok(_) => None,
                Err(err) => Some(Err(err)),
            };
            std::future::ready(point)
        })
        .boxed()
}
