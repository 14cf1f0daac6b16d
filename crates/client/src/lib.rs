//! 微电网报表客户端门面。
//!
//! - 历史查询：[`ReportingClient::query_history`] 返回惰性的记录流，按需逐页拉取
//! - 实时订阅：[`ReportingClient::subscribe_live`] 返回订阅句柄，相同请求共享一条网络流
//! - 关闭：[`ReportingClient::close`] 结束全部订阅、关闭网络流与底层通道
//!
//! ## 使用示例
//!
//! ```ignore
//! let config = ReportingConfig::load()?;
//! let client = ReportingClient::from_config(transport, &config);
//! let mut records = client.query_history(
//!     10, &[61], &[Metric::AcActivePower], time_filter, HistoryOptions::default(), None,
//! )?;
//! while let Some(record) = records.next().await {
//!     println!("{:?}", record?);
//! }
//! client.close().await?;
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use domain::{
    ComponentId, DomainError, FlatRecord, HistoryRequest, IncludeOptions, ListFilter, Metric,
    MicrogridComponents, MicrogridId, RequestKey, ResamplingOptions, StreamFilter, TimeFilter,
};
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use reporting_config::ReportingConfig;
use reporting_history::{HistoryError, MetricPoint, PageFetcher, single_metric};
use reporting_stream::{
    ConsumerHandle, LiveError, MultiplexerConfig, OverflowPolicy, StreamMultiplexer,
};
use reporting_transport::{ReportingTransport, TimeoutTransport, TransportError};
use tracing::{debug, info};

pub use reporting_history::DEFAULT_PAGE_SIZE;
pub use reporting_telemetry::{MetricsSnapshot, init_tracing, metrics};

/// 客户端错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    #[error("reporting client closed")]
    Closed,
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Live(#[from] LiveError),
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// 历史记录流。
pub type HistoryStream = BoxStream<'static, Result<FlatRecord, ClientError>>;

/// 单指标历史流。
pub type MetricPointStream = BoxStream<'static, Result<MetricPoint, ClientError>>;

/// 历史查询的附加选项（原样透传给服务端）。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HistoryOptions {
    pub resampling: ResamplingOptions,
    pub include: IncludeOptions,
}

/// 客户端参数。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSettings {
    pub service_url: String,
    pub page_size: u32,
    pub live: MultiplexerConfig,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            service_url: reporting_config::DEFAULT_SERVICE_URL.to_string(),
            page_size: DEFAULT_PAGE_SIZE,
            live: MultiplexerConfig::default(),
        }
    }
}

impl From<&ReportingConfig> for ClientSettings {
    fn from(config: &ReportingConfig) -> Self {
        Self {
            service_url: config.service_url.clone(),
            page_size: config.page_size,
            live: MultiplexerConfig {
                buffer_size: config.stream_buffer,
                overflow: if config.drop_lagging_consumers {
                    OverflowPolicy::DisconnectLagging
                } else {
                    OverflowPolicy::Backpressure
                },
            },
        }
    }
}

struct ClientInner {
    transport: Arc<dyn ReportingTransport>,
    multiplexer: StreamMultiplexer,
    settings: ClientSettings,
    closed: AtomicBool,
}

/// 报表客户端；克隆开销很小，所有克隆共享同一组网络流。
#[derive(Clone)]
pub struct ReportingClient {
    inner: Arc<ClientInner>,
}

impl ReportingClient {
    pub fn new(transport: Arc<dyn ReportingTransport>) -> Self {
        Self::with_settings(transport, ClientSettings::default())
    }

    pub fn with_settings(transport: Arc<dyn ReportingTransport>, settings: ClientSettings) -> Self {
        let multiplexer = StreamMultiplexer::new(transport.clone(), settings.live);
        info!(
            target: "reporting.client",
            service_url = %settings.service_url,
            page_size = settings.page_size,
            buffer_size = settings.live.buffer_size,
            "client_created"
        );
        Self {
            inner: Arc::new(ClientInner {
                transport,
                multiplexer,
                settings,
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// 按配置构造；配置了请求超时时为传输层加上超时包装。
    pub fn from_config(transport: Arc<dyn ReportingTransport>, config: &ReportingConfig) -> Self {
        let transport: Arc<dyn ReportingTransport> = match config.request_timeout {
            Some(timeout) => Arc::new(TimeoutTransport::new(transport, timeout)),
            None => transport,
        };
        Self::with_settings(transport, ClientSettings::from(config))
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.inner.settings
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// 当前打开（或正在打开）的实时网络流数量。
    pub fn live_streams(&self) -> usize {
        self.inner.multiplexer.active_streams()
    }

    /// 单个微电网的历史查询。`page_size` 为 `None` 时使用配置值。
    pub fn query_history(
        &self,
        microgrid_id: MicrogridId,
        component_ids: &[ComponentId],
        metrics: &[Metric],
        time_filter: TimeFilter,
        options: HistoryOptions,
        page_size: Option<u32>,
    ) -> Result<HistoryStream, ClientError> {
        let request = HistoryRequest::single(
            microgrid_id,
            component_ids.to_vec(),
            metrics.to_vec(),
            ListFilter {
                resampling: options.resampling,
                time_filter,
                include: options.include,
            },
        );
        self.query_history_request(request, page_size)
    }

    /// 跨多个微电网的历史查询。
    pub fn query_history_request(
        &self,
        request: HistoryRequest,
        page_size: Option<u32>,
    ) -> Result<HistoryStream, ClientError> {
        Ok(self
            .history_pages(request, page_size)?
            .into_stream()
            .map(|item| item.map_err(ClientError::from))
            .boxed())
    }

    /// 按页迭代的历史查询。
    pub fn history_pages(
        &self,
        request: HistoryRequest,
        page_size: Option<u32>,
    ) -> Result<PageFetcher, ClientError> {
        self.ensure_open()?;
        if request.selectors.is_empty() {
            return Err(DomainError::InvalidSelector(
                "at least one microgrid is required".to_string(),
            )
            .into());
        }
        let page_size = page_size.unwrap_or(self.inner.settings.page_size);
        debug!(
            target: "reporting.client",
            microgrids = request.selectors.len(),
            metrics = request.metrics.len(),
            page_size,
            "history_query"
        );
        Ok(PageFetcher::new(
            self.inner.transport.clone(),
            request,
            page_size,
        ))
    }

    /// 单个组件单个指标的 (时间戳, 值) 序列。
    pub fn single_metric(
        &self,
        microgrid_id: MicrogridId,
        component_id: ComponentId,
        metric: Metric,
        time_filter: TimeFilter,
        page_size: Option<u32>,
    ) -> Result<MetricPointStream, ClientError> {
        let request = HistoryRequest::new(
            vec![MicrogridComponents::new(microgrid_id, vec![component_id])],
            vec![metric],
            ListFilter {
                time_filter,
                ..ListFilter::default()
            },
        )?;
        let records = self.history_pages(request, page_size)?.into_stream();
        Ok(single_metric(records, metric)
            .map(|item| item.map_err(ClientError::from))
            .boxed())
    }

    /// 订阅实时数据；相同（规范化后的）请求共享同一条网络流。
    pub async fn subscribe_live(
        &self,
        microgrid_id: MicrogridId,
        component_ids: &[ComponentId],
        metrics: &[Metric],
        filter: StreamFilter,
    ) -> Result<ConsumerHandle, ClientError> {
        self.ensure_open()?;
        let key = RequestKey::new(microgrid_id, component_ids, metrics, filter);
        // 与 close() 并发时由复用器在注册表锁内裁决
        match self.inner.multiplexer.subscribe(key).await {
            Ok(handle) => Ok(handle),
            Err(_) if self.is_closed() => Err(ClientError::Closed),
            Err(err) => Err(err.into()),
        }
    }

    /// 关闭客户端：结束全部实时订阅、关闭网络流与底层通道。可重复调用。
    ///
    /// 与之并发的 `subscribe_live` 要么返回 [`ClientError::Closed`]，
    /// 要么先挂接成功、随后随本次关闭一起结束。
    pub async fn close(&self) -> Result<(), ClientError> {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        info!(
            target: "reporting.client",
            live_streams = self.inner.multiplexer.active_streams(),
            "client_closing"
        );
        self.inner.multiplexer.close().await;
        self.inner.transport.close().await?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), ClientError> {
        if self.is_closed() {
            return Err(ClientError::Closed);
        }
        Ok(())
    }
}
