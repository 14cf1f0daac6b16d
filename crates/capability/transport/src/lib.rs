//! 报表服务传输层抽象。
//!
//! 具体的 RPC 通道（连接、TLS、鉴权）不在本 crate 内实现；
//! 上层只依赖 [`ReportingTransport`]，测试使用 [`in_memory::InMemoryTransport`]。

use api_contract::{
    ListMicrogridComponentsDataRequest, ListMicrogridComponentsDataResponse,
    ReceiveMicrogridComponentsDataStreamRequest, ReceiveMicrogridComponentsDataStreamResponse,
};
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

pub mod in_memory;

/// 传输错误。
///
/// 可克隆：同一个网络流失败需要分发给所有订阅者。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),
    #[error("rpc status {code}: {message}")]
    Status { code: i32, message: String },
    #[error("transport closed")]
    Closed,
}

/// 服务端流：按到达顺序产出更新，`None` 表示服务端正常结束。
pub type ComponentDataStream =
    BoxStream<'static, Result<ReceiveMicrogridComponentsDataStreamResponse, TransportError>>;

/// 报表服务的两个 RPC。
#[async_trait]
pub trait ReportingTransport: Send + Sync {
    /// 拉取历史数据的一页。
    async fn list_microgrid_components_data(
        &self,
        request: ListMicrogridComponentsDataRequest,
    ) -> Result<ListMicrogridComponentsDataResponse, TransportError>;

    /// 打开实时流；丢弃返回的流即关闭网络流。
    async fn receive_microgrid_components_data_stream(
        &self,
        request: ReceiveMicrogridComponentsDataStreamRequest,
    ) -> Result<ComponentDataStream, TransportError>;

    /// 关闭底层通道。
    async fn close(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

/// 为分页请求与打开流加上超时的包装。
pub struct TimeoutTransport {
    inner: Arc<dyn ReportingTransport>,
    timeout: Duration,
}

impl TimeoutTransport {
    pub fn new(inner: Arc<dyn ReportingTransport>, timeout: Duration) -> Self {
        Self { inner, timeout }
    }
}

#[async_trait]
impl ReportingTransport for TimeoutTransport {
    async fn list_microgrid_components_data(
        &self,
        request: ListMicrogridComponentsDataRequest,
    ) -> Result<ListMicrogridComponentsDataResponse, TransportError> {
        match tokio::time::timeout(
            self.timeout,
            self.inner.list_microgrid_components_data(request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    target: "reporting.transport",
                    timeout_ms = self.timeout.as_millis() as u64,
                    "list_request_timed_out"
                );
                Err(TransportError::DeadlineExceeded(
                    "list_microgrid_components_data".to_string(),
                ))
            }
        }
    }

    async fn receive_microgrid_components_data_stream(
        &self,
        request: ReceiveMicrogridComponentsDataStreamRequest,
    ) -> Result<ComponentDataStream, TransportError> {
        match tokio::time::timeout(
            self.timeout,
            self.inner.receive_microgrid_components_data_stream(request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    target: "reporting.transport",
                    timeout_ms = self.timeout.as_millis() as u64,
                    "stream_open_timed_out"
                );
                Err(TransportError::DeadlineExceeded(
                    "receive_microgrid_components_data_stream".to_string(),
                ))
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.close().await
    }
}
