//! 追踪初始化、关联 ID 与进程级计数器。
//!
//! 计数器只做累加，`snapshot()` 读出当前值，不提供清零。
//! 测试中读取的是差值，因而可以与其它并发测试共存。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing_subscriber::{EnvFilter, fmt};

macro_rules! counters {
    ($( $(#[$doc:meta])* $field:ident => $record:ident ),+ $(,)?) => {
        /// 计数器快照。
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct MetricsSnapshot {
            $( pub $field: u64, )+
        }

        /// 报表客户端计数器。
        #[derive(Default)]
        pub struct TelemetryMetrics {
            $( $field: AtomicU64, )+
        }

        impl TelemetryMetrics {
            pub fn new() -> Self {
                Self::default()
            }

            pub fn snapshot(&self) -> MetricsSnapshot {
                MetricsSnapshot {
                    $( $field: self.$field.load(Ordering::Relaxed), )+
                }
            }
        }

        $(
            $(#[$doc])*
            pub fn $record(count: u64) {
                metrics().$field.fetch_add(count, Ordering::Relaxed);
            }
        )+
    };
}

counters! {
    /// 记录成功拉取的页数。
    pages_fetched => record_pages_fetched,
    /// 记录历史查询产出的记录数。
    history_records => record_history_records,
    /// 记录历史查询失败次数（传输或数据错误）。
    history_failures => record_history_failures,
    /// 记录打开的网络流数量。
    streams_opened => record_streams_opened,
    /// 记录关闭的网络流数量（正常结束、无订阅者或主动关闭）。
    streams_closed => record_streams_closed,
    /// 记录网络流打开失败或中途失败次数。
    stream_failures => record_stream_failures,
    /// 记录收到的实时更新条数。
    updates_received => record_updates_received,
    /// 记录投递给订阅者的批次数（每个订阅者各计一次）。
    batches_delivered => record_batches_delivered,
    consumers_attached => record_consumers_attached,
    consumers_detached => record_consumers_detached,
    /// 记录因缓冲区满被断开的订阅者数量。
    consumers_lagged => record_consumers_lagged,
    /// 记录解码为 Unspecified 的未知编码数量。
    unknown_codes => record_unknown_codes,
    /// 记录状态列表中被去重的编码数量。
    duplicate_codes => record_duplicate_codes,
    /// 记录结构不合法的响应数量。
    malformed_payloads => record_malformed_payloads,
}

static METRICS: OnceLock<TelemetryMetrics> = OnceLock::new();

/// 获取全局计数器实例。
pub fn metrics() -> &'static TelemetryMetrics {
    METRICS.get_or_init(TelemetryMetrics::new)
}

/// 初始化 tracing（默认 info）。
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

/// 生成新的关联 ID，用于串联一次历史查询或一条网络流的日志。
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}
