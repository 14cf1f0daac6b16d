//! 实时流复用。
//!
//! 同一个 [`RequestKey`] 在任一时刻最多对应一条网络流；
//! 多个订阅者挂在同一条流上，由该流唯一的分发任务按到达顺序扇出。
//!
//! ## 条目生命周期
//!
//! - `Opening`：分发任务正在打开网络流，此时已可挂接新的订阅者
//! - `Active`：分发任务在读取网络流并投递
//! - 移除：最后一个订阅者离开、网络流结束/失败或 `close_all`，在注册表锁内原子完成；
//!   之后相同 key 的订阅会打开一条新的网络流
//!
//! 注册表锁只用于查找/插入/删除，从不跨 `.await` 持有。

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use domain::{FlatRecord, RequestKey};
use parking_lot::Mutex;
use reporting_normalize::NormalizeError;
use reporting_telemetry::{
    record_consumers_attached, record_consumers_detached, record_consumers_lagged,
};
use reporting_transport::{ReportingTransport, TransportError};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

mod consumer;
mod dispatch;

pub use consumer::{ConsumerHandle, LiveStream};

pub use reporting_config::{DEFAULT_STREAM_BUFFER as DEFAULT_BUFFER_SIZE, MAX_STREAM_BUFFER};

/// 一条实时更新展平后的记录，在所有订阅者之间共享。
pub type Batch = Arc<[FlatRecord]>;

type Delivery = Result<Batch, LiveError>;

/// 实时订阅错误。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LiveError {
    #[error("live stream transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("live update invalid: {0}")]
    Malformed(#[from] NormalizeError),
    #[error("consumer fell behind and was disconnected")]
    Lagged,
    #[error("live streams closed")]
    Closed,
}

/// 订阅者缓冲区满时的处理方式。
///
/// 两种策略只能二选一：不丢记录，或者慢订阅者不拖累其他订阅者。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// 等待慢订阅者腾出空间后再读取下一条网络更新，不丢记录。
    ///
    /// 压力作用在整条网络流上：同一 key 的其他订阅者最多再收到自己缓冲区深度的批次，
    /// 之后与最慢的订阅者同速。一个挂接后从不读取的订阅者会让该 key 的投递无限期停住，
    /// 直到它被读取、取消订阅或被丢弃。不能接受这一点时使用 `DisconnectLagging`。
    #[default]
    Backpressure,
    /// 断开缓冲区满的订阅者（其收到 `LiveError::Lagged`），其他订阅者不受影响。
    DisconnectLagging,
}

/// 复用器参数。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultiplexerConfig {
    pub buffer_size: usize,
    pub overflow: OverflowPolicy,
}

impl Default for MultiplexerConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            overflow: OverflowPolicy::default(),
        }
    }
}

impl MultiplexerConfig {
    fn sanitized(mut self) -> Self {
        self.buffer_size = self.buffer_size.clamp(1, MAX_STREAM_BUFFER);
        self
    }
}

/// 条目状态。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Opening,
    Active,
}

struct ConsumerSlot {
    id: u64,
    sender: mpsc::Sender<Delivery>,
    /// 终止原因：通道关闭后由订阅者读取一次。
    terminal: Arc<Mutex<Option<LiveError>>>,
}

impl ConsumerSlot {
    fn terminate(self, reason: Option<LiveError>) {
        if let Some(reason) = reason {
            *self.terminal.lock() = Some(reason);
        }
    }
}

struct StreamEntry {
    id: u64,
    label: String,
    state: EntryState,
    consumers: Vec<ConsumerSlot>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl StreamEntry {
    /// 通知分发任务退出；订阅者通道随条目一起关闭。
    fn stop(mut self) -> Option<JoinHandle<()>> {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        self.consumers.clear();
        self.task.take()
    }
}

struct MultiplexerInner {
    transport: Arc<dyn ReportingTransport>,
    config: MultiplexerConfig,
    registry: Mutex<HashMap<RequestKey, StreamEntry>>,
    next_id: AtomicU64,
    closed: AtomicBool,
}

impl MultiplexerInner {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// 打开成功后切换为 Active；条目已不在（或已被替换）时返回 false。
    fn activate(&self, key: &RequestKey, entry_id: u64) -> bool {
        let mut registry = self.registry.lock();
        match registry.get_mut(key) {
            Some(entry) if entry.id == entry_id && !entry.consumers.is_empty() => {
                entry.state = EntryState::Active;
                true
            }
            _ => false,
        }
    }

    /// 快照当前订阅者的发送端。
    fn senders(&self, key: &RequestKey, entry_id: u64) -> Option<Vec<(u64, mpsc::Sender<Delivery>)>> {
        let registry = self.registry.lock();
        let entry = registry.get(key).filter(|entry| entry.id == entry_id)?;
        Some(
            entry
                .consumers
                .iter()
                .map(|slot| (slot.id, slot.sender.clone()))
                .collect(),
        )
    }

    /// 由分发任务移除自身条目，并以 `reason` 终止全部订阅者。
    fn remove_entry(&self, key: &RequestKey, entry_id: u64, reason: Option<LiveError>) {
        let entry = {
            let mut registry = self.registry.lock();
            match registry.get(key) {
                Some(entry) if entry.id == entry_id => registry.remove(key),
                _ => None,
            }
        };
        if let Some(mut entry) = entry {
            let consumers = std::mem::take(&mut entry.consumers);
            record_consumers_detached(consumers.len() as u64);
            for slot in consumers {
                slot.terminate(reason.clone());
            }
        }
    }

    /// 由分发任务断开部分订阅者；返回条目是否仍有订阅者。
    fn drop_consumers(
        &self,
        key: &RequestKey,
        entry_id: u64,
        ids: &[u64],
        reason: Option<LiveError>,
    ) -> bool {
        let mut registry = self.registry.lock();
        let Some(entry) = registry.get_mut(key).filter(|entry| entry.id == entry_id) else {
            return false;
        };
        let (dropped, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut entry.consumers)
            .into_iter()
            .partition(|slot| ids.contains(&slot.id));
        entry.consumers = kept;
        record_consumers_detached(dropped.len() as u64);
        if reason == Some(LiveError::Lagged) {
            record_consumers_lagged(dropped.len() as u64);
        }
        for slot in dropped {
            slot.terminate(reason.clone());
        }
        if entry.consumers.is_empty() {
            registry.remove(key);
            return false;
        }
        true
    }

    /// 订阅者离开；若为最后一个，移除条目并返回分发任务句柄。
    fn detach(&self, key: &RequestKey, consumer_id: u64) -> Option<JoinHandle<()>> {
        let entry = {
            let mut registry = self.registry.lock();
            let entry = registry.get_mut(key)?;
            let before = entry.consumers.len();
            entry.consumers.retain(|slot| slot.id != consumer_id);
            if entry.consumers.len() == before {
                return None;
            }
            record_consumers_detached(1);
            if !entry.consumers.is_empty() {
                return None;
            }
            registry.remove(key)?
        };
        debug!(
            target: "reporting.stream",
            stream_id = entry.id,
            key = %entry.label,
            "last_consumer_left"
        );
        entry.stop()
    }
}

/// 实时流复用器。
#[derive(Clone)]
pub struct StreamMultiplexer {
    inner: Arc<MultiplexerInner>,
}

impl StreamMultiplexer {
    pub fn new(transport: Arc<dyn ReportingTransport>, config: MultiplexerConfig) -> Self {
        Self {
            inner: Arc::new(MultiplexerInner {
                transport,
                config: config.sanitized(),
                registry: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> MultiplexerConfig {
        self.inner.config
    }

    /// 订阅 `key` 对应的实时流。
    ///
    /// 已有条目时直接挂接，不会打开新的网络流；否则创建条目并等待网络流打开，
    /// 打开失败时返回错误，同期挂接的其他订阅者收到同一错误后结束。
    pub async fn subscribe(&self, key: RequestKey) -> Result<ConsumerHandle, LiveError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(LiveError::Closed);
        }
        let (sender, receiver) = mpsc::channel(self.inner.config.buffer_size);
        let terminal = Arc::new(Mutex::new(None));
        let consumer_id = self.inner.next_id();
        let slot = ConsumerSlot {
            id: consumer_id,
            sender,
            terminal: terminal.clone(),
        };

        let opening = {
            let mut registry = self.inner.registry.lock();
            // close() 在同一把锁内置位，锁内复查保证关闭后不再插入条目
            if self.inner.closed.load(Ordering::Acquire) {
                return Err(LiveError::Closed);
            }
            match registry.get_mut(&key) {
                Some(entry) => {
                    entry.consumers.push(slot);
                    None
                }
                None => {
                    let entry_id = self.inner.next_id();
                    let (shutdown_tx, shutdown_rx) = oneshot::channel();
                    registry.insert(
                        key.clone(),
                        StreamEntry {
                            id: entry_id,
                            label: key.label(),
                            state: EntryState::Opening,
                            consumers: vec![slot],
                            shutdown: Some(shutdown_tx),
                            task: None,
                        },
                    );
                    Some((entry_id, shutdown_rx))
                }
            }
        };
        record_consumers_attached(1);
        debug!(
            target: "reporting.stream",
            consumer_id,
            key = %key.label(),
            new_stream = opening.is_some(),
            "consumer_attached"
        );
        let handle = ConsumerHandle::new(
            self.inner.clone(),
            key.clone(),
            consumer_id,
            receiver,
            terminal,
        );

        let Some((entry_id, shutdown_rx)) = opening else {
            return Ok(handle);
        };
        let (opened_tx, opened_rx) = oneshot::channel();
        let task = tokio::spawn(dispatch::run(
            self.inner.clone(),
            key.clone(),
            entry_id,
            opened_tx,
            shutdown_rx,
        ));
        {
            let mut registry = self.inner.registry.lock();
            if let Some(entry) = registry.get_mut(&key).filter(|entry| entry.id == entry_id) {
                entry.task = Some(task);
            }
        }

        match opened_rx.await {
            Ok(Ok(())) => Ok(handle),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(LiveError::Closed),
        }
    }

    /// 关闭全部网络流并等待分发任务退出；订阅者随后读到流结束。
    pub async fn close_all(&self) {
        self.shutdown(false).await;
    }

    /// 拒绝后续订阅并关闭全部网络流。
    pub async fn close(&self) {
        self.shutdown(true).await;
    }

    async fn shutdown(&self, reject_new: bool) {
        let entries: Vec<StreamEntry> = {
            let mut registry = self.inner.registry.lock();
            if reject_new {
                self.inner.closed.store(true, Ordering::Release);
            }
            registry.drain().map(|(_, entry)| entry).collect()
        };
        if !entries.is_empty() {
            info!(target: "reporting.stream", streams = entries.len(), "closing_all_streams");
        }
        let mut tasks = Vec::with_capacity(entries.len());
        for mut entry in entries {
            record_consumers_detached(entry.consumers.len() as u64);
            entry.consumers.clear();
            if let Some(task) = entry.stop() {
                tasks.push(task);
            }
        }
        for task in tasks {
            let _ = task.await;
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// 当前注册的条目数（含 Opening）。
    pub fn active_streams(&self) -> usize {
        self.inner.registry.lock().len()
    }

    pub fn consumer_count(&self, key: &RequestKey) -> usize {
        self.inner
            .registry
            .lock()
            .get(key)
            .map(|entry| entry.consumers.len())
            .unwrap_or(0)
    }

    pub fn state(&self, key: &RequestKey) -> Option<EntryState> {
        self.inner.registry.lock().get(key).map(|entry| entry.state)
    }
}
