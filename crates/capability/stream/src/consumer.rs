use std::sync::Arc;

use domain::{FlatRecord, RequestKey};
use futures_util::StreamExt;
use futures_util::stream::{self, BoxStream};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::{Batch, Delivery, LiveError, MultiplexerInner};

/// 订阅者视角的记录流。
pub type LiveStream = BoxStream<'static, Result<FlatRecord, LiveError>>;

/// 一个实时订阅。
///
/// 依次产出记录；不可恢复的错误（网络失败、被判定为慢订阅者）之后产出 `None`。
/// `Err(LiveError::Malformed)` 不终止订阅。丢弃句柄等同于取消订阅。
pub struct ConsumerHandle {
    inner: Arc<MultiplexerInner>,
    key: RequestKey,
    id: u64,
    receiver: mpsc::Receiver<Delivery>,
    terminal: Arc<Mutex<Option<LiveError>>>,
    current: Option<(Batch, usize)>,
    finished: bool,
    detached: bool,
}

impl ConsumerHandle {
    pub(crate) fn new(
        inner: Arc<MultiplexerInner>,
        key: RequestKey,
        id: u64,
        receiver: mpsc::Receiver<Delivery>,
        terminal: Arc<Mutex<Option<LiveError>>>,
    ) -> Self {
        Self {
            inner,
            key,
            id,
            receiver,
            terminal,
            current: None,
            finished: false,
            detached: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn key(&self) -> &RequestKey {
        &self.key
    }

    /// 下一条记录；`None` 表示订阅已结束。
    pub async fn recv(&mut self) -> Option<Result<FlatRecord, LiveError>> {
        loop {
            if let Some((batch, index)) = self.current.as_mut() {
                if let Some(record) = batch.get(*index) {
                    *index += 1;
                    return Some(Ok(record.clone()));
                }
                self.current = None;
            }
            if self.finished {
                return None;
            }
            match self.receiver.recv().await {
                Some(Ok(batch)) => self.current = Some((batch, 0)),
                Some(Err(err)) => return Some(Err(err)),
                None => {
                    self.finished = true;
                    return self.terminal.lock().take().map(Err);
                }
            }
        }
    }

    /// 转为 `Stream`；流被丢弃时取消订阅。
    pub fn into_stream(self) -> LiveStream {
        stream::unfold(self, |mut handle| async move {
            handle.recv().await.map(|item| (item, handle))
        })
        .boxed()
    }

    /// 取消订阅；若是最后一个订阅者，等待网络流关闭后返回。
    pub async fn unsubscribe(mut self) {
        if let Some(task) = self.detach() {
            let _ = task.await;
        }
    }

    fn detach(&mut self) -> Option<JoinHandle<()>> {
        if self.detached {
            return None;
        }
        self.detached = true;
        self.inner.detach(&self.key, self.id)
    }
}

impl Drop for ConsumerHandle {
    fn drop(&mut self) {
        drop(self.detach());
    }
}
