//! 每个条目唯一的分发任务：打开网络流、读取更新、扇出给订阅者。

use std::sync::Arc;

use api_contract::ReceiveMicrogridComponentsDataStreamRequest;
use domain::RequestKey;
use futures_util::StreamExt;
use reporting_normalize::flatten_update;
use reporting_telemetry::{
    record_batches_delivered, record_stream_failures, record_streams_closed,
    record_streams_opened, record_updates_received,
};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::{Delivery, LiveError, MultiplexerInner, OverflowPolicy};

enum Flow {
    Continue,
    NoConsumers,
    Shutdown,
}

pub(crate) async fn run(
    inner: Arc<MultiplexerInner>,
    key: RequestKey,
    entry_id: u64,
    opened: oneshot::Sender<Result<(), LiveError>>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let label = key.label();
    let request = ReceiveMicrogridComponentsDataStreamRequest::from(&key);
    let open_result = tokio::select! {
        biased;
        _ = &mut shutdown => {
            debug!(target: "reporting.stream", stream_id = entry_id, key = %label, "open_cancelled");
            return;
        }
        result = inner.transport.receive_microgrid_components_data_stream(request) => result,
    };

    let mut stream = match open_result {
        Ok(stream) => stream,
        Err(err) => {
            record_stream_failures(1);
            warn!(
                target: "reporting.stream",
                stream_id = entry_id,
                key = %label,
                error = %err,
                "stream_open_failed"
            );
            let err = LiveError::Transport(err);
            inner.remove_entry(&key, entry_id, Some(err.clone()));
            let _ = opened.send(Err(err));
            return;
        }
    };

    if !inner.activate(&key, entry_id) {
        debug!(target: "reporting.stream", stream_id = entry_id, key = %label, "opened_without_consumers");
        drop(stream);
        let _ = opened.send(Err(LiveError::Closed));
        return;
    }
    record_streams_opened(1);
    info!(target: "reporting.stream", stream_id = entry_id, key = %label, "stream_opened");
    let _ = opened.send(Ok(()));

    let reason = loop {
        let item = tokio::select! {
            biased;
            _ = &mut shutdown => break "shutdown",
            item = stream.next() => item,
        };
        let update = match item {
            Some(Ok(update)) => update,
            Some(Err(err)) => {
                record_stream_failures(1);
                warn!(
                    target: "reporting.stream",
                    stream_id = entry_id,
                    key = %label,
                    error = %err,
                    "stream_failed"
                );
                inner.remove_entry(&key, entry_id, Some(LiveError::Transport(err)));
                break "transport_error";
            }
            None => {
                inner.remove_entry(&key, entry_id, None);
                break "server_closed";
            }
        };

        record_updates_received(1);
        let delivery: Delivery = match flatten_update(&update) {
            Ok(records) if records.is_empty() => continue,
            Ok(records) => Ok(records.into()),
            Err(err) => Err(LiveError::Malformed(err)),
        };
        match deliver(&inner, &key, entry_id, delivery, &mut shutdown).await {
            Flow::Continue => {}
            Flow::NoConsumers => break "no_consumers",
            Flow::Shutdown => break "shutdown",
        }
    };

    drop(stream);
    record_streams_closed(1);
    info!(
        target: "reporting.stream",
        stream_id = entry_id,
        key = %label,
        reason,
        "stream_closed"
    );
}

/// 把一批记录按到达顺序投递给当前全部订阅者。
async fn deliver(
    inner: &MultiplexerInner,
    key: &RequestKey,
    entry_id: u64,
    delivery: Delivery,
    shutdown: &mut oneshot::Receiver<()>,
) -> Flow {
    let Some(targets) = inner.senders(key, entry_id) else {
        return Flow::NoConsumers;
    };

    let mut closed = Vec::new();
    let mut lagging = Vec::new();
    let mut full = Vec::new();
    for (id, sender) in targets {
        match sender.try_send(delivery.clone()) {
            Ok(()) => record_batches_delivered(1),
            Err(TrySendError::Closed(_)) => closed.push(id),
            Err(TrySendError::Full(item)) => match inner.config.overflow {
                OverflowPolicy::Backpressure => full.push((id, sender, item)),
                OverflowPolicy::DisconnectLagging => lagging.push(id),
            },
        }
    }

    for (id, sender, item) in full {
        tokio::select! {
            biased;
            _ = &mut *shutdown => return Flow::Shutdown,
            result = sender.send(item) => match result {
                Ok(()) => record_batches_delivered(1),
                Err(_) => closed.push(id),
            },
        }
    }

    let mut has_consumers = true;
    if !lagging.is_empty() {
        warn!(
            target: "reporting.stream",
            stream_id = entry_id,
            consumers = lagging.len(),
            "lagging_consumers_disconnected"
        );
        has_consumers = inner.drop_consumers(key, entry_id, &lagging, Some(LiveError::Lagged));
    }
    if !closed.is_empty() {
        has_consumers = inner.drop_consumers(key, entry_id, &closed, None);
    }
    if has_consumers {
        Flow::Continue
    } else {
        Flow::NoConsumers
    }
}
