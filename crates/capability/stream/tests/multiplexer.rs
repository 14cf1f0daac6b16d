use std::sync::Arc;
use std::time::Duration;

use api_contract::ReceiveMicrogridComponentsDataStreamResponse;
use chrono::{DateTime, TimeZone, Utc};
use domain::{Metric, RequestKey, SampleValue, StreamFilter};
use futures_util::StreamExt;
use reporting_stream::{
    ConsumerHandle, EntryState, LiveError, MAX_STREAM_BUFFER, MultiplexerConfig, OverflowPolicy,
    StreamMultiplexer,
};
use reporting_transport::TransportError;
use reporting_transport::in_memory::{InMemoryTransport, sample_update};

fn ts(offset: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + offset, 0).unwrap()
}

fn key(component_ids: &[u64], metrics: &[Metric]) -> RequestKey {
    RequestKey::new(10, component_ids, metrics, StreamFilter::default())
}

fn update(value: f64) -> ReceiveMicrogridComponentsDataStreamResponse {
    sample_update(10, 61, ts(value as i64), Metric::DcPower, value)
}

fn setup(config: MultiplexerConfig) -> (Arc<InMemoryTransport>, StreamMultiplexer) {
    let transport = Arc::new(InMemoryTransport::new());
    let multiplexer = StreamMultiplexer::new(transport.clone(), config);
    (transport, multiplexer)
}

async fn next_value(handle: &mut ConsumerHandle) -> f64 {
    let record = tokio::time::timeout(Duration::from_secs(1), handle.recv())
        .await
        .expect("record in time")
        .expect("stream open")
        .expect("record");
    record.value().map(SampleValue::scalar).expect("metric record")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}

#[tokio::test]
async fn equal_keys_share_one_network_stream() {
    let (transport, multiplexer) = setup(MultiplexerConfig::default());

    let mut a = multiplexer
        .subscribe(key(&[61, 62], &[Metric::DcPower]))
        .await
        .expect("subscribe a");
    let mut b = multiplexer
        .subscribe(key(&[62, 61], &[Metric::DcPower]))
        .await
        .expect("subscribe b");

    assert_eq!(transport.streams_opened(), 1);
    assert_eq!(multiplexer.consumer_count(a.key()), 2);
    assert_eq!(multiplexer.state(a.key()), Some(EntryState::Active));

    assert!(transport.send_update(0, update(1.0)));
    assert!(transport.send_update(0, update(2.0)));

    assert_eq!(next_value(&mut a).await, 1.0);
    assert_eq!(next_value(&mut a).await, 2.0);
    assert_eq!(next_value(&mut b).await, 1.0);
    assert_eq!(next_value(&mut b).await, 2.0);
}

#[tokio::test]
async fn different_metric_list_opens_second_stream() {
    let (transport, multiplexer) = setup(MultiplexerConfig::default());

    let _a = multiplexer
        .subscribe(key(&[61], &[Metric::DcPower]))
        .await
        .expect("subscribe a");
    let _b = multiplexer
        .subscribe(key(&[61], &[Metric::DcPower, Metric::AcActivePower]))
        .await
        .expect("subscribe b");

    assert_eq!(transport.streams_opened(), 2);
    assert_eq!(multiplexer.active_streams(), 2);
    let request = transport.stream_request(1).expect("second request");
    assert_eq!(request.metrics, vec![3, 24]);
}

#[tokio::test]
async fn last_unsubscribe_closes_stream_and_next_subscribe_reopens() {
    let (transport, multiplexer) = setup(MultiplexerConfig::default());
    let stream_key = key(&[61], &[Metric::DcPower]);

    let a = multiplexer.subscribe(stream_key.clone()).await.expect("a");
    let b = multiplexer.subscribe(stream_key.clone()).await.expect("b");

    a.unsubscribe().await;
    assert_eq!(multiplexer.consumer_count(&stream_key), 1);
    assert!(!transport.is_stream_closed(0));

    b.unsubscribe().await;
    assert_eq!(multiplexer.active_streams(), 0);
    assert!(transport.is_stream_closed(0));

    let _c = multiplexer.subscribe(stream_key).await.expect("c");
    assert_eq!(transport.streams_opened(), 2);
}

#[tokio::test]
async fn dropping_handle_detaches_consumer() {
    let (transport, multiplexer) = setup(MultiplexerConfig::default());
    let stream_key = key(&[61], &[Metric::DcPower]);

    let handle = multiplexer.subscribe(stream_key.clone()).await.expect("subscribe");
    drop(handle);

    assert_eq!(multiplexer.active_streams(), 0);
    wait_until(|| transport.is_stream_closed(0)).await;
}

#[tokio::test]
async fn transport_failure_terminates_all_consumers() {
    let (transport, multiplexer) = setup(MultiplexerConfig::default());
    let stream_key = key(&[61], &[Metric::DcPower]);
    let mut a = multiplexer.subscribe(stream_key.clone()).await.expect("a");
    let mut b = multiplexer.subscribe(stream_key.clone()).await.expect("b");

    assert!(transport.send_update(0, update(1.0)));
    transport.fail_stream(0, TransportError::Connection("reset".to_string()));

    let expected = LiveError::Transport(TransportError::Connection("reset".to_string()));
    for handle in [&mut a, &mut b] {
        assert_eq!(next_value(handle).await, 1.0);
        assert_eq!(handle.recv().await, Some(Err(expected.clone())));
        assert_eq!(handle.recv().await, None);
    }
    assert_eq!(multiplexer.active_streams(), 0);
}

#[tokio::test]
async fn server_end_finishes_consumers() {
    let (transport, multiplexer) = setup(MultiplexerConfig::default());
    let mut handle = multiplexer
        .subscribe(key(&[61], &[Metric::DcPower]))
        .await
        .expect("subscribe");

    transport.end_stream(0);

    assert_eq!(handle.recv().await, None);
    assert_eq!(multiplexer.active_streams(), 0);
}

#[tokio::test]
async fn open_failure_is_returned_to_subscriber() {
    let (transport, multiplexer) = setup(MultiplexerConfig::default());
    let stream_key = key(&[61], &[Metric::DcPower]);
    transport.fail_next_stream_open(TransportError::Status {
        code: 14,
        message: "unavailable".to_string(),
    });

    let err = multiplexer
        .subscribe(stream_key.clone())
        .await
        .err()
        .expect("open failure");

    assert!(matches!(err, LiveError::Transport(TransportError::Status { code: 14, .. })));
    assert_eq!(multiplexer.active_streams(), 0);
    assert!(multiplexer.subscribe(stream_key).await.is_ok());
}

#[tokio::test]
async fn consumer_attached_while_opening_sees_open_failure() {
    let (transport, multiplexer) = setup(MultiplexerConfig::default());
    let stream_key = key(&[61], &[Metric::DcPower]);
    transport.set_open_delay(Duration::from_millis(50));
    transport.fail_next_stream_open(TransportError::Connection("refused".to_string()));

    let first = tokio::spawn({
        let multiplexer = multiplexer.clone();
        let stream_key = stream_key.clone();
        async move { multiplexer.subscribe(stream_key).await.map(|_| ()) }
    });
    wait_until(|| multiplexer.state(&stream_key) == Some(EntryState::Opening)).await;

    let mut second = multiplexer
        .subscribe(stream_key.clone())
        .await
        .expect("attach during opening");

    let expected = LiveError::Transport(TransportError::Connection("refused".to_string()));
    assert_eq!(first.await.expect("join"), Err(expected.clone()));
    assert_eq!(second.recv().await, Some(Err(expected)));
    assert_eq!(second.recv().await, None);
}

#[tokio::test]
async fn malformed_update_does_not_end_subscription() {
    let (transport, multiplexer) = setup(MultiplexerConfig::default());
    let mut handle = multiplexer
        .subscribe(key(&[61], &[Metric::DcPower]))
        .await
        .expect("subscribe");

    assert!(transport.send_update(
        0,
        ReceiveMicrogridComponentsDataStreamResponse {
            microgrid_id: 10,
            component_data: None,
        },
    ));
    assert!(transport.send_update(0, update(2.0)));

    assert!(matches!(handle.recv().await, Some(Err(LiveError::Malformed(_)))));
    assert_eq!(next_value(&mut handle).await, 2.0);
}

#[tokio::test]
async fn lagging_consumer_is_disconnected_without_affecting_others() {
    let (transport, multiplexer) = setup(MultiplexerConfig {
        buffer_size: 1,
        overflow: OverflowPolicy::DisconnectLagging,
    });
    let stream_key = key(&[61], &[Metric::DcPower]);
    let mut fast = multiplexer.subscribe(stream_key.clone()).await.expect("fast");
    let mut slow = multiplexer.subscribe(stream_key.clone()).await.expect("slow");

    assert!(transport.send_update(0, update(1.0)));
    assert_eq!(next_value(&mut fast).await, 1.0);
    assert!(transport.send_update(0, update(2.0)));
    assert_eq!(next_value(&mut fast).await, 2.0);

    assert_eq!(next_value(&mut slow).await, 1.0);
    assert_eq!(slow.recv().await, Some(Err(LiveError::Lagged)));
    assert_eq!(slow.recv().await, None);
    assert_eq!(multiplexer.consumer_count(&stream_key), 1);

    assert!(transport.send_update(0, update(3.0)));
    assert_eq!(next_value(&mut fast).await, 3.0);
}

#[tokio::test]
async fn backpressure_delivers_every_record_in_order() {
    let (transport, multiplexer) = setup(MultiplexerConfig {
        buffer_size: 1,
        overflow: OverflowPolicy::Backpressure,
    });
    let stream_key = key(&[61], &[Metric::DcPower]);
    let mut a = multiplexer.subscribe(stream_key.clone()).await.expect("a");
    let mut b = multiplexer.subscribe(stream_key.clone()).await.expect("b");

    for value in 1..=5 {
        assert!(transport.send_update(0, update(value as f64)));
    }

    for value in 1..=5 {
        assert_eq!(next_value(&mut a).await, value as f64);
        assert_eq!(next_value(&mut b).await, value as f64);
    }
    assert_eq!(multiplexer.consumer_count(&stream_key), 2);
}

#[tokio::test]
async fn close_all_ends_every_consumer() {
    let (transport, multiplexer) = setup(MultiplexerConfig::default());
    let a = multiplexer
        .subscribe(key(&[61], &[Metric::DcPower]))
        .await
        .expect("a");
    let mut b = multiplexer
        .subscribe(key(&[62], &[Metric::DcPower]))
        .await
        .expect("b");

    multiplexer.close_all().await;

    assert_eq!(multiplexer.active_streams(), 0);
    assert!(transport.is_stream_closed(0));
    assert!(transport.is_stream_closed(1));
    assert_eq!(b.recv().await, None);
    let rest: Vec<_> = a.into_stream().collect().await;
    assert!(rest.is_empty());
}

#[tokio::test]
async fn closed_multiplexer_rejects_subscriptions() {
    let (_transport, multiplexer) = setup(MultiplexerConfig::default());
    multiplexer.close().await;

    let err = multiplexer
        .subscribe(key(&[61], &[Metric::DcPower]))
        .await
        .err()
        .expect("closed");
    assert_eq!(err, LiveError::Closed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn subscriptions_racing_close_never_outlive_it() {
    for round in 0..200 {
        let (transport, multiplexer) = setup(MultiplexerConfig::default());
        let subscribers: Vec<_> = (0..4u64)
            .map(|i| {
                let multiplexer = multiplexer.clone();
                tokio::spawn(async move {
                    multiplexer
                        .subscribe(key(&[60 + i % 2], &[Metric::DcPower]))
                        .await
                })
            })
            .collect();
        let closer = tokio::spawn({
            let multiplexer = multiplexer.clone();
            async move { multiplexer.close().await }
        });

        closer.await.expect("close");
        for subscriber in subscribers {
            match subscriber.await.expect("join") {
                Ok(mut handle) => {
                    let end = tokio::time::timeout(Duration::from_secs(1), handle.recv())
                        .await
                        .expect("ended in time");
                    assert_eq!(end, None, "round {round}");
                }
                Err(err) => assert_eq!(err, LiveError::Closed, "round {round}"),
            }
        }

        assert_eq!(multiplexer.active_streams(), 0, "round {round}");
        assert!(
            multiplexer
                .subscribe(key(&[61], &[Metric::DcPower]))
                .await
                .is_err()
        );
        for index in 0..transport.streams_opened() {
            wait_until(|| transport.is_stream_closed(index)).await;
        }
    }
}

#[tokio::test]
async fn backpressure_holds_key_until_stalled_consumer_leaves() {
    let (transport, multiplexer) = setup(MultiplexerConfig {
        buffer_size: 1,
        overflow: OverflowPolicy::Backpressure,
    });
    let stream_key = key(&[61], &[Metric::DcPower]);
    let mut reader = multiplexer.subscribe(stream_key.clone()).await.expect("reader");
    let stalled = multiplexer.subscribe(stream_key.clone()).await.expect("stalled");

    for value in 1..=3 {
        assert!(transport.send_update(0, update(value as f64)));
    }
    assert_eq!(next_value(&mut reader).await, 1.0);
    assert_eq!(next_value(&mut reader).await, 2.0);
    assert!(
        tokio::time::timeout(Duration::from_millis(100), reader.recv())
            .await
            .is_err()
    );

    drop(stalled);
    assert_eq!(next_value(&mut reader).await, 3.0);
    assert_eq!(multiplexer.consumer_count(&stream_key), 1);
}

#[tokio::test]
async fn oversized_buffer_is_clamped() {
    let (_transport, multiplexer) = setup(MultiplexerConfig {
        buffer_size: usize::MAX,
        overflow: OverflowPolicy::Backpressure,
    });
    assert_eq!(multiplexer.config().buffer_size, MAX_STREAM_BUFFER);

    let handle = multiplexer
        .subscribe(key(&[61], &[Metric::DcPower]))
        .await
        .expect("subscribe");
    handle.unsubscribe().await;
}
