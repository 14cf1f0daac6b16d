use api_contract::{
    AggregatedMetricSample, ComponentData, ComponentState, ListMicrogridComponentsDataResponse,
    MetricSample, MetricSampleVariant, MicrogridData, ReceiveMicrogridComponentsDataStreamResponse,
    SimpleMetricSample, Timestamp,
};
use chrono::{DateTime, TimeZone, Utc};
use domain::{ComponentErrorCode, Metric, RecordData, RecordKind, SampleValue};
use reporting_normalize::{NormalizeError, flatten_page, flatten_update};

fn ts(offset: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + offset, 0).unwrap()
}

fn simple(offset: i64, metric: i32, value: f64) -> MetricSample {
    MetricSample {
        sampled_at: Some(Timestamp::from_datetime(ts(offset))),
        metric,
        sample: Some(MetricSampleVariant {
            simple_metric_sample: Some(SimpleMetricSample { value }),
            aggregated_metric_sample: None,
        }),
        bounds: Vec::new(),
    }
}

fn page(microgrids: Vec<MicrogridData>) -> ListMicrogridComponentsDataResponse {
    ListMicrogridComponentsDataResponse {
        microgrids,
        pagination_info: None,
    }
}

fn component(component_id: u64, samples: Vec<MetricSample>, states: Vec<ComponentState>) -> ComponentData {
    ComponentData {
        component_id,
        metric_samples: samples,
        states,
    }
}

#[test]
fn single_sample_becomes_one_record() {
    let response = page(vec![MicrogridData {
        microgrid_id: 10,
        components: vec![component(61, vec![simple(0, Metric::DcPower.code(), 5.0)], vec![])],
    }]);

    let records = flatten_page(&response).expect("flatten");

    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.microgrid_id, 10);
    assert_eq!(record.component_id, 61);
    assert_eq!(record.timestamp, ts(0));
    assert_eq!(record.kind(), RecordKind::Metric(Metric::DcPower));
    assert_eq!(record.value(), Some(&SampleValue::simple(5.0)));
}

#[test]
fn traversal_order_is_preserved() {
    let state = ComponentState {
        sampled_at: Some(Timestamp::from_datetime(ts(0))),
        states: vec![7],
        warnings: vec![],
        errors: vec![],
    };
    let response = page(vec![
        MicrogridData {
            microgrid_id: 2,
            components: vec![
                component(
                    9,
                    vec![simple(5, 3, 1.0), simple(1, 3, 2.0)],
                    vec![state.clone()],
                ),
                component(4, vec![simple(0, 3, 3.0)], vec![]),
            ],
        },
        MicrogridData {
            microgrid_id: 1,
            components: vec![component(1, vec![simple(0, 3, 4.0)], vec![])],
        },
    ]);

    let records = flatten_page(&response).expect("flatten");
    let order: Vec<(u64, u64, Option<f64>)> = records
        .iter()
        .map(|r| (r.microgrid_id, r.component_id, r.value().map(SampleValue::scalar)))
        .collect();

    assert_eq!(
        order,
        vec![
            (2, 9, Some(1.0)),
            (2, 9, Some(2.0)),
            (2, 9, None),
            (2, 4, Some(3.0)),
            (1, 1, Some(4.0)),
        ]
    );
}

#[test]
fn empty_containers_yield_no_records() {
    let response = page(vec![MicrogridData {
        microgrid_id: 10,
        components: vec![component(61, vec![], vec![])],
    }]);
    assert!(flatten_page(&response).expect("flatten").is_empty());
    assert!(flatten_page(&page(vec![])).expect("flatten").is_empty());
}

#[test]
fn duplicate_error_codes_are_collapsed() {
    let overvoltage = ComponentErrorCode::Overvoltage.code();
    let fuse = ComponentErrorCode::FuseError.code();
    let response = page(vec![MicrogridData {
        microgrid_id: 10,
        components: vec![component(
            61,
            vec![],
            vec![ComponentState {
                sampled_at: Some(Timestamp::from_datetime(ts(0))),
                states: vec![10],
                warnings: vec![],
                errors: vec![overvoltage, overvoltage, fuse],
            }],
        )],
    }]);

    let records = flatten_page(&response).expect("flatten");

    match &records[0].data {
        RecordData::State { errors, .. } => assert_eq!(
            errors,
            &vec![ComponentErrorCode::Overvoltage, ComponentErrorCode::FuseError]
        ),
        other => panic!("expected state record, got {other:?}"),
    }
}

#[test]
fn unknown_metric_code_becomes_unspecified() {
    let response = page(vec![MicrogridData {
        microgrid_id: 10,
        components: vec![component(61, vec![simple(0, 9999, 1.0)], vec![])],
    }]);

    let records = flatten_page(&response).expect("flatten");

    assert_eq!(records[0].metric(), Some(Metric::Unspecified));
}

#[test]
fn aggregated_sample_is_decoded() {
    let mut sample = simple(0, Metric::AcActivePower.code(), 0.0);
    sample.sample = Some(MetricSampleVariant {
        simple_metric_sample: None,
        aggregated_metric_sample: Some(AggregatedMetricSample {
            avg_value: 2.0,
            min_value: 1.0,
            max_value: 3.0,
            raw_values: vec![1.0, 2.0, 3.0],
        }),
    });
    let response = page(vec![MicrogridData {
        microgrid_id: 10,
        components: vec![component(61, vec![sample], vec![])],
    }]);

    let records = flatten_page(&response).expect("flatten");

    assert_eq!(records[0].value().map(SampleValue::scalar), Some(2.0));
}

#[test]
fn missing_timestamp_is_malformed() {
    let mut sample = simple(0, 3, 1.0);
    sample.sampled_at = None;
    let response = page(vec![MicrogridData {
        microgrid_id: 10,
        components: vec![component(61, vec![sample], vec![])],
    }]);

    let err = flatten_page(&response).expect_err("malformed");
    assert_eq!(
        err,
        NormalizeError::Malformed(
            "microgrid 10 component 61 sample 0: missing sampled_at".to_string()
        )
    );
}

#[test]
fn sample_with_both_variants_is_malformed() {
    let mut sample = simple(0, 3, 1.0);
    if let Some(variant) = sample.sample.as_mut() {
        variant.aggregated_metric_sample = Some(AggregatedMetricSample::default());
    }
    let response = page(vec![MicrogridData {
        microgrid_id: 10,
        components: vec![component(61, vec![sample], vec![])],
    }]);

    assert!(flatten_page(&response).is_err());
}

#[test]
fn update_without_component_data_is_malformed() {
    let update = ReceiveMicrogridComponentsDataStreamResponse {
        microgrid_id: 10,
        component_data: None,
    };
    assert!(flatten_update(&update).is_err());

    let update = ReceiveMicrogridComponentsDataStreamResponse {
        microgrid_id: 10,
        component_data: Some(component(61, vec![simple(0, 3, 1.0)], vec![])),
    };
    assert_eq!(flatten_update(&update).expect("flatten").len(), 1);
}
