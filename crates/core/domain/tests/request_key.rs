use domain::{FilterOption, IncludeOptions, Metric, RequestKey, StreamFilter};

#[test]
fn component_order_does_not_matter() {
    let a = RequestKey::new(10, &[61, 62], &[Metric::DcPower], StreamFilter::default());
    let b = RequestKey::new(10, &[62, 61, 61], &[Metric::DcPower], StreamFilter::default());

    assert_eq!(a, b);
    assert_eq!(a.component_ids(), &[61, 62]);
}

#[test]
fn metric_list_changes_identity() {
    let a = RequestKey::new(10, &[61], &[Metric::DcPower], StreamFilter::default());
    let b = RequestKey::new(
        10,
        &[61],
        &[Metric::DcPower, Metric::AcActivePower],
        StreamFilter::default(),
    );

    assert_ne!(a, b);
}

#[test]
fn filter_changes_identity() {
    let with_states = StreamFilter {
        include: IncludeOptions {
            states: Some(FilterOption::Include),
            ..IncludeOptions::default()
        },
        ..StreamFilter::default()
    };
    let a = RequestKey::new(10, &[61], &[Metric::DcPower], StreamFilter::default());
    let b = RequestKey::new(10, &[61], &[Metric::DcPower], with_states);

    assert_ne!(a, b);
    assert!(a.label().starts_with("mg10:"));
}
