mod common;

use common::{init_logging, run_default};
use memberlens_core::{
    error::UnavailableReason,
    types::{CustomerStatus, NormalizedBatch},
    AnalyticsConfig, AnalyticsEngine, AnalyticsError,
};

// ── Tests ────────────────────────────────────────────────────────────────────

/// An empty batch is not an error: every section comes back unavailable
/// with a reason, and each one is reported as a warning.
#[test]
fn empty_batch_marks_every_section_unavailable() {
    let run = run_default(&NormalizedBatch::default());

    for (name, available) in run.report.section_status() {
        assert!(!available, "section {name} should be unavailable for an empty batch");
    }
    assert_eq!(run.report.churn_scores.reason(), Some(UnavailableReason::InsufficientData));
    assert_eq!(run.report.time_series.reason(), Some(UnavailableReason::InsufficientData));
    assert_eq!(run.warnings.len(), run.report.section_status().len());

    let json = serde_json::to_value(&run.report).unwrap();
    assert_eq!(json["ltv"]["status"], "unavailable");
    assert_eq!(json["ltv"]["value"]["reason"], "insufficient_data");
}

/// Customers without any transactions still get churn scores and client
/// metrics; history-based sections stay unavailable.
#[test]
fn customers_without_history_degrade_gracefully() {
    let mut batch = NormalizedBatch::default();
    for i in 0..5 {
        batch.customers.push(common::customer(
            &format!("N{i}"),
            if i % 2 == 0 { CustomerStatus::Active } else { CustomerStatus::Cancelled },
            common::date(2024, 1, 10),
        ));
    }
    let run = run_default(&batch);

    assert!(run.report.churn_scores.is_available());
    assert!(run.report.client_metrics.is_available());
    assert!(!run.report.cohort_retention.is_available());
    assert!(!run.report.segmentation.is_available());
    assert!(!run.report.financial_metrics.is_available());
    assert_eq!(run.report.data_quality.customers_without_transactions, 5);
}

/// Configuration errors are structural: the run aborts.
#[test]
fn invalid_config_is_fatal() {
    init_logging();
    let mut config = AnalyticsConfig::default_test();
    config.min_support = 1.5;

    let err = AnalyticsEngine::new(config).run(&NormalizedBatch::default()).unwrap_err();
    assert!(matches!(err, AnalyticsError::InvalidConfig(_)), "got {err:?}");
    assert!(err.is_fatal());
}

/// Outlier-detection and cost settings are checked before any work starts.
#[test]
fn neighbor_and_cost_settings_are_validated() {
    init_logging();
    let rejects = |edit: fn(&mut AnalyticsConfig)| {
        let mut config = AnalyticsConfig::default_test();
        edit(&mut config);
        matches!(
            AnalyticsEngine::new(config).run(&NormalizedBatch::default()),
            Err(AnalyticsError::InvalidConfig(_))
        )
    };

    assert!(rejects(|c| c.time_series.lof_neighbors = 0), "zero LOF neighbors");
    assert!(rejects(|c| c.time_series.lof_threshold = 0.0), "zero LOF threshold");
    assert!(rejects(|c| c.time_series.lof_threshold = f64::NAN), "NaN LOF threshold");
    assert!(rejects(|c| c.costs.variable_cost_rate = 1.0), "variable costs eat all revenue");
    assert!(rejects(|c| c.costs.monthly_fixed_costs = Some(-1.0)), "negative fixed costs");
    assert!(rejects(|c| c.churn.classifier.holdout_fraction = 0.0), "empty holdout");
    assert!(!rejects(|c| c.time_series.lof_neighbors = 1), "one neighbor is enough");
}
