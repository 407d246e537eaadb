//! Cooperative cancellation: a raised flag or an elapsed deadline turns
//! long-running sections into `cancelled` placeholders; the rest of the
//! report is still produced.

mod common;

use common::{init_logging, scenario_batch};
use memberlens_core::{
    clock::RunClock, error::UnavailableReason, AnalyticsConfig, AnalyticsEngine, AnalyticsRun,
};
use std::time::Duration;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn assert_cancelled_sections(run: &AnalyticsRun) {
    let report = &run.report;
    let cancelled = [
        ("cohort_retention", report.cohort_retention.reason()),
        ("churn_scores", report.churn_scores.reason()),
        ("ltv", report.ltv.reason()),
        ("segmentation", report.segmentation.reason()),
        ("time_series", report.time_series.reason()),
    ];
    for (name, reason) in cancelled {
        assert_eq!(reason, Some(UnavailableReason::Cancelled), "section {name}");
    }

    // Single-pass sections have no checkpoint and always finish.
    assert!(report.association_rules.is_available());
    assert!(report.financial_metrics.is_available());
    assert!(report.client_metrics.is_available());
    assert!(report.executive_summary.is_available());
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[test]
fn cancel_before_start_marks_long_sections_cancelled() {
    init_logging();
    let handle = RunClock::new_handle();
    handle.cancel();

    let run = AnalyticsEngine::new(AnalyticsConfig::default_test())
        .run_with_cancel(&scenario_batch(), &handle)
        .expect("cancellation is not a run failure");

    assert_cancelled_sections(&run);
    assert!(run.warnings.iter().any(|w| w.source == "ltv" && w.message.contains("Cancelled")));
}

#[test]
fn elapsed_deadline_behaves_like_cancel() {
    init_logging();
    let run = AnalyticsEngine::new(AnalyticsConfig::default_test())
        .run_with_timeout(&scenario_batch(), Duration::ZERO)
        .expect("timeout is not a run failure");

    assert_cancelled_sections(&run);
}

/// A generous deadline changes nothing.
#[test]
fn generous_deadline_completes_every_section() {
    init_logging();
    let mut config = AnalyticsConfig::default_test();
    config.timeout_ms = Some(600_000);
    let run = AnalyticsEngine::new(config).run(&scenario_batch()).expect("run");

    for (name, available) in run.report.section_status() {
        assert!(available, "section {name} unavailable");
    }
}
