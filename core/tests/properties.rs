//! Invariants that hold for any batch, checked on the shared scenarios.

mod common;

use chrono::Duration;
use common::{basket_batch, customer, date, run_default, scenario_batch, weekly_purchases};
use memberlens_core::{
    churn_analyzer::{ClassifierStatus, ScoringMode},
    segmentation_analyzer::RfmSegment,
    types::{CustomerStatus, NormalizedBatch},
};

// ── Tests ────────────────────────────────────────────────────────────────────

/// Lift is symmetric: A→B and B→A always report the same value.
#[test]
fn rule_lift_is_symmetric() {
    let run = run_default(&basket_batch());
    let rules = &run.report.association_rules.value().expect("association available").rules;
    assert!(!rules.is_empty(), "basket batch must produce rules");

    let mut pairs_checked = 0;
    for r in rules {
        if let Some(back) = rules.iter().find(|o| o.antecedent == r.consequent && o.consequent == r.antecedent) {
            assert!((r.lift - back.lift).abs() < 1e-12, "{:?}->{:?} lift {} vs {}", r.antecedent, r.consequent, r.lift, back.lift);
            assert_eq!(r.support, back.support);
            pairs_checked += 1;
        }
    }
    assert!(pairs_checked >= 2, "expected both directions of at least one pair");
}

/// trend + seasonal + residual reproduces every observation.
#[test]
fn decomposition_reconstructs_the_series() {
    let run = run_default(&scenario_batch());
    let ts = run.report.time_series.value().expect("time series available");

    assert_eq!(ts.decomposition.points.len(), ts.days);
    for p in &ts.decomposition.points {
        let rebuilt = p.trend + p.seasonal + p.residual;
        assert!((rebuilt - p.value).abs() < 1e-6, "{}: {rebuilt} vs {}", p.date, p.value);
    }
}

/// Composite RFM scores stay in 3..=12 and map to exactly one segment.
#[test]
fn rfm_composite_is_bounded_and_segmented() {
    let run = run_default(&scenario_batch());
    let rfm = &run.report.segmentation.value().expect("segmentation available").rfm;

    assert!(!rfm.scores.is_empty());
    for s in &rfm.scores {
        assert!((3..=12).contains(&s.composite), "{} composite {}", s.customer_id, s.composite);
        assert_eq!(s.composite, s.r_score + s.f_score + s.m_score);
        assert_eq!(s.segment, RfmSegment::from_composite(s.composite));
    }
    let summarized: usize = rfm.summaries.iter().map(|s| s.customers).sum();
    assert_eq!(summarized, rfm.scores.len(), "every scored customer is in one summary");
}

/// When nobody has churned there is nothing to learn from: the classifier
/// is skipped and the rule score is reported.
#[test]
fn single_class_labels_fall_back_to_rule_scores() {
    let mut batch = NormalizedBatch::default();
    for i in 0..10 {
        let id = format!("S{i:02}");
        let start = date(2024, 3, 1) + Duration::days(i % 7);
        batch.customers.push(customer(&id, CustomerStatus::Active, start));
        batch.transactions.extend(weekly_purchases(&id, start, date(2024, 6, 28), "Plano Mensal"));
    }
    let run = run_default(&batch);
    let churn = run.report.churn_scores.value().expect("churn available");

    assert!(churn.insufficient_class_diversity);
    assert_eq!(churn.classifier_status, ClassifierStatus::InsufficientClassDiversity);
    assert_eq!(churn.mode, ScoringMode::RuleBased);
    assert!(churn.model.is_none());
    for s in &churn.scores {
        assert_eq!(s.classifier_probability, 0.05);
        assert_eq!(s.probability, s.rule_probability);
        assert!((0.0..=1.0).contains(&s.probability));
    }
    assert!(
        run.warnings.iter().any(|w| w.source == "churn_scores"),
        "single-class fallback must be reported: {:?}",
        run.warnings
    );
}
