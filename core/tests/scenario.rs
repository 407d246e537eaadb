mod common;

use chrono::Duration;
use common::{customer, date, purchase, run_default, scenario_batch, weekly_purchases};
use memberlens_core::{
    churn_analyzer::{RiskTier, ScoringMode},
    features::ProductCategory,
    report::HealthClass,
    types::{CustomerStatus, NormalizedBatch},
};

// ── Helpers ──────────────────────────────────────────────────────────────────

fn share(matching: usize, total: usize) -> f64 {
    matching as f64 / total as f64
}

/// 20 package members active all half-year next to 20 Gympass members
/// who cancel after three weeks.
fn two_category_batch() -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    for i in 0..20 {
        let id = format!("P{i:03}");
        let start = date(2024, 1, 1) + Duration::days(i % 7);
        batch.customers.push(customer(&id, CustomerStatus::Active, start));
        batch.transactions.extend(weekly_purchases(&id, start, date(2024, 6, 28), "Pacote 10x"));
    }
    for i in 0..20 {
        let id = format!("G{i:03}");
        let start = date(2024, 1, 1) + Duration::days(i % 7);
        batch.customers.push(customer(&id, CustomerStatus::Cancelled, start));
        batch.transactions.extend(weekly_purchases(&id, start, start + Duration::days(21), "GYMPASS"));
    }
    batch
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// Cancelled members with no activity in 90+ days score High; weekly buyers
/// score Low. Both by a wide margin.
#[test]
fn churn_separates_active_from_cancelled() {
    let run = run_default(&scenario_batch());
    let churn = run.report.churn_scores.value().expect("churn section available");

    assert_eq!(churn.mode, ScoringMode::Classifier, "two label classes, classifier must train");
    assert_eq!(churn.scores.len(), 100);

    let cancelled: Vec<_> = churn.scores.iter().filter(|s| s.customer_id.starts_with('C')).collect();
    let active: Vec<_> = churn.scores.iter().filter(|s| s.customer_id.starts_with('A')).collect();
    let high = cancelled.iter().filter(|s| s.risk_tier == RiskTier::High).count();
    let low = active.iter().filter(|s| s.risk_tier == RiskTier::Low).count();

    assert!(share(high, cancelled.len()) > 0.9, "only {high}/50 cancelled members scored High");
    assert!(share(low, active.len()) > 0.9, "only {low}/50 active members scored Low");
    for s in &churn.scores {
        assert!((0.0..=1.0).contains(&s.probability), "probability {} out of [0,1]", s.probability);
    }
}

/// The classifier is scored on a seeded 25% holdout of each class before
/// it scores everybody; the separable scenario scores near perfectly.
#[test]
fn churn_holdout_metrics_are_reported() {
    let run = run_default(&scenario_batch());
    let churn = run.report.churn_scores.value().expect("churn section available");

    let eval = churn.evaluation.as_ref().expect("trained classifier is evaluated");
    assert_eq!(eval.test_size, 26, "13 of 50 from each class");
    assert_eq!(eval.train_size, 74);
    assert!(eval.accuracy > 0.9, "accuracy {}", eval.accuracy);
    assert!(eval.roc_auc.expect("both classes in the test set") > 0.9);
    assert!((0.0..=1.0).contains(&eval.f1_score));

    assert_eq!(churn.feature_importances.len(), 9);
    let total: f64 = churn.feature_importances.iter().map(|f| f.importance).sum();
    assert!((total - 1.0).abs() < 1e-9, "importances sum to {total}");
    for pair in churn.feature_importances.windows(2) {
        assert!(pair[0].importance >= pair[1].importance, "importances not sorted");
    }

    let medium = churn.scores.iter().filter(|s| s.probability > 0.4 && s.probability <= 0.7).count();
    assert_eq!(churn.medium_risk_count, medium);
    if churn.scores.iter().any(|s| s.probability > 0.8) {
        assert!(
            churn.critical_warning_signs.iter().any(|s| s.starts_with("Extended inactivity")),
            "signs: {:?}",
            churn.critical_warning_signs
        );
    }
}

/// Every cohort starts at exactly 100% retention.
#[test]
fn cohort_month_zero_is_full_retention() {
    let run = run_default(&scenario_batch());
    let cohorts = run.report.cohort_retention.value().expect("cohort section available");

    assert!(!cohorts.cohorts.is_empty());
    for c in &cohorts.cohorts {
        assert!(c.initial_size > 0);
        assert_eq!(c.retention_by_offset.get(&0), Some(&100.0), "cohort {} month 0", c.cohort_month);
    }
    assert_eq!(
        cohorts.cohorts.iter().map(|c| c.initial_size).sum::<usize>(),
        100,
        "every customer belongs to exactly one cohort"
    );
}

/// A member who skips a month counts again when they return, and no
/// offset exceeds the cohort size.
#[test]
fn cohort_retention_is_bounded_through_reactivation() {
    let mut batch = scenario_batch();
    for i in 0..10 {
        let id = format!("R{i:03}");
        batch.customers.push(customer(&id, CustomerStatus::Active, date(2023, 3, 1)));
        batch.transactions.push(purchase(&id, date(2023, 3, 5), 80.0, "Plano Mensal"));
        batch.transactions.push(purchase(&id, date(2023, 5, 5), 80.0, "Plano Mensal"));
    }
    let run = run_default(&batch);
    let cohorts = run.report.cohort_retention.value().expect("cohort section available");

    let march = cohorts.cohorts.iter().find(|c| c.cohort_month == "2023-03").expect("March 2023 cohort");
    assert_eq!(march.initial_size, 10);
    assert_eq!(march.retention_by_offset.get(&1).copied().unwrap_or(0.0), 0.0, "silent month");
    assert_eq!(march.retention_by_offset.get(&2), Some(&100.0), "everyone came back");
    for c in &cohorts.cohorts {
        for (offset, pct) in &c.retention_by_offset {
            assert!((0.0..=100.0).contains(pct), "cohort {} offset {offset}: {pct}%", c.cohort_month);
        }
    }
}

/// Positive revenue history gives a positive LTV from both estimators.
#[test]
fn ltv_point_estimate_is_positive() {
    let run = run_default(&scenario_batch());
    let ltv = run.report.ltv.value().expect("ltv section available");

    assert!(ltv.point_estimate > 0.0, "point estimate {}", ltv.point_estimate);
    assert!(ltv.monte_carlo.mean > 0.0);
    assert!(ltv.monte_carlo.ci_lower <= ltv.monte_carlo.mean && ltv.monte_carlo.mean <= ltv.monte_carlo.ci_upper);
    assert!(ltv.by_contract_type.contains_key("Monthly"));
}

/// Survival never rises with time, and the curve-weighted LTV stays within
/// two years of ARPU.
#[test]
fn survival_horizons_are_non_increasing() {
    let run = run_default(&scenario_batch());
    let ltv = run.report.ltv.value().expect("ltv section available");

    for pair in ltv.survival_curve.windows(2) {
        assert!(pair[1].survival <= pair[0].survival, "curve rose at day {}", pair[1].day);
        assert!(pair[1].day > pair[0].day);
    }
    let at = |d: u32| ltv.survival.survival_at[&d];
    assert!(at(30) >= at(90) && at(90) >= at(180), "S(30) {} S(90) {} S(180) {}", at(30), at(90), at(180));
    assert_eq!(ltv.survival.customers, 100);
    assert_eq!(ltv.survival.events, 50, "every cancelled member is an event");

    assert!(ltv.survival_ltv > 0.0);
    assert!(ltv.survival_ltv <= 24.0 * ltv.closed_form.monthly_arpu + 1e-9);
    assert!(ltv.survival_by_contract_type.contains_key("Monthly"));
    assert!(ltv.survival_by_category.contains_key(&ProductCategory::Other));
}

/// Categories with clearly different lifetimes are flagged by the log-rank
/// comparison.
#[test]
fn log_rank_flags_short_lived_category() {
    let run = run_default(&two_category_batch());
    let ltv = run.report.ltv.value().expect("ltv section available");

    let gympass = &ltv.survival_by_category[&ProductCategory::Gympass];
    let package = &ltv.survival_by_category[&ProductCategory::Package];
    assert_eq!(gympass.events, 20);
    assert_eq!(package.events, 0);
    assert!(gympass.survival_at[&90] < package.survival_at[&90]);

    assert_eq!(ltv.category_log_rank.len(), 1);
    let test = &ltv.category_log_rank[0];
    assert_eq!((test.group_a, test.group_b), (ProductCategory::Gympass, ProductCategory::Package));
    assert!(test.significant, "p = {} should be below 0.05", test.p_value);
}

/// Every section has enough data in the scenario; the summary reflects a
/// 50% churned base.
#[test]
fn every_section_is_available_and_summary_flags_churn() {
    let run = run_default(&scenario_batch());
    for (name, available) in run.report.section_status() {
        assert!(available, "section {name} unavailable: {:?}", run.warnings);
    }

    let clients = run.report.client_metrics.value().unwrap();
    assert_eq!(clients.status_counts.get(&CustomerStatus::Active), Some(&50));
    assert_eq!(clients.retention_rate_pct, Some(50.0));

    let financial = run.report.financial_metrics.value().unwrap();
    let expected_total = financial.transaction_count as f64 * common::WEEKLY_PRICE;
    assert!((financial.total_net_revenue - expected_total).abs() < 1e-6);

    let summary = run.report.executive_summary.value().unwrap();
    assert!((0.0..=100.0).contains(&summary.health_score));
    assert_ne!(summary.health_class, HealthClass::Excellent, "half the base churned");
    assert!(!summary.alerts.is_empty(), "high-risk customers must raise an alert");
}
