mod common;

use common::{basket_batch, run, run_default};
use memberlens_core::AnalyticsConfig;

// ── Helpers ──────────────────────────────────────────────────────────────────

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-6
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// The per-category breakdown partitions revenue and transactions.
#[test]
fn product_performance_partitions_revenue() {
    let run = run_default(&basket_batch());
    let financial = run.report.financial_metrics.value().expect("financial section available");

    let revenue: f64 = financial.product_performance.values().map(|p| p.revenue).sum();
    let count: usize = financial.product_performance.values().map(|p| p.transaction_count).sum();
    assert!(close(revenue, financial.total_net_revenue), "{revenue} vs {}", financial.total_net_revenue);
    assert_eq!(count, financial.transaction_count);

    let package = &financial.product_performance["Package"];
    assert_eq!(package.transaction_count, 20);
    assert_eq!(package.customer_count, 20);
    assert!(close(package.average_ticket, 400.0));
    assert!(close(package.contribution_margin, 8000.0 * 0.7));
    assert!(close(financial.contribution.contribution_margin, financial.total_net_revenue * 0.7));

    let shares: f64 = financial.product_performance.values().map(|p| p.revenue_share_pct).sum();
    assert!(close(shares, 100.0), "shares sum to {shares}");
    assert!(financial.break_even.is_none(), "no fixed costs configured");
}

/// One month of 9,800 revenue from 40 buyers against 7,000 of fixed costs
/// at a 30% variable rate falls just short of break-even.
#[test]
fn break_even_against_configured_fixed_costs() {
    let mut config = AnalyticsConfig::default_test();
    config.costs.monthly_fixed_costs = Some(7000.0);
    let run = run(&basket_batch(), config);
    let financial = run.report.financial_metrics.value().expect("financial section available");
    let be = financial.break_even.as_ref().expect("fixed costs configured");

    assert!(close(be.break_even_revenue, 10_000.0));
    assert!(close(be.average_monthly_revenue, 9800.0));
    assert!(close(be.average_monthly_customers, 40.0));
    assert!(close(be.operating_income, -140.0));
    assert!(be.margin_of_safety_pct.unwrap() < 0.0, "below break-even");
    assert!(close(be.break_even_customers.unwrap(), 7000.0 / (245.0 * 0.7)));

    let summary = run.report.executive_summary.value().expect("summary available");
    assert!(
        summary.alerts.iter().any(|a| a.contains("break-even")),
        "alerts: {:?}",
        summary.alerts
    );
}
