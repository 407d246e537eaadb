//! Descriptive financial and client metrics.
//!
//! Financial metrics include a per-category product breakdown, the
//! contribution margin at the configured variable cost rate and, when
//! monthly fixed costs are configured, a break-even analysis.
//!
//! These are plain aggregations over the feature set; they need no RNG
//! and no cancellation points, so they are computed by the engine
//! directly rather than as analyzers.

use crate::{
    cohort_analyzer::{month_index, month_label},
    config::CostSettings,
    error::{AnalyticsError, AnalyticsResult},
    features::{EngineeredTransaction, FeatureSet, ProductCategory},
    stats,
    types::CustomerStatus,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

const UNASSIGNED_CONSULTANT: &str = "Unassigned";

// ── Financial ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinancialMetrics {
    pub total_net_revenue:          f64,
    pub total_gross_revenue:        f64,
    pub total_discount:             f64,
    pub transaction_count:          usize,
    pub average_ticket:             f64,
    pub revenue_by_payment_method:  BTreeMap<String, f64>,
    pub revenue_by_category:        BTreeMap<String, f64>,
    /// Over the span of dated transactions, gaps included.
    pub daily_average_revenue:      Option<f64>,
    pub daily_average_transactions: Option<f64>,
    pub monthly_revenue:            BTreeMap<String, f64>,
    pub mean_monthly_growth_pct:    Option<f64>,
    pub zero_value_share_pct:       f64,
    pub gympass_share_pct:          f64,
    pub trial_count:                usize,
    /// Trial customers who also bought a paid non-trial product.
    pub trial_conversion_pct:       Option<f64>,
    pub package_count:              usize,
    pub package_revenue:            f64,
    pub revenue_by_consultant:      BTreeMap<String, f64>,
    pub negative_revenue_count:     usize,
    /// Keyed by category label.
    pub product_performance:        BTreeMap<String, ProductPerformance>,
    pub contribution:               ContributionMargin,
    pub break_even:                 Option<BreakEven>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProductPerformance {
    pub revenue:             f64,
    pub transaction_count:   usize,
    pub customer_count:      usize,
    pub average_ticket:      f64,
    pub revenue_share_pct:   f64,
    pub contribution_margin: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContributionMargin {
    pub variable_cost_rate:  f64,
    pub variable_costs:      f64,
    pub contribution_margin: f64,
    pub margin_ratio_pct:    Option<f64>,
}

/// Monthly break-even against the configured fixed costs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BreakEven {
    pub monthly_fixed_costs:     f64,
    /// Fixed costs ÷ (1 − variable cost rate).
    pub break_even_revenue:      f64,
    /// Mean over months with dated revenue.
    pub average_monthly_revenue: f64,
    /// Share of average monthly revenue above break-even; negative below it.
    pub margin_of_safety_pct:    Option<f64>,
    /// Paying customers per month needed at the current monthly spend.
    pub break_even_customers:    Option<f64>,
    pub average_monthly_customers: f64,
    /// Monthly operating income at the average month.
    pub operating_income:        f64,
}

pub fn financial_metrics(features: &FeatureSet, costs: &CostSettings) -> AnalyticsResult<FinancialMetrics> {
    let txs = &features.transactions;
    if txs.is_empty() {
        return Err(AnalyticsError::insufficient("financial_metrics", "no transactions"));
    }
    let count = txs.len() as f64;
    let total_net_revenue: f64 = txs.iter().map(|t| t.net_revenue).sum();

    let mut revenue_by_payment_method = BTreeMap::new();
    let mut revenue_by_category = BTreeMap::new();
    let mut revenue_by_consultant = BTreeMap::new();
    for t in txs {
        *revenue_by_payment_method.entry(t.payment_method.label().to_string()).or_insert(0.0) += t.net_revenue;
        *revenue_by_category.entry(t.category.label().to_string()).or_insert(0.0) += t.net_revenue;
        let consultant = if t.consultant_id.is_empty() { UNASSIGNED_CONSULTANT } else { t.consultant_id.as_str() };
        *revenue_by_consultant.entry(consultant.to_string()).or_insert(0.0) += t.net_revenue;
    }

    let mut by_month: BTreeMap<i32, f64> = BTreeMap::new();
    let mut buyers_by_month: BTreeMap<i32, BTreeSet<&str>> = BTreeMap::new();
    let mut first = None;
    let mut last = None;
    for (t, d) in features.dated_transactions() {
        *by_month.entry(month_index(d)).or_insert(0.0) += t.net_revenue;
        buyers_by_month.entry(month_index(d)).or_default().insert(t.customer_id.as_str());
        first = Some(first.map_or(d, |f: chrono::NaiveDate| f.min(d)));
        last = Some(last.map_or(d, |l: chrono::NaiveDate| l.max(d)));
    }
    let span_days = match (first, last) {
        (Some(f), Some(l)) => Some(((l - f).num_days() + 1) as f64),
        _ => None,
    };
    let dated_count = features.dated_transactions().count() as f64;
    let dated_revenue: f64 = features.dated_transactions().map(|(t, _)| t.net_revenue).sum();

    let monthly: Vec<f64> = by_month.values().copied().collect();
    let growth: Vec<f64> = monthly
        .windows(2)
        .filter(|w| w[0] > 0.0)
        .filter_map(|w| stats::ratio((w[1] - w[0]) * 100.0, w[0]))
        .collect();

    let share = |n: usize| n as f64 * 100.0 / count;
    let packages: Vec<&EngineeredTransaction> = txs.iter().filter(|t| t.is_package).collect();

    let variable_costs = total_net_revenue * costs.variable_cost_rate;
    let contribution = ContributionMargin {
        variable_cost_rate: costs.variable_cost_rate,
        variable_costs,
        contribution_margin: total_net_revenue - variable_costs,
        margin_ratio_pct: stats::ratio((total_net_revenue - variable_costs) * 100.0, total_net_revenue),
    };
    let buyers: Vec<f64> = buyers_by_month.values().map(|b| b.len() as f64).collect();
    let break_even = costs
        .monthly_fixed_costs
        .map(|fixed| break_even(fixed, costs.variable_cost_rate, &monthly, &buyers));

    Ok(FinancialMetrics {
        total_net_revenue,
        total_gross_revenue: txs.iter().map(|t| t.gross_amount).sum(),
        total_discount: txs.iter().map(|t| t.discount).sum(),
        transaction_count: txs.len(),
        average_ticket: total_net_revenue / count,
        revenue_by_payment_method,
        revenue_by_category,
        daily_average_revenue: span_days.and_then(|d| stats::ratio(dated_revenue, d)),
        daily_average_transactions: span_days.and_then(|d| stats::ratio(dated_count, d)),
        monthly_revenue: by_month.into_iter().map(|(m, r)| (month_label(m), r)).collect(),
        mean_monthly_growth_pct: stats::mean(&growth),
        zero_value_share_pct: share(txs.iter().filter(|t| t.is_zero_value).count()),
        gympass_share_pct: share(txs.iter().filter(|t| t.category == ProductCategory::Gympass).count()),
        trial_count: txs.iter().filter(|t| t.is_trial).count(),
        trial_conversion_pct: trial_conversion(txs),
        package_count: packages.len(),
        package_revenue: packages.iter().map(|t| t.net_revenue).sum(),
        revenue_by_consultant,
        negative_revenue_count: txs.iter().filter(|t| t.is_negative).count(),
        product_performance: product_performance(txs, total_net_revenue, costs.variable_cost_rate),
        contribution,
        break_even,
    })
}

fn product_performance(
    txs: &[EngineeredTransaction],
    total_net_revenue: f64,
    variable_cost_rate: f64,
) -> BTreeMap<String, ProductPerformance> {
    let mut groups: BTreeMap<ProductCategory, (f64, usize, BTreeSet<&str>)> = BTreeMap::new();
    for t in txs {
        let entry = groups.entry(t.category).or_default();
        entry.0 += t.net_revenue;
        entry.1 += 1;
        entry.2.insert(t.customer_id.as_str());
    }
    groups
        .into_iter()
        .map(|(category, (revenue, n, customers))| {
            let perf = ProductPerformance {
                revenue,
                transaction_count: n,
                customer_count: customers.len(),
                average_ticket: revenue / n as f64,
                revenue_share_pct: stats::ratio(revenue * 100.0, total_net_revenue).unwrap_or(0.0),
                contribution_margin: revenue * (1.0 - variable_cost_rate),
            };
            (category.label().to_string(), perf)
        })
        .collect()
}

/// `monthly` and `buyers` hold revenue and distinct paying customers per
/// dated month.
fn break_even(fixed: f64, variable_cost_rate: f64, monthly: &[f64], buyers: &[f64]) -> BreakEven {
    let margin_rate = 1.0 - variable_cost_rate;
    let break_even_revenue = fixed / margin_rate;
    let average_monthly_revenue = stats::mean(monthly).unwrap_or(0.0);
    let average_monthly_customers = stats::mean(buyers).unwrap_or(0.0);
    let spend_per_customer = stats::ratio(average_monthly_revenue, average_monthly_customers);

    BreakEven {
        monthly_fixed_costs: fixed,
        break_even_revenue,
        average_monthly_revenue,
        margin_of_safety_pct: stats::ratio(
            (average_monthly_revenue - break_even_revenue) * 100.0,
            average_monthly_revenue,
        ),
        break_even_customers: spend_per_customer.and_then(|s| stats::ratio(fixed, s * margin_rate)),
        average_monthly_customers,
        operating_income: average_monthly_revenue * margin_rate - fixed,
    }
}

fn trial_conversion(txs: &[EngineeredTransaction]) -> Option<f64> {
    let trialists: BTreeSet<&str> = txs.iter().filter(|t| t.is_trial).map(|t| t.customer_id.as_str()).collect();
    let converted = txs
        .iter()
        .filter(|t| !t.is_trial && t.category != ProductCategory::Trial && t.gross_amount > 0.0)
        .map(|t| t.customer_id.as_str())
        .filter(|id| trialists.contains(id))
        .collect::<BTreeSet<_>>()
        .len();
    stats::ratio(converted as f64 * 100.0, trialists.len() as f64)
}

// ── Clients ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientMetrics {
    pub total_customers:             usize,
    pub status_counts:               BTreeMap<CustomerStatus, usize>,
    /// Active share of all customers.
    pub retention_rate_pct:          Option<f64>,
    /// By join date, else first transaction.
    pub new_customers_by_month:      BTreeMap<String, usize>,
    pub average_lifespan_days:       Option<f64>,
    pub mean_revenue_per_customer:   f64,
    pub median_revenue_per_customer: f64,
    /// Mean monthly revenue per customer × average lifespan in months.
    pub simple_clv:                  Option<f64>,
    pub average_purchases:           f64,
    pub churned_last_30_days:        usize,
    pub monthly_churn_rate_pct:      Option<f64>,
}

pub fn client_metrics(features: &FeatureSet, days_per_month: f64) -> AnalyticsResult<ClientMetrics> {
    let customers = &features.customers;
    if customers.is_empty() {
        return Err(AnalyticsError::insufficient("client_metrics", "no customers"));
    }

    let mut status_counts: BTreeMap<CustomerStatus, usize> = BTreeMap::new();
    let mut new_customers_by_month: BTreeMap<String, usize> = BTreeMap::new();
    for c in customers {
        *status_counts.entry(c.status).or_insert(0) += 1;
        if let Some(start) = c.join_date.or(c.first_transaction) {
            *new_customers_by_month.entry(month_label(month_index(start))).or_insert(0) += 1;
        }
    }
    let active = status_counts.get(&CustomerStatus::Active).copied().unwrap_or(0);

    let revenue: Vec<f64> = customers.iter().map(|c| c.monetary).collect();
    let lifespans: Vec<f64> = features.active_history().map(|c| c.tenure_days as f64).collect();
    let average_lifespan_days = stats::mean(&lifespans);
    let monthly_revenue: Vec<f64> = features
        .active_history()
        .map(|c| c.monetary / (c.tenure_days as f64 / days_per_month).max(1.0))
        .collect();
    let simple_clv = match (stats::mean(&monthly_revenue), average_lifespan_days) {
        (Some(m), Some(days)) => Some(m * (days / days_per_month).max(1.0)),
        _ => None,
    };

    // A churned customer counts as recent when their contract ended, or
    // their activity stopped, inside the window.
    let window_start = features.reference_date - Duration::days(features.recent_window_days);
    let churned_last_30_days = customers
        .iter()
        .filter(|c| c.status.is_churned())
        .filter(|c| {
            c.contract_end
                .or(c.last_transaction)
                .is_some_and(|d| d > window_start && d <= features.reference_date)
        })
        .count();

    Ok(ClientMetrics {
        total_customers: customers.len(),
        retention_rate_pct: stats::ratio(active as f64 * 100.0, customers.len() as f64),
        status_counts,
        new_customers_by_month,
        average_lifespan_days,
        mean_revenue_per_customer: stats::mean(&revenue).unwrap_or(0.0),
        median_revenue_per_customer: stats::median(&revenue).unwrap_or(0.0),
        simple_clv,
        average_purchases: stats::mean(&customers.iter().map(|c| c.frequency as f64).collect::<Vec<_>>())
            .unwrap_or(0.0),
        churned_last_30_days,
        monthly_churn_rate_pct: stats::ratio(
            churned_last_30_days as f64 * 100.0,
            (active + churned_last_30_days) as f64,
        ),
    })
}

/// Count of transactions per customer id; used by the data-quality summary.
pub fn transactions_per_customer(features: &FeatureSet) -> HashMap<&str, usize> {
    let mut counts = HashMap::new();
    for t in &features.transactions {
        *counts.entry(t.customer_id.as_str()).or_insert(0) += 1;
    }
    counts
}
