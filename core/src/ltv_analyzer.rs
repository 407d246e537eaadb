//! LTV estimator: closed-form and Monte Carlo customer lifetime value.
//!
//! Closed form: mean monthly revenue per customer × expected tenure, where
//! tenure comes from the average contract duration when the export has
//! contract end dates, else from the Kaplan–Meier survival median.
//!
//! Monte Carlo: each trial samples one customer's daily ARPU and, from an
//! independently sampled customer, a daily churn hazard; the simulated
//! customer survives day by day up to the lifetime cap. Reported value is
//! survival days × ARPU. Empty or zero-revenue inputs give zero LTV with a
//! degenerate interval.
//!
//! Survival: the Kaplan–Meier curve is also summarized at fixed horizons,
//! split by contract type and by product category, and category curves
//! are compared pairwise with a two-sample log-rank test. A third LTV
//! figure sums monthly ARPU weighted by the curve over two years.

use crate::{
    analyzer::{AnalysisContext, Analyzer},
    clock::RunClock,
    error::{AnalyticsError, AnalyticsResult},
    features::{CustomerFeatures, ProductCategory},
    rng::{AnalyzerRng, AnalyzerSlot},
    stats,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Trials between cancellation checks.
const CHECKPOINT_EVERY: usize = 100;
const CI_LOWER_QUANTILE: f64 = 0.025;
const CI_UPPER_QUANTILE: f64 = 0.975;
/// Days at which every survival summary reports S(t).
pub const SURVIVAL_HORIZONS: [u32; 3] = [30, 90, 180];
/// Groups this small get no curve and no log-rank comparison.
pub const MIN_SURVIVAL_GROUP: usize = 6;
const SURVIVAL_LTV_MONTHS: u32 = 24;
const LOG_RANK_ALPHA: f64 = 0.05;

// ── Public types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TenureSource {
    ContractDuration,
    SurvivalMedian,
    /// Survival never dropped to one half; the longest observed lifetime
    /// is used as a lower bound.
    ObservedMaximum,
    NoData,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClosedFormLtv {
    pub monthly_arpu:           f64,
    pub expected_tenure_months: f64,
    pub tenure_source:          TenureSource,
    pub ltv:                    f64,
    pub customers_used:         usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurvivalPoint {
    pub day:      f64,
    pub survival: f64,
    pub at_risk:  usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SurvivalSummary {
    pub customers:   usize,
    pub events:      usize,
    pub median_days: Option<f64>,
    /// S(t) keyed by horizon in days.
    pub survival_at: BTreeMap<u32, f64>,
}

/// Two-sample log-rank comparison between product categories.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogRankComparison {
    pub group_a:      ProductCategory,
    pub group_b:      ProductCategory,
    pub statistic:    f64,
    pub p_value:      f64,
    pub significant:  bool,
    /// (observed ÷ expected events in A) over the same for B.
    pub hazard_ratio: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MonteCarloLtv {
    pub iterations:               usize,
    pub customers_sampled:        usize,
    pub mean:                     f64,
    pub median:                   f64,
    pub std_dev:                  f64,
    pub standard_error:           f64,
    pub coefficient_of_variation: Option<f64>,
    pub ci_lower:                 f64,
    pub ci_upper:                 f64,
    pub mean_lifetime_days:       f64,
}

impl MonteCarloLtv {
    fn degenerate(iterations: usize, customers_sampled: usize) -> Self {
        Self {
            iterations,
            customers_sampled,
            mean: 0.0,
            median: 0.0,
            std_dev: 0.0,
            standard_error: 0.0,
            coefficient_of_variation: None,
            ci_lower: 0.0,
            ci_upper: 0.0,
            mean_lifetime_days: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LtvReport {
    /// Headline figure: the closed-form LTV.
    pub point_estimate:    f64,
    pub closed_form:       ClosedFormLtv,
    pub monte_carlo:       MonteCarloLtv,
    pub survival_curve:    Vec<SurvivalPoint>,
    pub survival:          SurvivalSummary,
    /// Monthly ARPU weighted by S(t) at each month start, over two years.
    pub survival_ltv:      f64,
    pub survival_by_contract_type: BTreeMap<String, SurvivalSummary>,
    pub survival_by_category:      BTreeMap<ProductCategory, SurvivalSummary>,
    pub category_log_rank:         Vec<LogRankComparison>,
    /// Monte Carlo mean per contract type.
    pub by_contract_type:  BTreeMap<String, f64>,
}

/// Empirical inputs for one customer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LifetimeProfile {
    pub daily_arpu:   f64,
    pub daily_hazard: f64,
}

// ── Analyzer ───────────────────────────────────────────────────────

pub struct LtvAnalyzer;

impl Analyzer for LtvAnalyzer {
    type Output = LtvReport;

    fn slot(&self) -> AnalyzerSlot {
        AnalyzerSlot::Ltv
    }

    fn analyze(&self, ctx: &AnalysisContext<'_>, rng: &mut AnalyzerRng) -> AnalyticsResult<LtvReport> {
        let customers = &ctx.features.customers;
        if customers.is_empty() {
            return Err(AnalyticsError::insufficient("ltv", "no customers"));
        }
        let settings = &ctx.config.ltv;
        let iterations = ctx.config.monte_carlo_iterations;
        let inactivity = ctx.config.inactivity_threshold_days;

        let survival_curve = kaplan_meier(customers, inactivity);
        let closed_form = closed_form_ltv(customers, &survival_curve, settings.days_per_month);
        let survival = summarize_survival(customers.iter(), inactivity);
        let survival_ltv = survival_weighted_ltv(&survival_curve, closed_form.monthly_arpu, settings.days_per_month);

        let mut contract_groups: BTreeMap<&str, Vec<&CustomerFeatures>> = BTreeMap::new();
        let mut category_groups: BTreeMap<ProductCategory, Vec<&CustomerFeatures>> = BTreeMap::new();
        for c in customers {
            contract_groups.entry(c.contract_type.as_str()).or_default().push(c);
            for category in &c.categories {
                category_groups.entry(*category).or_default().push(c);
            }
        }
        contract_groups.retain(|_, g| g.len() >= MIN_SURVIVAL_GROUP);
        category_groups.retain(|_, g| g.len() >= MIN_SURVIVAL_GROUP);
        let survival_by_contract_type = contract_groups
            .iter()
            .map(|(k, g)| (k.to_string(), summarize_survival(g.iter().copied(), inactivity)))
            .collect();
        let survival_by_category = category_groups
            .iter()
            .map(|(k, g)| (*k, summarize_survival(g.iter().copied(), inactivity)))
            .collect();
        let category_log_rank = compare_groups(&category_groups, inactivity);

        let profiles: Vec<LifetimeProfile> = customers.iter().filter_map(lifetime_profile).collect();
        let monte_carlo =
            simulate_ltv(&profiles, iterations, settings.max_lifetime_days, rng, ctx.clock)?;

        let mut by_type: BTreeMap<&str, Vec<LifetimeProfile>> = BTreeMap::new();
        for c in customers {
            if let Some(p) = lifetime_profile(c) {
                by_type.entry(c.contract_type.as_str()).or_default().push(p);
            }
        }
        let mut by_contract_type = BTreeMap::new();
        for (salt, (contract_type, group)) in by_type.into_iter().enumerate() {
            let mut child = rng.fork(salt as u64);
            let sim = simulate_ltv(&group, iterations, settings.max_lifetime_days, &mut child, ctx.clock)?;
            by_contract_type.insert(contract_type.to_string(), sim.mean);
        }

        log::info!(
            "ltv: survival median {:?} days, S(90) {:.3}, survival-weighted ltv {:.2}",
            survival.median_days,
            survival.survival_at.get(&90).copied().unwrap_or(1.0),
            survival_ltv
        );
        log::info!(
            "ltv: closed form {:.2} ({:?}), monte carlo mean {:.2} [{:.2}, {:.2}] over {} trials",
            closed_form.ltv,
            closed_form.tenure_source,
            monte_carlo.mean,
            monte_carlo.ci_lower,
            monte_carlo.ci_upper,
            monte_carlo.iterations
        );

        Ok(LtvReport {
            point_estimate: closed_form.ltv,
            closed_form,
            monte_carlo,
            survival_curve,
            survival,
            survival_ltv,
            survival_by_contract_type,
            survival_by_category,
            category_log_rank,
            by_contract_type,
        })
    }
}

// ── Closed form ────────────────────────────────────────────────────

/// Contract length in days, when the export has a positive one.
fn contract_days(c: &CustomerFeatures) -> Option<f64> {
    match (c.join_date, c.contract_end) {
        (Some(start), Some(end)) if end > start => Some((end - start).num_days() as f64),
        _ => None,
    }
}

/// Days the customer has been observed: contract length, else the span
/// of dated transactions.
fn lifetime_days(c: &CustomerFeatures) -> Option<f64> {
    contract_days(c).or_else(|| (c.tenure_days > 0).then_some(c.tenure_days as f64))
}

pub fn lifetime_profile(c: &CustomerFeatures) -> Option<LifetimeProfile> {
    let days = lifetime_days(c)?;
    Some(LifetimeProfile { daily_arpu: c.monetary / days, daily_hazard: 1.0 / days })
}

fn closed_form_ltv(customers: &[CustomerFeatures], curve: &[SurvivalPoint], days_per_month: f64) -> ClosedFormLtv {
    let monthly: Vec<f64> = customers
        .iter()
        .filter(|c| c.frequency > 0)
        .map(|c| c.monetary / (c.tenure_days as f64 / days_per_month).max(1.0))
        .collect();
    let monthly_arpu = stats::mean(&monthly).unwrap_or(0.0);

    let contracts: Vec<f64> = customers.iter().filter_map(contract_days).collect();
    let (tenure_days, tenure_source) = if let Some(avg) = stats::mean(&contracts) {
        (avg, TenureSource::ContractDuration)
    } else if let Some(median) = survival_median(curve) {
        (median, TenureSource::SurvivalMedian)
    } else if let Some(last) = curve.last() {
        (last.day, TenureSource::ObservedMaximum)
    } else {
        (0.0, TenureSource::NoData)
    };
    let expected_tenure_months = tenure_days / days_per_month;

    ClosedFormLtv {
        monthly_arpu,
        expected_tenure_months,
        tenure_source,
        ltv: (monthly_arpu * expected_tenure_months).max(0.0),
        customers_used: monthly.len(),
    }
}

/// (lifetime days, event observed) for every customer with dated
/// activity. A lifetime ends in an event when the customer is churned or
/// inactive beyond the threshold; everyone else is censored.
fn observations<'a>(
    customers: impl IntoIterator<Item = &'a CustomerFeatures>,
    inactivity_threshold_days: i64,
) -> Vec<(f64, bool)> {
    let mut obs: Vec<(f64, bool)> = customers
        .into_iter()
        .filter(|c| c.has_dated_activity())
        .map(|c| {
            let churned = c.status.is_churned()
                || c.recency_days.is_some_and(|r| r > inactivity_threshold_days);
            (lifetime_days(c).unwrap_or(0.0), churned)
        })
        .collect();
    obs.sort_by(|a, b| a.0.total_cmp(&b.0));
    obs
}

/// Kaplan–Meier estimate over observed lifetimes.
pub fn kaplan_meier(customers: &[CustomerFeatures], inactivity_threshold_days: i64) -> Vec<SurvivalPoint> {
    km_curve(&observations(customers, inactivity_threshold_days))
}

/// Product-limit estimator over observations sorted by time.
fn km_curve(observations: &[(f64, bool)]) -> Vec<SurvivalPoint> {
    let mut curve = Vec::new();
    let mut survival = 1.0;
    let mut at_risk = observations.len();
    let mut i = 0;
    while i < observations.len() {
        let day = observations[i].0;
        let mut events = 0;
        let mut leaving = 0;
        while i < observations.len() && observations[i].0 == day {
            if observations[i].1 {
                events += 1;
            }
            leaving += 1;
            i += 1;
        }
        if events > 0 && at_risk > 0 {
            survival *= 1.0 - events as f64 / at_risk as f64;
        }
        curve.push(SurvivalPoint { day, survival, at_risk });
        at_risk -= leaving;
    }
    curve
}

pub fn survival_median(curve: &[SurvivalPoint]) -> Option<f64> {
    curve.iter().find(|p| p.survival <= 0.5).map(|p| p.day)
}

/// Step-function lookup: S(t) of the last point at or before `day`, 1.0
/// before the first.
pub fn survival_at(curve: &[SurvivalPoint], day: f64) -> f64 {
    curve
        .iter()
        .take_while(|p| p.day <= day)
        .last()
        .map_or(1.0, |p| p.survival)
}

fn summarize_survival<'a>(
    customers: impl IntoIterator<Item = &'a CustomerFeatures>,
    inactivity_threshold_days: i64,
) -> SurvivalSummary {
    let obs = observations(customers, inactivity_threshold_days);
    let curve = km_curve(&obs);
    SurvivalSummary {
        customers: obs.len(),
        events: obs.iter().filter(|o| o.1).count(),
        median_days: survival_median(&curve),
        survival_at: SURVIVAL_HORIZONS
            .iter()
            .map(|h| (*h, survival_at(&curve, *h as f64)))
            .collect(),
    }
}

/// Σ over months m = 1..=24 of ARPU × S((m − 1) months).
pub fn survival_weighted_ltv(curve: &[SurvivalPoint], monthly_arpu: f64, days_per_month: f64) -> f64 {
    if curve.is_empty() {
        return 0.0;
    }
    (1..=SURVIVAL_LTV_MONTHS)
        .map(|m| monthly_arpu * survival_at(curve, (m - 1) as f64 * days_per_month))
        .sum::<f64>()
        .max(0.0)
}

/// Two-sample log-rank test. `None` when there is no variance (no events,
/// or every event at a time where one group is empty).
pub fn log_rank(a: &[(f64, bool)], b: &[(f64, bool)]) -> Option<(f64, f64, Option<f64>)> {
    let mut times: Vec<f64> = a.iter().chain(b).filter(|o| o.1).map(|o| o.0).collect();
    times.sort_by(|x, y| x.total_cmp(y));
    times.dedup();

    let (mut observed_a, mut expected_a, mut variance) = (0.0, 0.0, 0.0);
    let mut observed_b = 0.0;
    for t in times {
        let at_risk = |g: &[(f64, bool)]| g.iter().filter(|o| o.0 >= t).count() as f64;
        let deaths = |g: &[(f64, bool)]| g.iter().filter(|o| o.1 && o.0 == t).count() as f64;
        let (n_a, n_b) = (at_risk(a), at_risk(b));
        let (d_a, d_b) = (deaths(a), deaths(b));
        let (n, d) = (n_a + n_b, d_a + d_b);
        if n == 0.0 {
            continue;
        }
        observed_a += d_a;
        observed_b += d_b;
        expected_a += d * n_a / n;
        if n > 1.0 {
            variance += d * (n_a / n) * (n_b / n) * (n - d) / (n - 1.0);
        }
    }
    if variance <= 0.0 {
        return None;
    }
    let statistic = (observed_a - expected_a).powi(2) / variance;
    let expected_b = observed_a + observed_b - expected_a;
    let hazard_ratio = stats::ratio(observed_a, expected_a)
        .zip(stats::ratio(observed_b, expected_b))
        .and_then(|(ra, rb)| stats::ratio(ra, rb));
    Some((statistic, stats::chi_square_1df_p_value(statistic), hazard_ratio))
}

fn compare_groups(
    groups: &BTreeMap<ProductCategory, Vec<&CustomerFeatures>>,
    inactivity_threshold_days: i64,
) -> Vec<LogRankComparison> {
    let obs: Vec<(ProductCategory, Vec<(f64, bool)>)> = groups
        .iter()
        .map(|(k, g)| (*k, observations(g.iter().copied(), inactivity_threshold_days)))
        .collect();
    let mut out = Vec::new();
    for (i, (cat_a, a)) in obs.iter().enumerate() {
        for (cat_b, b) in &obs[i + 1..] {
            if let Some((statistic, p_value, hazard_ratio)) = log_rank(a, b) {
                out.push(LogRankComparison {
                    group_a: *cat_a,
                    group_b: *cat_b,
                    statistic,
                    p_value,
                    significant: p_value < LOG_RANK_ALPHA,
                    hazard_ratio,
                });
            }
        }
    }
    out
}

// ── Monte Carlo ────────────────────────────────────────────────────

/// Simulate `iterations` customer lifetimes from the empirical profiles.
pub fn simulate_ltv(
    profiles: &[LifetimeProfile],
    iterations: usize,
    max_lifetime_days: u32,
    rng: &mut AnalyzerRng,
    clock: &RunClock,
) -> AnalyticsResult<MonteCarloLtv> {
    if profiles.is_empty() || profiles.iter().all(|p| p.daily_arpu == 0.0) {
        return Ok(MonteCarloLtv::degenerate(iterations, profiles.len()));
    }

    let mut values = Vec::with_capacity(iterations);
    let mut lifetimes = Vec::with_capacity(iterations);
    for trial in 0..iterations {
        if trial % CHECKPOINT_EVERY == 0 {
            clock.checkpoint("ltv_monte_carlo")?;
        }
        let arpu = profiles[rng.index_below(profiles.len())].daily_arpu;
        let hazard = profiles[rng.index_below(profiles.len())].daily_hazard;

        let mut days: u32 = 0;
        while days < max_lifetime_days && !rng.chance(hazard) {
            days += 1;
        }
        lifetimes.push(days as f64);
        values.push(arpu * days as f64);
    }

    let sorted = stats::sorted(&values);
    let mean = stats::mean(&values).unwrap_or(0.0);
    let std_dev = stats::sample_std_dev(&values).unwrap_or(0.0);
    Ok(MonteCarloLtv {
        iterations,
        customers_sampled: profiles.len(),
        mean,
        median: stats::quantile_sorted(&sorted, 0.5).unwrap_or(0.0),
        std_dev,
        standard_error: std_dev / (iterations as f64).sqrt(),
        coefficient_of_variation: stats::ratio(std_dev, mean),
        ci_lower: stats::quantile_sorted(&sorted, CI_LOWER_QUANTILE).unwrap_or(0.0),
        ci_upper: stats::quantile_sorted(&sorted, CI_UPPER_QUANTILE).unwrap_or(0.0),
        mean_lifetime_days: stats::mean(&lifetimes).unwrap_or(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cohort(days: &[(f64, bool)]) -> Vec<(f64, bool)> {
        let mut v = days.to_vec();
        v.sort_by(|a, b| a.0.total_cmp(&b.0));
        v
    }

    #[test]
    fn km_steps_down_only_at_events() {
        let curve = km_curve(&cohort(&[(10.0, true), (20.0, false), (30.0, true), (40.0, true)]));
        assert_eq!(curve.len(), 4);
        assert!((curve[0].survival - 0.75).abs() < 1e-12);
        assert!((curve[1].survival - 0.75).abs() < 1e-12, "censoring keeps S(t) flat");
        assert!((curve[2].survival - 0.375).abs() < 1e-12);
        assert_eq!(curve[3].survival, 0.0);
        assert_eq!(survival_median(&curve), Some(30.0));
        assert_eq!(survival_at(&curve, 5.0), 1.0);
        assert!((survival_at(&curve, 25.0) - 0.75).abs() < 1e-12);
    }

    #[test]
    fn survival_ltv_is_arpu_times_curve_area() {
        assert_eq!(survival_weighted_ltv(&[], 100.0, 30.0), 0.0);
        // Nobody churns: 24 full months.
        let flat = km_curve(&cohort(&[(400.0, false), (800.0, false)]));
        assert!((survival_weighted_ltv(&flat, 100.0, 30.0) - 2400.0).abs() < 1e-9);
        // Everybody gone on day 45: months starting at 0 and 30 only.
        let short = km_curve(&cohort(&[(45.0, true), (45.0, true)]));
        assert!((survival_weighted_ltv(&short, 100.0, 30.0) - 200.0).abs() < 1e-9);
    }

    #[test]
    fn log_rank_separates_short_and_long_lifetimes() {
        let short: Vec<(f64, bool)> = (1..=10).map(|d| (d as f64 * 10.0, true)).collect();
        let long: Vec<(f64, bool)> = (1..=10).map(|d| (300.0 + d as f64 * 10.0, d % 2 == 0)).collect();
        let (statistic, p_value, hazard_ratio) = log_rank(&short, &long).expect("events on both sides");
        assert!(statistic > 10.0, "statistic {statistic}");
        assert!(p_value < 0.01, "p {p_value}");
        assert!(hazard_ratio.expect("both groups have events") > 1.0);

        let same = log_rank(&short, &short).expect("variance present");
        assert!(same.0.abs() < 1e-9);
        assert!((same.1 - 1.0).abs() < 1e-9);

        let censored: Vec<(f64, bool)> = short.iter().map(|o| (o.0, false)).collect();
        assert!(log_rank(&censored, &censored).is_none(), "no events, no test");
    }
}
