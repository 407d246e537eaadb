//! Cohort & retention analyzer.
//!
//! A cohort is every customer whose first dated transaction falls in the
//! same calendar month. For each (cohort, offset) pair we count the cohort
//! members with a transaction in month cohort+offset and sum their net
//! revenue. Offset 0 is 100% by construction. Later offsets count a
//! subset of the same members, so retention stays within [0, 100]; a
//! member who returns after a silent month counts again in the month they
//! return.

use crate::{
    analyzer::{AnalysisContext, Analyzer},
    error::{AnalyticsError, AnalyticsResult},
    rng::{AnalyzerRng, AnalyzerSlot},
    stats,
};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Headline offsets reported separately.
const HEADLINE_OFFSETS: [u32; 4] = [1, 3, 6, 12];
/// Minimum (offset, retention) points for the decay fit.
const MIN_CURVE_POINTS: usize = 3;

// ── Public types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Cohort {
    /// "YYYY-MM".
    pub cohort_month:                String,
    pub initial_size:                usize,
    pub active_by_offset:            BTreeMap<u32, usize>,
    /// Percentage of `initial_size`.
    pub retention_by_offset:         BTreeMap<u32, f64>,
    pub revenue_by_offset:           BTreeMap<u32, f64>,
    /// Percentage of offset-0 revenue. Empty when offset-0 revenue is not
    /// positive.
    pub revenue_retention_by_offset: BTreeMap<u32, f64>,
    pub revenue_per_user_by_offset:  BTreeMap<u32, f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetentionCurveFit {
    /// Monthly exponential decay rate of average retention.
    pub decay_rate:        f64,
    pub half_life_months:  Option<f64>,
    pub r_squared:         f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CohortReport {
    pub cohorts:                     Vec<Cohort>,
    /// Mean across cohorts that have reached each offset.
    pub average_retention_by_offset: BTreeMap<u32, f64>,
    pub headline_retention:          BTreeMap<u32, f64>,
    pub curve_fit:                   Option<RetentionCurveFit>,
}

// ── Analyzer ───────────────────────────────────────────────────────

pub struct CohortAnalyzer;

impl Analyzer for CohortAnalyzer {
    type Output = CohortReport;

    fn slot(&self) -> AnalyzerSlot {
        AnalyzerSlot::Cohort
    }

    fn analyze(&self, ctx: &AnalysisContext<'_>, _rng: &mut AnalyzerRng) -> AnalyticsResult<CohortReport> {
        let mut activity: BTreeMap<&str, BTreeMap<i32, f64>> = BTreeMap::new();
        for (t, date) in ctx.features.dated_transactions() {
            *activity
                .entry(t.customer_id.as_str())
                .or_default()
                .entry(month_index(date))
                .or_insert(0.0) += t.net_revenue;
        }
        if activity.is_empty() {
            return Err(AnalyticsError::insufficient("cohort_retention", "no dated transactions"));
        }

        let last_month = activity
            .values()
            .filter_map(|months| months.keys().next_back().copied())
            .max()
            .unwrap_or_default();

        let mut members: BTreeMap<i32, Vec<&str>> = BTreeMap::new();
        for (customer, months) in &activity {
            if let Some(first) = months.keys().next().copied() {
                members.entry(first).or_default().push(*customer);
            }
        }

        let mut cohorts = Vec::with_capacity(members.len());
        for (cohort_month, ids) in &members {
            ctx.clock.checkpoint("cohort_retention")?;
            let max_offset = (last_month - cohort_month).max(0) as u32;
            cohorts.push(build_cohort(*cohort_month, ids, &activity, max_offset));
        }

        let average_retention_by_offset = average_by_offset(&cohorts);
        let headline_retention = HEADLINE_OFFSETS
            .iter()
            .filter_map(|o| average_retention_by_offset.get(o).map(|v| (*o, *v)))
            .collect();
        let curve_fit = fit_retention_curve(&average_retention_by_offset);

        log::info!(
            "cohort_retention: {} cohorts, month-1 average {:.1}%",
            cohorts.len(),
            average_retention_by_offset.get(&1).copied().unwrap_or(0.0)
        );

        Ok(CohortReport { cohorts, average_retention_by_offset, headline_retention, curve_fit })
    }
}

fn build_cohort(
    cohort_month: i32,
    ids: &[&str],
    activity: &BTreeMap<&str, BTreeMap<i32, f64>>,
    max_offset: u32,
) -> Cohort {
    let initial_size = ids.len();
    let mut active_by_offset = BTreeMap::new();
    let mut revenue_by_offset = BTreeMap::new();

    for offset in 0..=max_offset {
        let month = cohort_month + offset as i32;
        let mut active: BTreeSet<&str> = BTreeSet::new();
        let mut revenue = 0.0;
        for id in ids {
            if let Some(amount) = activity.get(id).and_then(|m| m.get(&month)) {
                active.insert(*id);
                revenue += amount;
            }
        }
        active_by_offset.insert(offset, active.len());
        revenue_by_offset.insert(offset, revenue);
    }

    let retention_by_offset = active_by_offset
        .iter()
        .filter_map(|(o, n)| stats::ratio(*n as f64 * 100.0, initial_size as f64).map(|r| (*o, r)))
        .collect();

    let base_revenue = revenue_by_offset.get(&0).copied().unwrap_or(0.0);
    let revenue_retention_by_offset = if base_revenue > 0.0 {
        revenue_by_offset
            .iter()
            .filter_map(|(o, r)| stats::ratio(r * 100.0, base_revenue).map(|v| (*o, v)))
            .collect()
    } else {
        BTreeMap::new()
    };
    let revenue_per_user_by_offset = revenue_by_offset
        .iter()
        .filter_map(|(o, r)| stats::ratio(*r, initial_size as f64).map(|v| (*o, v)))
        .collect();

    Cohort {
        cohort_month: month_label(cohort_month),
        initial_size,
        active_by_offset,
        retention_by_offset,
        revenue_by_offset,
        revenue_retention_by_offset,
        revenue_per_user_by_offset,
    }
}

fn average_by_offset(cohorts: &[Cohort]) -> BTreeMap<u32, f64> {
    let mut sums: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for c in cohorts {
        for (o, r) in &c.retention_by_offset {
            sums.entry(*o).or_default().push(*r);
        }
    }
    sums.into_iter()
        .filter_map(|(o, values)| stats::mean(&values).map(|m| (o, m)))
        .collect()
}

/// Fit ln(retention) = a − b·offset over the positive averages.
fn fit_retention_curve(average: &BTreeMap<u32, f64>) -> Option<RetentionCurveFit> {
    let (x, y): (Vec<f64>, Vec<f64>) = average
        .iter()
        .filter(|(_, r)| **r > 0.0)
        .map(|(o, r)| (*o as f64, (r / 100.0).ln()))
        .unzip();
    if x.len() < MIN_CURVE_POINTS {
        return None;
    }
    let fit = stats::linear_regression(&x, &y)?;
    let decay_rate = -fit.slope;
    let half_life_months = (decay_rate > 0.0).then(|| std::f64::consts::LN_2 / decay_rate);
    Some(RetentionCurveFit { decay_rate, half_life_months, r_squared: fit.r_squared })
}

/// Months since year 0, so consecutive months differ by one.
pub fn month_index(date: NaiveDate) -> i32 {
    date.year() * 12 + date.month0() as i32
}

pub fn month_label(index: i32) -> String {
    format!("{:04}-{:02}", index.div_euclid(12), index.rem_euclid(12) + 1)
}
