//! The merged report and the executive summary derived from it.
//!
//! The summary is pure composition over the analyzer sections: it never
//! recomputes anything, and every score it reports comes from a fixed,
//! named weight below.

use crate::{
    association_analyzer::AssociationReport,
    churn_analyzer::ChurnReport,
    cohort_analyzer::CohortReport,
    config::AnalyticsConfig,
    ltv_analyzer::LtvReport,
    metrics::{ClientMetrics, FinancialMetrics},
    section::Section,
    segmentation_analyzer::SegmentationReport,
    time_series_analyzer::TimeSeriesReport,
    types::{IssueKind, NormalizedBatch},
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ── Health weights ─────────────────────────────────────────────────

/// Score every component is measured against; also the health score of a
/// run with no usable component.
pub const BASE_HEALTH_SCORE: f64 = 50.0;
pub const RETENTION_WEIGHT: f64 = 0.35;
pub const CHURN_WEIGHT: f64 = 0.35;
pub const GROWTH_WEIGHT: f64 = 0.20;
pub const ENGAGEMENT_WEIGHT: f64 = 0.10;

const MAX_BUNDLE_RECOMMENDATIONS: usize = 3;
const AT_RISK_SEGMENT: &str = "At-Risk High-Value";

// ── Public types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataQualitySummary {
    pub customers:                      usize,
    pub transactions:                   usize,
    pub issues:                         usize,
    pub quarantined:                    usize,
    pub flagged:                        usize,
    pub by_kind:                        BTreeMap<IssueKind, usize>,
    pub customers_without_transactions: usize,
}

impl DataQualitySummary {
    pub fn from_batch(batch: &NormalizedBatch, customers_without_transactions: usize) -> Self {
        let mut by_kind = BTreeMap::new();
        for issue in &batch.issues {
            *by_kind.entry(issue.kind).or_insert(0) += 1;
        }
        let quarantined = batch.quarantined_count();
        Self {
            customers: batch.customers.len(),
            transactions: batch.transactions.len(),
            issues: batch.issues.len(),
            quarantined,
            flagged: batch.issues.len() - quarantined,
            by_kind,
            customers_without_transactions,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum HealthClass {
    Excellent,
    Good,
    Fair,
    Poor,
    Critical,
}

impl HealthClass {
    pub fn from_score(score: f64) -> Self {
        if score >= 80.0 {
            Self::Excellent
        } else if score >= 65.0 {
            Self::Good
        } else if score >= 50.0 {
            Self::Fair
        } else if score >= 35.0 {
            Self::Poor
        } else {
            Self::Critical
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HealthComponent {
    pub name:   String,
    /// 0–100.
    pub score:  f64,
    pub weight: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutiveSummary {
    pub health_score:        f64,
    pub health_class:        HealthClass,
    pub health_components:   Vec<HealthComponent>,
    pub risk_level:          RiskLevel,
    pub expected_churn_rate: Option<f64>,
    pub revenue_at_risk:     Option<f64>,
    pub total_net_revenue:   Option<f64>,
    pub active_customers:    Option<usize>,
    pub ltv_point_estimate:  Option<f64>,
    pub alerts:              Vec<String>,
    pub recommendations:     Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalyticsReport {
    pub reference_date:    NaiveDate,
    pub random_seed:       u64,
    pub data_quality:      DataQualitySummary,
    pub financial_metrics: Section<FinancialMetrics>,
    pub client_metrics:    Section<ClientMetrics>,
    pub churn_scores:      Section<ChurnReport>,
    pub ltv:               Section<LtvReport>,
    pub cohort_retention:  Section<CohortReport>,
    pub segmentation:      Section<SegmentationReport>,
    pub time_series:       Section<TimeSeriesReport>,
    pub association_rules: Section<AssociationReport>,
    pub executive_summary: Section<ExecutiveSummary>,
}

impl AnalyticsReport {
    /// (name, available) for every section, in report order.
    pub fn section_status(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("financial_metrics", self.financial_metrics.is_available()),
            ("client_metrics", self.client_metrics.is_available()),
            ("churn_scores", self.churn_scores.is_available()),
            ("ltv", self.ltv.is_available()),
            ("cohort_retention", self.cohort_retention.is_available()),
            ("segmentation", self.segmentation.is_available()),
            ("time_series", self.time_series.is_available()),
            ("association_rules", self.association_rules.is_available()),
            ("executive_summary", self.executive_summary.is_available()),
        ]
    }
}

/// Something a caller should know about, short of a fatal error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Warning {
    pub source:  String,
    pub message: String,
}

impl Warning {
    pub fn new(source: impl Into<String>, message: impl Into<String>) -> Self {
        Self { source: source.into(), message: message.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsRun {
    pub report:   AnalyticsReport,
    pub warnings: Vec<Warning>,
}

// ── Executive summary ──────────────────────────────────────────────

/// Borrowed view of every analyzer section, as the summary needs them.
pub struct SectionView<'a> {
    pub financial:    &'a Section<FinancialMetrics>,
    pub clients:      &'a Section<ClientMetrics>,
    pub churn:        &'a Section<ChurnReport>,
    pub ltv:          &'a Section<LtvReport>,
    pub cohorts:      &'a Section<CohortReport>,
    pub segmentation: &'a Section<SegmentationReport>,
    pub time_series:  &'a Section<TimeSeriesReport>,
    pub association:  &'a Section<AssociationReport>,
}

impl SectionView<'_> {
    fn any_available(&self) -> bool {
        self.financial.is_available()
            || self.clients.is_available()
            || self.churn.is_available()
            || self.ltv.is_available()
            || self.cohorts.is_available()
            || self.segmentation.is_available()
            || self.time_series.is_available()
            || self.association.is_available()
    }
}

/// Weighted health score: the base score moved by each available
/// component's distance from it, weights renormalized over what is
/// available.
pub fn health_score(components: &[HealthComponent]) -> f64 {
    let total_weight: f64 = components.iter().map(|c| c.weight).sum();
    if total_weight <= 0.0 {
        return BASE_HEALTH_SCORE;
    }
    let shift: f64 = components.iter().map(|c| c.weight * (c.score - BASE_HEALTH_SCORE)).sum::<f64>() / total_weight;
    (BASE_HEALTH_SCORE + shift).clamp(0.0, 100.0)
}

fn health_components(view: &SectionView<'_>) -> Vec<HealthComponent> {
    let mut components = Vec::new();
    let mut push = |name: &str, score: Option<f64>, weight: f64| {
        if let Some(score) = score.filter(|s| s.is_finite()) {
            components.push(HealthComponent { name: name.to_string(), score: score.clamp(0.0, 100.0), weight });
        }
    };
    push("retention", view.clients.value().and_then(|c| c.retention_rate_pct), RETENTION_WEIGHT);
    push("churn", view.churn.value().map(|c| (1.0 - c.expected_churn_rate) * 100.0), CHURN_WEIGHT);
    push(
        "growth",
        view.financial.value().and_then(|f| f.mean_monthly_growth_pct).map(|g| BASE_HEALTH_SCORE + g),
        GROWTH_WEIGHT,
    );
    push(
        "engagement",
        view.cohorts.value().and_then(|c| c.average_retention_by_offset.get(&1).copied()),
        ENGAGEMENT_WEIGHT,
    );
    components
}

fn risk_level(expected_churn_rate: Option<f64>, alarm: f64) -> RiskLevel {
    match expected_churn_rate {
        Some(rate) if rate >= alarm => RiskLevel::High,
        Some(rate) if rate >= alarm / 2.0 => RiskLevel::Medium,
        Some(_) => RiskLevel::Low,
        None => RiskLevel::Unknown,
    }
}

pub fn executive_summary(view: &SectionView<'_>, config: &AnalyticsConfig) -> Section<ExecutiveSummary> {
    if !view.any_available() {
        return Section::unavailable(
            crate::error::UnavailableReason::InsufficientData,
            "no analysis section could be computed",
        );
    }
    let thresholds = &config.churn;
    let components = health_components(view);
    let score = health_score(&components);
    let churn = view.churn.value();
    let expected_churn_rate = churn.map(|c| c.expected_churn_rate);

    let mut alerts = Vec::new();
    let mut recommendations = Vec::new();

    if let Some(c) = churn {
        if !c.high_risk_customers.is_empty() {
            alerts.push(format!(
                "{} customers above churn probability {:.2}",
                c.high_risk_customers.len(),
                thresholds.high_risk_probability
            ));
        }
        if c.expected_churn_rate >= thresholds.churn_rate_alarm {
            alerts.push(format!(
                "Expected churn rate {:.1}% exceeds the {:.1}% alarm",
                c.expected_churn_rate * 100.0,
                thresholds.churn_rate_alarm * 100.0
            ));
        }
        alerts.extend(c.critical_warning_signs.iter().map(|sign| format!("Critical-risk pattern: {sign}")));
        if c.expected_churn_rate > thresholds.retention_campaign_rate {
            recommendations.push(format!(
                "Launch a retention campaign for the {} high-risk customers ({:.2} revenue at risk)",
                c.high_risk_customers.len(),
                c.revenue_at_risk
            ));
        }
    }
    if let Some(growth) = view.financial.value().and_then(|f| f.mean_monthly_growth_pct) {
        if growth < 0.0 {
            alerts.push(format!("Revenue is shrinking {:.1}% month over month", -growth));
        }
    }
    if let Some(be) = view.financial.value().and_then(|f| f.break_even.as_ref()) {
        if be.operating_income < 0.0 {
            alerts.push(format!(
                "Average monthly revenue {:.2} is below the {:.2} break-even",
                be.average_monthly_revenue, be.break_even_revenue
            ));
        }
    }
    if let Some(ts) = view.time_series.value() {
        let n = ts.anomalies.residual_anomalies.len();
        if n > 0 {
            alerts.push(format!("{n} anomalous revenue days detected"));
            recommendations.push(format!(
                "Review the {n} anomalous days ({:.2} above and {:.2} below expectation)",
                ts.anomalies.total_positive_impact,
                ts.anomalies.total_negative_impact
            ));
        }
    }
    if let Some(assoc) = view.association.value() {
        recommendations.extend(
            assoc.bundles.iter().take(MAX_BUNDLE_RECOMMENDATIONS).map(|b| b.message.clone()),
        );
    }
    if let Some(seg) = view.segmentation.value() {
        if let Some(s) = seg.clustering.segments.iter().find(|s| s.label == AT_RISK_SEGMENT) {
            recommendations.push(format!(
                "Run a win-back offer for the {} {AT_RISK_SEGMENT} customers ({:.2} lifetime revenue)",
                s.size, s.total_revenue
            ));
        }
    }

    Section::Available(ExecutiveSummary {
        health_score: score,
        health_class: HealthClass::from_score(score),
        health_components: components,
        risk_level: risk_level(expected_churn_rate, thresholds.churn_rate_alarm),
        expected_churn_rate,
        revenue_at_risk: churn.map(|c| c.revenue_at_risk),
        total_net_revenue: view.financial.value().map(|f| f.total_net_revenue),
        active_customers: view
            .clients
            .value()
            .map(|c| c.status_counts.get(&crate::types::CustomerStatus::Active).copied().unwrap_or(0)),
        ltv_point_estimate: view.ltv.value().map(|l| l.point_estimate),
        alerts,
        recommendations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_classification_boundaries() {
        assert_eq!(HealthClass::from_score(80.0), HealthClass::Excellent);
        assert_eq!(HealthClass::from_score(79.9), HealthClass::Good);
        assert_eq!(HealthClass::from_score(65.0), HealthClass::Good);
        assert_eq!(HealthClass::from_score(50.0), HealthClass::Fair);
        assert_eq!(HealthClass::from_score(35.0), HealthClass::Poor);
        assert_eq!(HealthClass::from_score(10.0), HealthClass::Critical);
    }

    #[test]
    fn health_score_renormalizes_over_available_components() {
        assert_eq!(health_score(&[]), BASE_HEALTH_SCORE);
        let only_churn = [HealthComponent { name: "churn".into(), score: 90.0, weight: CHURN_WEIGHT }];
        assert!((health_score(&only_churn) - 90.0).abs() < 1e-9);
        let mixed = [
            HealthComponent { name: "retention".into(), score: 100.0, weight: 0.5 },
            HealthComponent { name: "churn".into(), score: 0.0, weight: 0.5 },
        ];
        assert!((health_score(&mixed) - 50.0).abs() < 1e-9);
    }
}
