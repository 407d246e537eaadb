//! Churn risk scorer: rule-based and classifier-based churn probability.
//!
//! This analyzer:
//!   1. Computes a bounded rule score from recency, engagement decline and
//!      the customer's contract-type cancel rate
//!   2. Labels customers as churned (inactive beyond the threshold, or
//!      Cancelled/Blocked) and fits a logistic model on the same features
//!   3. Reports the classifier probability when a model could be trained,
//!      otherwise the rule score, with ranked feature contributions
//!   4. Evaluates the classifier on a seeded stratified holdout before
//!      refitting on every customer, and scans the critical-risk group
//!      for common warning signs
//!
//! Depends on: feature engineer only.

use crate::{
    analyzer::{AnalysisContext, Analyzer},
    clock::RunClock,
    config::{ChurnThresholds, ClassifierSettings, RiskTierBounds},
    error::{AnalyticsError, AnalyticsResult},
    features::CustomerFeatures,
    rng::{AnalyzerRng, AnalyzerSlot},
    stats::{self, StandardScaler},
    types::{CustomerId, CustomerStatus},
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Classifier inputs, in column order.
pub const FEATURE_NAMES: [&str; 9] = [
    "recency_days",
    "frequency",
    "monetary",
    "avg_ticket",
    "tenure_days",
    "recent_transactions",
    "engagement_ratio",
    "product_diversity",
    "contract_cancel_rate",
];

/// Gradient iterations between cancellation checks.
const CHECKPOINT_EVERY: usize = 100;
/// A warning sign is reported when more than this share of the critical
/// group shows it.
const ENGAGEMENT_SIGN_SHARE: f64 = 0.7;
const INACTIVITY_SIGN_SHARE: f64 = 0.6;
const SILENCE_SIGN_SHARE: f64 = 0.5;
const INACTIVITY_SIGN_DAYS: f64 = 14.0;

// ── Public types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RiskTier {
    Low,
    #[serde(rename = "Low-Medium")]
    LowMedium,
    Medium,
    High,
}

impl RiskTier {
    pub fn from_probability(p: f64, bounds: &RiskTierBounds) -> Self {
        if p >= bounds.high {
            Self::High
        } else if p >= bounds.medium {
            Self::Medium
        } else if p >= bounds.low_medium {
            Self::LowMedium
        } else {
            Self::Low
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScoringMode {
    Classifier,
    RuleBased,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierStatus {
    Trained,
    InsufficientClassDiversity,
    NonConvergent,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureContribution {
    pub feature:      String,
    pub value:        f64,
    /// Signed share of the score attributable to this feature (rule mode)
    /// or its logit contribution (classifier mode).
    pub contribution: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChurnScore {
    pub customer_id:            CustomerId,
    /// Reported probability, always in [0, 1].
    pub probability:            f64,
    pub risk_tier:              RiskTier,
    // Components
    pub rule_probability:       f64,
    pub classifier_probability: f64,
    pub recency_component:      f64,
    pub engagement_component:   f64,
    pub contract_component:     f64,
    // Context
    pub churn_label:            bool,
    pub primary_driver:         String,
    /// Sorted by absolute contribution, largest first.
    pub contributions:          Vec<FeatureContribution>,
}

/// Immutable logistic-regression parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LogisticModel {
    pub feature_names:     Vec<String>,
    pub scaler:            StandardScaler,
    pub weights:           Vec<f64>,
    pub bias:              f64,
    pub iterations:        usize,
    pub converged:         bool,
    pub training_accuracy: f64,
}

impl LogisticModel {
    pub fn predict_proba(&self, raw: &[f64]) -> f64 {
        let x = self.scaler.transform_row(raw);
        sigmoid(self.bias + dot(&self.weights, &x))
    }

    /// Per-feature logit contributions (weight × standardized value).
    pub fn contributions(&self, raw: &[f64]) -> Vec<f64> {
        let x = self.scaler.transform_row(raw);
        self.weights.iter().zip(&x).map(|(w, v)| w * v).collect()
    }
}

/// Classifier quality on customers it was not trained on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HoldoutEvaluation {
    pub train_size: usize,
    pub test_size:  usize,
    pub accuracy:   f64,
    pub precision:  f64,
    pub recall:     f64,
    pub f1_score:   f64,
    /// `None` when the test set holds a single class.
    pub roc_auc:    Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureImportance {
    pub feature:    String,
    /// |weight| share over all features; sums to 1.
    pub importance: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChurnReport {
    pub mode:                         ScoringMode,
    pub classifier_status:            ClassifierStatus,
    pub insufficient_class_diversity: bool,
    pub model:                        Option<LogisticModel>,
    pub evaluation:                   Option<HoldoutEvaluation>,
    /// Sorted by importance, largest first. Empty in rule mode.
    pub feature_importances:          Vec<FeatureImportance>,
    /// Sorted by probability, highest first.
    pub scores:                       Vec<ChurnScore>,
    pub tier_distribution:            BTreeMap<RiskTier, usize>,
    pub churn_label_rate:             f64,
    /// Mean reported probability.
    pub expected_churn_rate:          f64,
    pub high_risk_customers:          Vec<CustomerId>,
    /// Customers between the medium and high risk probabilities.
    pub medium_risk_count:            usize,
    pub critical_warning_signs:       Vec<String>,
    pub revenue_at_risk:              f64,
    pub contract_cancel_rates:        BTreeMap<String, f64>,
}

// ── Analyzer ───────────────────────────────────────────────────────

pub struct ChurnAnalyzer;

impl Analyzer for ChurnAnalyzer {
    type Output = ChurnReport;

    fn slot(&self) -> AnalyzerSlot {
        AnalyzerSlot::Churn
    }

    fn analyze(&self, ctx: &AnalysisContext<'_>, rng: &mut AnalyzerRng) -> AnalyticsResult<ChurnReport> {
        let customers = &ctx.features.customers;
        if customers.is_empty() {
            return Err(AnalyticsError::insufficient("churn_scores", "no customers"));
        }
        let thresholds = &ctx.config.churn;
        let inactivity = ctx.config.inactivity_threshold_days;

        let cancel_rates = contract_cancel_rates(customers);
        let rows: Vec<Vec<f64>> = customers
            .iter()
            .map(|c| feature_row(c, ctx.clock, inactivity, &cancel_rates))
            .collect();
        let labels: Vec<bool> = customers
            .iter()
            .zip(&rows)
            .map(|(c, row)| churn_label(c, row[0], inactivity))
            .collect();

        let positives = labels.iter().filter(|l| **l).count();
        let (classifier_status, model) = if positives == 0 || positives == labels.len() {
            log::warn!(
                "churn_scores: label set has a single class ({positives}/{} churned), skipping classifier",
                labels.len()
            );
            (ClassifierStatus::InsufficientClassDiversity, None)
        } else {
            match fit_logistic(&rows, &labels, &thresholds.classifier, ctx.clock) {
                Ok(model) => (ClassifierStatus::Trained, Some(model)),
                Err(AnalyticsError::NonConvergent { detail, .. }) => {
                    log::warn!("churn_scores: classifier failed ({detail}), using rule scores");
                    (ClassifierStatus::NonConvergent, None)
                }
                Err(other) => return Err(other),
            }
        };
        let mode = if model.is_some() { ScoringMode::Classifier } else { ScoringMode::RuleBased };
        let evaluation = if model.is_some() {
            evaluate_holdout(&rows, &labels, &thresholds.classifier, rng, ctx.clock)?
        } else {
            None
        };

        let mut scores: Vec<ChurnScore> = customers
            .iter()
            .zip(rows.iter().zip(&labels))
            .map(|(c, (row, label))| {
                score_customer(c, row, *label, inactivity, thresholds, model.as_ref())
            })
            .collect();
        scores.sort_by(|a, b| {
            b.probability
                .partial_cmp(&a.probability)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.customer_id.cmp(&b.customer_id))
        });

        let critical_warning_signs = warning_signs(customers, &rows, &scores, thresholds);
        let mut report = summarize(
            scores,
            customers,
            thresholds,
            mode,
            classifier_status,
            model,
            positives as f64 / labels.len() as f64,
            cancel_rates,
        );
        report.evaluation = evaluation;
        report.critical_warning_signs = critical_warning_signs;
        if let Some(e) = &report.evaluation {
            log::info!(
                "churn_scores: holdout of {} - accuracy {:.3}, precision {:.3}, recall {:.3}, auc {:?}",
                e.test_size,
                e.accuracy,
                e.precision,
                e.recall,
                e.roc_auc
            );
        }
        log::info!(
            "churn_scores: scored {} customers ({:?}), {} high risk, expected churn {:.1}%",
            report.scores.len(),
            report.mode,
            report.high_risk_customers.len(),
            report.expected_churn_rate * 100.0
        );
        Ok(report)
    }
}

// ── Features ───────────────────────────────────────────────────────

/// Share of each contract type's customers whose status is Cancelled.
pub fn contract_cancel_rates(customers: &[CustomerFeatures]) -> BTreeMap<String, f64> {
    let mut counts: BTreeMap<String, (usize, usize)> = BTreeMap::new();
    for c in customers {
        let entry = counts.entry(c.contract_type.clone()).or_insert((0, 0));
        entry.0 += 1;
        if c.status == CustomerStatus::Cancelled {
            entry.1 += 1;
        }
    }
    counts
        .into_iter()
        .map(|(k, (total, cancelled))| (k, stats::ratio(cancelled as f64, total as f64).unwrap_or(0.0)))
        .collect()
}

/// Days since last activity. Customers without dated transactions fall
/// back to their join date, then to twice the inactivity threshold.
fn effective_recency(c: &CustomerFeatures, clock: &RunClock, inactivity: i64) -> f64 {
    c.recency_days
        .or_else(|| c.join_date.map(|d| clock.days_since(d).max(0)))
        .unwrap_or(inactivity * 2) as f64
}

fn feature_row(
    c: &CustomerFeatures,
    clock: &RunClock,
    inactivity: i64,
    cancel_rates: &BTreeMap<String, f64>,
) -> Vec<f64> {
    vec![
        effective_recency(c, clock, inactivity),
        c.frequency as f64,
        c.monetary,
        c.avg_ticket,
        c.tenure_days as f64,
        c.recent_transactions as f64,
        c.engagement_ratio,
        c.product_diversity() as f64,
        cancel_rates.get(&c.contract_type).copied().unwrap_or(0.0),
    ]
}

fn churn_label(c: &CustomerFeatures, recency: f64, inactivity: i64) -> bool {
    recency > inactivity as f64 || c.status.is_churned()
}

// ── Scoring ────────────────────────────────────────────────────────

fn score_customer(
    c: &CustomerFeatures,
    row: &[f64],
    churn_label: bool,
    inactivity: i64,
    thresholds: &ChurnThresholds,
    model: Option<&LogisticModel>,
) -> ChurnScore {
    let w = &thresholds.weights;

    // Each component is bounded to [0, 1] before weighting.
    let recency_component = (row[0] / inactivity.max(1) as f64).clamp(0.0, 1.0);
    let engagement_component = if c.has_dated_activity() {
        1.0 - c.engagement_ratio.clamp(0.0, 1.0)
    } else {
        1.0
    };
    let contract_component = row[8].clamp(0.0, 1.0);

    let weight_sum = w.recency + w.engagement_decline + w.contract_cancel_rate;
    let weighted = [
        ("recency_days", row[0], w.recency * recency_component),
        ("engagement_ratio", c.engagement_ratio, w.engagement_decline * engagement_component),
        ("contract_cancel_rate", row[8], w.contract_cancel_rate * contract_component),
    ];
    let rule_probability = stats::ratio(weighted.iter().map(|(_, _, v)| v).sum::<f64>(), weight_sum)
        .unwrap_or(0.0)
        .clamp(0.0, 1.0);

    let (classifier_probability, mut contributions): (f64, Vec<FeatureContribution>) = match model {
        Some(m) => {
            let contributions = FEATURE_NAMES
                .iter()
                .zip(row.iter().zip(m.contributions(row)))
                .map(|(name, (value, contribution))| FeatureContribution {
                    feature: name.to_string(),
                    value: *value,
                    contribution,
                })
                .collect();
            (m.predict_proba(row).clamp(0.0, 1.0), contributions)
        }
        None => {
            let contributions = weighted
                .iter()
                .map(|(name, value, part)| FeatureContribution {
                    feature: name.to_string(),
                    value: *value,
                    contribution: stats::ratio(*part, weight_sum).unwrap_or(0.0),
                })
                .collect();
            (thresholds.classifier.constant_low_risk_probability, contributions)
        }
    };
    contributions.sort_by(|a, b| {
        b.contribution
            .abs()
            .partial_cmp(&a.contribution.abs())
            .unwrap_or(Ordering::Equal)
    });

    let probability = if model.is_some() { classifier_probability } else { rule_probability };
    let primary_driver = contributions
        .first()
        .map(|c| c.feature.clone())
        .unwrap_or_else(|| "none".into());

    ChurnScore {
        customer_id: c.customer_id.clone(),
        probability,
        risk_tier: RiskTier::from_probability(probability, &thresholds.tiers),
        rule_probability,
        classifier_probability,
        recency_component,
        engagement_component,
        contract_component,
        churn_label,
        primary_driver,
        contributions,
    }
}

#[allow(clippy::too_many_arguments)]
fn summarize(
    scores: Vec<ChurnScore>,
    customers: &[CustomerFeatures],
    thresholds: &ChurnThresholds,
    mode: ScoringMode,
    classifier_status: ClassifierStatus,
    model: Option<LogisticModel>,
    churn_label_rate: f64,
    contract_cancel_rates: BTreeMap<String, f64>,
) -> ChurnReport {
    let mut tier_distribution = BTreeMap::new();
    for s in &scores {
        *tier_distribution.entry(s.risk_tier).or_insert(0) += 1;
    }
    let probabilities: Vec<f64> = scores.iter().map(|s| s.probability).collect();
    let expected_churn_rate = stats::mean(&probabilities).unwrap_or(0.0);

    let high_risk_customers = scores
        .iter()
        .filter(|s| s.probability > thresholds.high_risk_probability)
        .map(|s| s.customer_id.clone())
        .collect();
    let medium_risk_count = scores
        .iter()
        .filter(|s| s.probability > thresholds.medium_risk_probability)
        .filter(|s| s.probability <= thresholds.high_risk_probability)
        .count();
    let feature_importances = model.as_ref().map(feature_importances).unwrap_or_default();

    let revenue_at_risk = scores
        .iter()
        .filter(|s| s.probability > thresholds.revenue_at_risk_probability)
        .filter_map(|s| {
            customers
                .binary_search_by(|c| c.customer_id.cmp(&s.customer_id))
                .ok()
                .map(|i| customers[i].monetary.max(0.0) * s.probability)
        })
        .sum();

    ChurnReport {
        mode,
        classifier_status,
        insufficient_class_diversity: classifier_status == ClassifierStatus::InsufficientClassDiversity,
        model,
        evaluation: None,
        feature_importances,
        scores,
        tier_distribution,
        churn_label_rate,
        expected_churn_rate,
        high_risk_customers,
        medium_risk_count,
        critical_warning_signs: Vec::new(),
        revenue_at_risk,
        contract_cancel_rates,
    }
}

/// Patterns shared by most customers above the critical probability.
/// `rows` and `customers` are in the same order.
fn warning_signs(
    customers: &[CustomerFeatures],
    rows: &[Vec<f64>],
    scores: &[ChurnScore],
    thresholds: &ChurnThresholds,
) -> Vec<String> {
    let critical: Vec<usize> = scores
        .iter()
        .filter(|s| s.probability > thresholds.critical_probability)
        .filter_map(|s| customers.binary_search_by(|c| c.customer_id.cmp(&s.customer_id)).ok())
        .collect();
    if critical.is_empty() {
        return Vec::new();
    }
    let share = |pred: &dyn Fn(usize) -> bool| {
        critical.iter().filter(|i| pred(**i)).count() as f64 / critical.len() as f64
    };

    let mut signs = Vec::new();
    if share(&|i: usize| customers[i].engagement_ratio < 0.5) > ENGAGEMENT_SIGN_SHARE {
        signs.push("Sharp decline in engagement (more than 50%)".to_string());
    }
    if share(&|i: usize| rows[i][0] > INACTIVITY_SIGN_DAYS) > INACTIVITY_SIGN_SHARE {
        signs.push(format!("Extended inactivity (more than {INACTIVITY_SIGN_DAYS} days)"));
    }
    if share(&|i: usize| customers[i].recent_transactions == 0) > SILENCE_SIGN_SHARE {
        signs.push(format!("No transactions in the last {} days", thresholds.recent_window_days));
    }
    signs
}

// ── Evaluation ─────────────────────────────────────────────────────

/// |weight| share per feature, largest first.
pub fn feature_importances(model: &LogisticModel) -> Vec<FeatureImportance> {
    let total: f64 = model.weights.iter().map(|w| w.abs()).sum();
    let mut out: Vec<FeatureImportance> = model
        .feature_names
        .iter()
        .zip(&model.weights)
        .map(|(name, w)| FeatureImportance {
            feature: name.clone(),
            importance: stats::ratio(w.abs(), total).unwrap_or(0.0),
        })
        .collect();
    out.sort_by(|a, b| b.importance.total_cmp(&a.importance).then_with(|| a.feature.cmp(&b.feature)));
    out
}

/// Split row indices into (train, test), holding out `fraction` of each
/// label class. `None` when a class has fewer than two members.
pub fn stratified_split(labels: &[bool], fraction: f64, rng: &mut AnalyzerRng) -> Option<(Vec<usize>, Vec<usize>)> {
    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in [false, true] {
        let mut idx: Vec<usize> = (0..labels.len()).filter(|i| labels[*i] == class).collect();
        if idx.len() < 2 {
            return None;
        }
        // Fisher–Yates
        for i in (1..idx.len()).rev() {
            let j = rng.index_below(i + 1);
            idx.swap(i, j);
        }
        let held = ((idx.len() as f64 * fraction).ceil() as usize).clamp(1, idx.len() - 1);
        test.extend_from_slice(&idx[..held]);
        train.extend_from_slice(&idx[held..]);
    }
    train.sort_unstable();
    test.sort_unstable();
    Some((train, test))
}

/// Area under the ROC curve via the rank-sum statistic, ties averaged.
pub fn roc_auc(probabilities: &[f64], labels: &[bool]) -> Option<f64> {
    let positives = labels.iter().filter(|l| **l).count();
    let negatives = labels.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }
    let mut order: Vec<usize> = (0..probabilities.len()).collect();
    order.sort_by(|a, b| probabilities[*a].total_cmp(&probabilities[*b]));

    let mut rank_sum = 0.0;
    let mut i = 0;
    while i < order.len() {
        let mut j = i;
        while j + 1 < order.len() && probabilities[order[j + 1]] == probabilities[order[i]] {
            j += 1;
        }
        let avg_rank = (i + j) as f64 / 2.0 + 1.0;
        rank_sum += (i..=j).filter(|k| labels[order[*k]]).count() as f64 * avg_rank;
        i = j + 1;
    }
    let p = positives as f64;
    Some((rank_sum - p * (p + 1.0) / 2.0) / (p * negatives as f64))
}

fn evaluate_holdout(
    rows: &[Vec<f64>],
    labels: &[bool],
    settings: &ClassifierSettings,
    rng: &mut AnalyzerRng,
    clock: &RunClock,
) -> AnalyticsResult<Option<HoldoutEvaluation>> {
    let Some((train, test)) = stratified_split(labels, settings.holdout_fraction, rng) else {
        log::warn!("churn_scores: a label class has fewer than two members, holdout skipped");
        return Ok(None);
    };
    let pick_rows = |idx: &[usize]| idx.iter().map(|i| rows[*i].clone()).collect::<Vec<_>>();
    let pick_labels = |idx: &[usize]| idx.iter().map(|i| labels[*i]).collect::<Vec<_>>();

    let model = match fit_logistic(&pick_rows(&train), &pick_labels(&train), settings, clock) {
        Ok(m) => m,
        Err(e @ AnalyticsError::Cancelled { .. }) => return Err(e),
        Err(e) => {
            log::warn!("churn_scores: holdout model failed ({e}), evaluation skipped");
            return Ok(None);
        }
    };

    let truth = pick_labels(&test);
    let probabilities: Vec<f64> = test.iter().map(|i| model.predict_proba(&rows[*i])).collect();
    let predicted: Vec<bool> = probabilities.iter().map(|p| *p >= 0.5).collect();
    let count = |want_pred: bool, want_truth: bool| {
        predicted
            .iter()
            .zip(&truth)
            .filter(|(p, t)| **p == want_pred && **t == want_truth)
            .count() as f64
    };
    let (tp, fp, fn_) = (count(true, true), count(true, false), count(false, true));
    let tn = count(false, false);

    let precision = stats::ratio(tp, tp + fp).unwrap_or(0.0);
    let recall = stats::ratio(tp, tp + fn_).unwrap_or(0.0);
    Ok(Some(HoldoutEvaluation {
        train_size: train.len(),
        test_size: test.len(),
        accuracy: (tp + tn) / test.len() as f64,
        precision,
        recall,
        f1_score: stats::ratio(2.0 * precision * recall, precision + recall).unwrap_or(0.0),
        roc_auc: roc_auc(&probabilities, &truth),
    }))
}

// ── Logistic regression ────────────────────────────────────────────

fn sigmoid(z: f64) -> f64 {
    if z >= 0.0 {
        1.0 / (1.0 + (-z).exp())
    } else {
        let e = z.exp();
        e / (1.0 + e)
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

/// Fit a class-balanced, L2-regularized logistic regression by batch
/// gradient descent on standardized features.
///
/// Pure: the same rows, labels and settings always give the same model.
pub fn fit_logistic(
    rows: &[Vec<f64>],
    labels: &[bool],
    settings: &ClassifierSettings,
    clock: &RunClock,
) -> AnalyticsResult<LogisticModel> {
    let scaler = StandardScaler::fit(rows)
        .ok_or_else(|| AnalyticsError::insufficient("churn_classifier", "no training rows"))?;
    let x = scaler.transform(rows);
    let n = x.len() as f64;
    let width = scaler.means.len();

    let positives = labels.iter().filter(|l| **l).count() as f64;
    let negatives = n - positives;
    if positives == 0.0 || negatives == 0.0 {
        return Err(AnalyticsError::degenerate("churn_classifier", "single-class labels"));
    }
    let sample_weight = |label: bool| if label { n / (2.0 * positives) } else { n / (2.0 * negatives) };
    let weight_total: f64 = labels.iter().map(|l| sample_weight(*l)).sum();

    let mut weights = vec![0.0; width];
    let mut bias = 0.0;
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..settings.max_iterations {
        if iter % CHECKPOINT_EVERY == 0 {
            clock.checkpoint("churn_classifier")?;
        }
        let mut grad_w = vec![0.0; width];
        let mut grad_b = 0.0;
        for (xi, yi) in x.iter().zip(labels) {
            let err = sigmoid(bias + dot(&weights, xi)) - if *yi { 1.0 } else { 0.0 };
            let scaled = sample_weight(*yi) * err / weight_total;
            for (g, v) in grad_w.iter_mut().zip(xi) {
                *g += scaled * v;
            }
            grad_b += scaled;
        }
        for (g, w) in grad_w.iter_mut().zip(&weights) {
            *g += settings.l2_penalty * w;
        }

        for (w, g) in weights.iter_mut().zip(&grad_w) {
            *w -= settings.learning_rate * g;
        }
        bias -= settings.learning_rate * grad_b;
        iterations = iter + 1;

        let grad_norm = (grad_w.iter().map(|g| g * g).sum::<f64>() + grad_b * grad_b).sqrt();
        if !grad_norm.is_finite() || weights.iter().any(|w| !w.is_finite()) {
            return Err(AnalyticsError::non_convergent(
                "churn_classifier",
                format!("non-finite gradient at iteration {iterations}"),
            ));
        }
        if grad_norm < settings.tolerance {
            converged = true;
            break;
        }
    }
    if !converged {
        log::debug!("churn_classifier: stopped after {iterations} iterations without reaching tolerance");
    }

    let correct = x
        .iter()
        .zip(labels)
        .filter(|(xi, yi)| (sigmoid(bias + dot(&weights, xi)) >= 0.5) == **yi)
        .count();

    Ok(LogisticModel {
        feature_names: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        scaler,
        weights,
        bias,
        iterations,
        converged,
        training_accuracy: correct as f64 / n,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auc_is_one_for_perfect_ranking_and_half_for_ties() {
        let labels = [false, false, true, true];
        assert_eq!(roc_auc(&[0.1, 0.2, 0.8, 0.9], &labels), Some(1.0));
        assert_eq!(roc_auc(&[0.9, 0.8, 0.2, 0.1], &labels), Some(0.0));
        assert_eq!(roc_auc(&[0.5, 0.5, 0.5, 0.5], &labels), Some(0.5));
        assert_eq!(roc_auc(&[0.1, 0.2], &[true, true]), None);
    }

    #[test]
    fn holdout_keeps_both_classes_on_each_side() {
        let labels: Vec<bool> = (0..20).map(|i| i % 4 == 0).collect();
        let mut rng = AnalyzerRng::new(42, AnalyzerSlot::Churn as u64);
        let (train, test) = stratified_split(&labels, 0.25, &mut rng).expect("both classes have members");

        assert_eq!(train.len() + test.len(), 20);
        assert!(train.iter().all(|i| !test.contains(i)));
        assert_eq!(test.iter().filter(|i| labels[**i]).count(), 2, "ceil(5 × 0.25) positives held out");
        assert_eq!(test.iter().filter(|i| !labels[**i]).count(), 4, "ceil(15 × 0.25) negatives held out");

        let again = stratified_split(&labels, 0.25, &mut AnalyzerRng::new(42, AnalyzerSlot::Churn as u64));
        assert_eq!(again, Some((train, test)), "same seed, same split");

        let lone = [true, false, false];
        assert!(stratified_split(&lone, 0.25, &mut rng).is_none());
    }
}
