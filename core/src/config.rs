use crate::error::{AnalyticsError, AnalyticsResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ── Run options ────────────────────────────────────────────────────

/// Options for a single analytics run.
///
/// Only `reference_date` is required when loading from JSON; every other
/// field falls back to the defaults below.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// "Today" for every recency computation. Never read from the wall clock.
    pub reference_date: NaiveDate,
    #[serde(default = "default_inactivity_threshold_days")]
    pub inactivity_threshold_days: i64,
    #[serde(default = "default_monte_carlo_iterations")]
    pub monte_carlo_iterations: usize,
    #[serde(default = "default_random_seed")]
    pub random_seed: u64,
    #[serde(default = "default_min_support")]
    pub min_support: f64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
    #[serde(default = "default_min_lift")]
    pub min_lift: f64,
    #[serde(default = "default_max_segmentation_k")]
    pub max_segmentation_k: usize,
    #[serde(default)]
    pub churn: ChurnThresholds,
    #[serde(default)]
    pub ltv: LtvSettings,
    #[serde(default)]
    pub time_series: TimeSeriesSettings,
    #[serde(default)]
    pub bundling: BundlingSettings,
    #[serde(default)]
    pub costs: CostSettings,
    /// Caller-supplied latency bound for the whole run.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

fn default_inactivity_threshold_days() -> i64 { 90 }
fn default_monte_carlo_iterations() -> usize { 1000 }
fn default_random_seed() -> u64 { 42 }
fn default_min_support() -> f64 { 0.05 }
fn default_min_confidence() -> f64 { 0.3 }
fn default_min_lift() -> f64 { 1.2 }
fn default_max_segmentation_k() -> usize { 10 }

// ── Churn ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChurnThresholds {
    /// Probability above which a customer raises a high-risk alert.
    pub high_risk_probability: f64,
    /// Portfolio churn rate that flips the executive risk level to High.
    pub churn_rate_alarm: f64,
    /// Expected churn rate above which a retention campaign is recommended.
    pub retention_campaign_rate: f64,
    /// Probability above which a customer's revenue counts as at risk.
    pub revenue_at_risk_probability: f64,
    /// Lower (exclusive) bound of the medium-risk band; the upper bound is
    /// `high_risk_probability`.
    pub medium_risk_probability: f64,
    /// Customers above this probability feed the warning-sign scan.
    pub critical_probability: f64,
    pub tiers: RiskTierBounds,
    pub weights: ChurnRuleWeights,
    /// Window for the "recent" velocity in the engagement ratio.
    pub recent_window_days: i64,
    pub classifier: ClassifierSettings,
}

impl Default for ChurnThresholds {
    fn default() -> Self {
        Self {
            high_risk_probability:       0.7,
            churn_rate_alarm:            0.15,
            retention_campaign_rate:     0.05,
            revenue_at_risk_probability: 0.5,
            medium_risk_probability:     0.4,
            critical_probability:        0.8,
            tiers:                       RiskTierBounds::default(),
            weights:                     ChurnRuleWeights::default(),
            recent_window_days:          30,
            classifier:                  ClassifierSettings::default(),
        }
    }
}

/// Lower bounds of each tier above Low.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskTierBounds {
    pub low_medium: f64,
    pub medium: f64,
    pub high: f64,
}

impl Default for RiskTierBounds {
    fn default() -> Self {
        Self { low_medium: 0.3, medium: 0.5, high: 0.7 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChurnRuleWeights {
    pub recency: f64,
    pub engagement_decline: f64,
    pub contract_cancel_rate: f64,
}

impl Default for ChurnRuleWeights {
    fn default() -> Self {
        Self { recency: 0.5, engagement_decline: 0.3, contract_cancel_rate: 0.2 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub learning_rate: f64,
    pub max_iterations: usize,
    pub l2_penalty: f64,
    /// Gradient norm below which training stops early.
    pub tolerance: f64,
    /// Probability reported for everyone when the labels have one class.
    pub constant_low_risk_probability: f64,
    /// Share of each label class held out to evaluate the classifier.
    pub holdout_fraction: f64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            learning_rate:                 0.5,
            max_iterations:                2000,
            l2_penalty:                    0.01,
            tolerance:                     1e-6,
            constant_low_risk_probability: 0.05,
            holdout_fraction:              0.25,
        }
    }
}

// ── LTV ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LtvSettings {
    /// Survival cap for one simulated customer (5 years).
    pub max_lifetime_days: u32,
    /// Days in an average month, used to turn day spans into months.
    pub days_per_month: f64,
}

impl Default for LtvSettings {
    fn default() -> Self {
        Self { max_lifetime_days: 365 * 5, days_per_month: 30.0 }
    }
}

// ── Time series ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSeriesSettings {
    pub seasonal_period: usize,
    pub anomaly_z_threshold: f64,
    pub lof_threshold: f64,
    pub lof_neighbors: usize,
    pub ar_order: usize,
    pub forecast_horizon_days: usize,
    /// Outer passes of the loess smoother before falling back.
    pub max_smoother_passes: usize,
}

impl Default for TimeSeriesSettings {
    fn default() -> Self {
        Self {
            seasonal_period:       7,
            anomaly_z_threshold:   2.5,
            lof_threshold:         1.5,
            lof_neighbors:         20,
            ar_order:              7,
            forecast_horizon_days: 30,
            max_smoother_passes:   15,
        }
    }
}

// ── Bundling ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BundlingSettings {
    pub recommendation_lift: f64,
}

impl Default for BundlingSettings {
    fn default() -> Self {
        Self { recommendation_lift: 1.5 }
    }
}

// ── Costs ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CostSettings {
    /// Variable costs as a share of net revenue.
    pub variable_cost_rate: f64,
    /// Break-even analysis is skipped when unset.
    pub monthly_fixed_costs: Option<f64>,
}

impl Default for CostSettings {
    fn default() -> Self {
        Self { variable_cost_rate: 0.3, monthly_fixed_costs: None }
    }
}

impl AnalyticsConfig {
    /// Defaults for every option, anchored at `reference_date`.
    pub fn new(reference_date: NaiveDate) -> Self {
        Self {
            reference_date,
            inactivity_threshold_days: default_inactivity_threshold_days(),
            monte_carlo_iterations:    default_monte_carlo_iterations(),
            random_seed:               default_random_seed(),
            min_support:               default_min_support(),
            min_confidence:            default_min_confidence(),
            min_lift:                  default_min_lift(),
            max_segmentation_k:        default_max_segmentation_k(),
            churn:                     ChurnThresholds::default(),
            ltv:                       LtvSettings::default(),
            time_series:               TimeSeriesSettings::default(),
            bundling:                  BundlingSettings::default(),
            costs:                     CostSettings::default(),
            timeout_ms:                None,
        }
    }

    /// Load from a JSON file.
    /// In tests, use AnalyticsConfig::default_test().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: AnalyticsConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Fixed-date configuration for tests.
    pub fn default_test() -> Self {
        let reference_date = NaiveDate::from_ymd_opt(2024, 6, 30).unwrap_or_default();
        Self::new(reference_date)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.random_seed = seed;
        self
    }

    /// Reject values no component can work with.
    pub fn validate(&self) -> AnalyticsResult<()> {
        let unit = |name: &str, v: f64| -> AnalyticsResult<()> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(AnalyticsError::InvalidConfig(format!("{name} must be in [0, 1], got {v}")))
            }
        };
        if self.inactivity_threshold_days <= 0 {
            return Err(AnalyticsError::InvalidConfig(format!(
                "inactivity_threshold_days must be positive, got {}",
                self.inactivity_threshold_days
            )));
        }
        if self.monte_carlo_iterations == 0 {
            return Err(AnalyticsError::InvalidConfig(
                "monte_carlo_iterations must be at least 1".into(),
            ));
        }
        if self.max_segmentation_k < 2 {
            return Err(AnalyticsError::InvalidConfig(format!(
                "max_segmentation_k must be at least 2, got {}",
                self.max_segmentation_k
            )));
        }
        if self.min_lift < 0.0 {
            return Err(AnalyticsError::InvalidConfig(format!(
                "min_lift must be non-negative, got {}",
                self.min_lift
            )));
        }
        unit("min_support", self.min_support)?;
        unit("min_confidence", self.min_confidence)?;
        unit("churn.high_risk_probability", self.churn.high_risk_probability)?;
        unit("churn.churn_rate_alarm", self.churn.churn_rate_alarm)?;
        unit(
            "churn.classifier.constant_low_risk_probability",
            self.churn.classifier.constant_low_risk_probability,
        )?;

        unit("churn.medium_risk_probability", self.churn.medium_risk_probability)?;
        unit("churn.critical_probability", self.churn.critical_probability)?;
        let holdout = self.churn.classifier.holdout_fraction;
        if !(holdout > 0.0 && holdout < 1.0) {
            return Err(AnalyticsError::InvalidConfig(format!(
                "churn.classifier.holdout_fraction must be in (0, 1), got {holdout}"
            )));
        }

        let t = &self.churn.tiers;
        if !(t.low_medium <= t.medium && t.medium <= t.high) {
            return Err(AnalyticsError::InvalidConfig(format!(
                "churn tier bounds must be ordered, got {} / {} / {}",
                t.low_medium, t.medium, t.high
            )));
        }
        let w = &self.churn.weights;
        if w.recency < 0.0 || w.engagement_decline < 0.0 || w.contract_cancel_rate < 0.0 {
            return Err(AnalyticsError::InvalidConfig("churn rule weights must be non-negative".into()));
        }
        if self.churn.recent_window_days <= 0 {
            return Err(AnalyticsError::InvalidConfig("churn.recent_window_days must be positive".into()));
        }
        if self.time_series.seasonal_period < 2 {
            return Err(AnalyticsError::InvalidConfig("time_series.seasonal_period must be at least 2".into()));
        }
        if self.time_series.ar_order == 0 || self.time_series.forecast_horizon_days == 0 {
            return Err(AnalyticsError::InvalidConfig(
                "time_series.ar_order and forecast_horizon_days must be positive".into(),
            ));
        }
        if self.time_series.lof_neighbors == 0 {
            return Err(AnalyticsError::InvalidConfig("time_series.lof_neighbors must be at least 1".into()));
        }
        let lof = self.time_series.lof_threshold;
        if !(lof.is_finite() && lof > 0.0) {
            return Err(AnalyticsError::InvalidConfig(format!(
                "time_series.lof_threshold must be a positive number, got {lof}"
            )));
        }
        let rate = self.costs.variable_cost_rate;
        if !(0.0..1.0).contains(&rate) {
            return Err(AnalyticsError::InvalidConfig(format!(
                "costs.variable_cost_rate must be in [0, 1), got {rate}"
            )));
        }
        if let Some(fixed) = self.costs.monthly_fixed_costs {
            if !(fixed.is_finite() && fixed >= 0.0) {
                return Err(AnalyticsError::InvalidConfig(format!(
                    "costs.monthly_fixed_costs must be non-negative, got {fixed}"
                )));
            }
        }
        if self.ltv.max_lifetime_days == 0 || self.ltv.days_per_month <= 0.0 {
            return Err(AnalyticsError::InvalidConfig("ltv settings must be positive".into()));
        }
        Ok(())
    }
}
