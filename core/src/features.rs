//! Feature engineer: per-transaction flags and per-customer RFM features.
//!
//! Runs once per batch before every analyzer. All time arithmetic is
//! relative to the injected reference date.

use crate::types::{Customer, CustomerId, CustomerStatus, NormalizedBatch, PaymentMethod, Transaction};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ── Product categories ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ProductCategory {
    Gympass,
    Package,
    Trial,
    Personal,
    Other,
}

const GYMPASS_KEYWORDS:  &[&str] = &["gympass", "wellhub"];
const PACKAGE_KEYWORDS:  &[&str] = &["10x", "10 aulas", "pacote", "package"];
const TRIAL_KEYWORDS:    &[&str] = &["experimental", "trial"];
const PERSONAL_KEYWORDS: &[&str] = &["personal"];

impl ProductCategory {
    /// Keyword classifier. The first matching category in priority order
    /// Gympass > Package > Trial > Personal wins; anything else is Other.
    pub fn classify(description: &str) -> Self {
        let lowered = description.to_lowercase();
        let hit = |keywords: &[&str]| keywords.iter().any(|k| lowered.contains(k));
        if hit(GYMPASS_KEYWORDS) {
            Self::Gympass
        } else if hit(PACKAGE_KEYWORDS) {
            Self::Package
        } else if hit(TRIAL_KEYWORDS) {
            Self::Trial
        } else if hit(PERSONAL_KEYWORDS) {
            Self::Personal
        } else {
            Self::Other
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Gympass  => "Gympass",
            Self::Package  => "Package",
            Self::Trial    => "Trial",
            Self::Personal => "Personal Training",
            Self::Other    => "Other",
        }
    }
}

// ── Engineered records ─────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineeredTransaction {
    pub customer_id:    CustomerId,
    pub date:           Option<NaiveDate>,
    pub gross_amount:   f64,
    pub discount:       f64,
    pub net_revenue:    f64,
    pub category:       ProductCategory,
    pub payment_method: PaymentMethod,
    pub consultant_id:  String,
    /// Paid trial class.
    pub is_trial:       bool,
    pub is_package:     bool,
    /// Zero gross amount, typically a Gympass check-in.
    pub is_zero_value:  bool,
    pub is_negative:    bool,
    /// 0 = Monday … 6 = Sunday.
    pub day_of_week:    Option<u32>,
    pub is_weekend:     bool,
}

impl EngineeredTransaction {
    fn from_transaction(t: &Transaction) -> Self {
        let category = ProductCategory::classify(&t.product);
        let day_of_week = t.date.map(|d| d.weekday().num_days_from_monday());
        Self {
            customer_id:    t.customer_id.clone(),
            date:           t.date,
            gross_amount:   t.gross_amount,
            discount:       t.discount,
            net_revenue:    t.net_revenue,
            category,
            payment_method: t.payment_method,
            consultant_id:  t.consultant_id.clone(),
            is_trial:       category == ProductCategory::Trial && t.gross_amount > 0.0,
            is_package:     category == ProductCategory::Package,
            is_zero_value:  t.gross_amount == 0.0,
            is_negative:    t.net_revenue < 0.0,
            day_of_week,
            is_weekend:     matches!(day_of_week, Some(d) if d >= 5),
        }
    }
}

/// Aggregates for one customer, recomputed from scratch every run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CustomerFeatures {
    pub customer_id:         CustomerId,
    pub status:              CustomerStatus,
    pub contract_type:       String,
    pub join_date:           Option<NaiveDate>,
    pub contract_end:        Option<NaiveDate>,
    pub first_transaction:   Option<NaiveDate>,
    pub last_transaction:    Option<NaiveDate>,
    /// Days since the last dated transaction; `None` without one.
    pub recency_days:        Option<i64>,
    /// Every transaction, dated or not.
    pub frequency:           usize,
    pub dated_frequency:     usize,
    /// Summed net revenue (total spent).
    pub monetary:            f64,
    pub avg_ticket:          f64,
    /// Days between first and last dated transaction.
    pub tenure_days:         i64,
    pub recent_transactions: usize,
    pub recent_revenue:      f64,
    pub lifetime_velocity:   f64,
    pub recent_velocity:     f64,
    /// recent_velocity ÷ lifetime_velocity; 0 when there is no history.
    pub engagement_ratio:    f64,
    pub categories:          BTreeSet<ProductCategory>,
    pub trial_count:         usize,
    pub package_count:       usize,
}

impl CustomerFeatures {
    pub fn product_diversity(&self) -> usize {
        self.categories.len()
    }

    pub fn has_dated_activity(&self) -> bool {
        self.last_transaction.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSet {
    pub reference_date:     NaiveDate,
    pub recent_window_days: i64,
    pub transactions:       Vec<EngineeredTransaction>,
    /// Sorted by customer id.
    pub customers:          Vec<CustomerFeatures>,
}

impl FeatureSet {
    pub fn is_empty(&self) -> bool {
        self.customers.is_empty() && self.transactions.is_empty()
    }

    pub fn dated_transactions(&self) -> impl Iterator<Item = (&EngineeredTransaction, NaiveDate)> {
        self.transactions.iter().filter_map(|t| t.date.map(|d| (t, d)))
    }

    /// Customers with at least one dated transaction.
    pub fn active_history(&self) -> impl Iterator<Item = &CustomerFeatures> {
        self.customers.iter().filter(|c| c.has_dated_activity())
    }
}

// ── Engineering ────────────────────────────────────────────────────

/// Derive every feature for `batch` relative to `reference_date`.
pub fn engineer(batch: &NormalizedBatch, reference_date: NaiveDate, recent_window_days: i64) -> FeatureSet {
    let transactions: Vec<EngineeredTransaction> =
        batch.transactions.iter().map(EngineeredTransaction::from_transaction).collect();

    let mut grouped: BTreeMap<&str, Vec<&EngineeredTransaction>> = BTreeMap::new();
    for t in &transactions {
        grouped.entry(t.customer_id.as_str()).or_default().push(t);
    }

    let mut customers: Vec<CustomerFeatures> = batch
        .customers
        .iter()
        .map(|c| {
            let history = grouped.get(c.customer_id.as_str()).map(Vec::as_slice).unwrap_or(&[]);
            customer_features(c, history, reference_date, recent_window_days)
        })
        .collect();
    customers.sort_by(|a, b| a.customer_id.cmp(&b.customer_id));

    log::debug!(
        "features: {} customers, {} transactions, reference date {reference_date}",
        customers.len(),
        transactions.len()
    );

    FeatureSet { reference_date, recent_window_days, transactions, customers }
}

fn customer_features(
    customer: &Customer,
    history: &[&EngineeredTransaction],
    reference_date: NaiveDate,
    recent_window_days: i64,
) -> CustomerFeatures {
    let dates: Vec<NaiveDate> = history.iter().filter_map(|t| t.date).collect();
    let first_transaction = dates.iter().min().copied();
    let last_transaction = dates.iter().max().copied();

    let monetary: f64 = history.iter().map(|t| t.net_revenue).sum();
    let frequency = history.len();
    let dated_frequency = dates.len();

    let recency_days = last_transaction.map(|d| (reference_date - d).num_days().max(0));
    let tenure_days = match (first_transaction, last_transaction) {
        (Some(first), Some(last)) => (last - first).num_days(),
        _ => 0,
    };

    let window_start = reference_date - chrono::Duration::days(recent_window_days);
    let in_window = |d: &NaiveDate| *d > window_start && *d <= reference_date;
    let recent_transactions = dates.iter().filter(|d| in_window(*d)).count();
    let recent_revenue: f64 = history
        .iter()
        .filter(|t| t.date.as_ref().is_some_and(in_window))
        .map(|t| t.net_revenue)
        .sum();

    let lifetime_velocity = if dated_frequency == 0 {
        0.0
    } else {
        dated_frequency as f64 / tenure_days.max(1) as f64
    };
    let recent_velocity = recent_transactions as f64 / recent_window_days.max(1) as f64;
    let engagement_ratio = if lifetime_velocity > 0.0 { recent_velocity / lifetime_velocity } else { 0.0 };

    CustomerFeatures {
        customer_id:   customer.customer_id.clone(),
        status:        customer.status,
        contract_type: customer.contract_type.clone(),
        join_date:     customer.join_date,
        contract_end:  customer.contract_end,
        first_transaction,
        last_transaction,
        recency_days,
        frequency,
        dated_frequency,
        monetary,
        avg_ticket: if frequency > 0 { monetary / frequency as f64 } else { 0.0 },
        tenure_days,
        recent_transactions,
        recent_revenue,
        lifetime_velocity,
        recent_velocity,
        engagement_ratio,
        categories:    history.iter().map(|t| t.category).collect(),
        trial_count:   history.iter().filter(|t| t.is_trial).count(),
        package_count: history.iter().filter(|t| t.is_package).count(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifier_respects_priority() {
        assert_eq!(ProductCategory::classify("GYMPASS - PASSE PADRÃO"), ProductCategory::Gympass);
        assert_eq!(ProductCategory::classify("Calistenia 10x experimental"), ProductCategory::Package);
        assert_eq!(ProductCategory::classify("Aula Experimental"), ProductCategory::Trial);
        assert_eq!(ProductCategory::classify("Personal trial"), ProductCategory::Trial);
        assert_eq!(ProductCategory::classify("Personal Training"), ProductCategory::Personal);
        assert_eq!(ProductCategory::classify("Água"), ProductCategory::Other);
    }
}
