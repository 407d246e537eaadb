//! Association rule miner over per-customer product-category baskets.
//!
//! A basket is the set of distinct categories a customer ever bought.
//! For every co-occurring pair: support = P(A ∧ B), confidence = P(B | A)
//! in each direction, lift = support ÷ (P(A)·P(B)). Lift is computed once
//! per unordered pair, so both directions report the same value.

use crate::{
    analyzer::{AnalysisContext, Analyzer},
    error::{AnalyticsError, AnalyticsResult},
    features::ProductCategory,
    rng::{AnalyzerRng, AnalyzerSlot},
    stats,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

// ── Public types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssociationRule {
    pub antecedent: ProductCategory,
    pub consequent: ProductCategory,
    pub support:    f64,
    pub confidence: f64,
    pub lift:       f64,
    /// Customers who bought both.
    pub customers:  usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoOccurrence {
    pub first:     ProductCategory,
    pub second:    ProductCategory,
    pub customers: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BundleRecommendation {
    pub items:     [ProductCategory; 2],
    pub lift:      f64,
    pub support:   f64,
    pub customers: usize,
    pub message:   String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssociationReport {
    pub baskets:        usize,
    pub item_support:   BTreeMap<ProductCategory, f64>,
    pub co_occurrences: Vec<CoOccurrence>,
    /// Rules above every threshold, highest lift first.
    pub rules:          Vec<AssociationRule>,
    pub bundles:        Vec<BundleRecommendation>,
}

// ── Analyzer ───────────────────────────────────────────────────────

pub struct AssociationAnalyzer;

impl Analyzer for AssociationAnalyzer {
    type Output = AssociationReport;

    fn slot(&self) -> AnalyzerSlot {
        AnalyzerSlot::Association
    }

    fn analyze(&self, ctx: &AnalysisContext<'_>, _rng: &mut AnalyzerRng) -> AnalyticsResult<AssociationReport> {
        let baskets: Vec<&BTreeSet<ProductCategory>> = ctx
            .features
            .customers
            .iter()
            .map(|c| &c.categories)
            .filter(|set| !set.is_empty())
            .collect();
        if baskets.is_empty() {
            return Err(AnalyticsError::insufficient("association_rules", "no customer purchased anything"));
        }

        let thresholds = RuleThresholds {
            min_support: ctx.config.min_support,
            min_confidence: ctx.config.min_confidence,
            min_lift: ctx.config.min_lift,
        };
        let report = mine_rules(&baskets, &thresholds, ctx.config.bundling.recommendation_lift);

        log::info!(
            "association_rules: {} baskets, {} rules, {} bundle recommendations",
            report.baskets,
            report.rules.len(),
            report.bundles.len()
        );
        Ok(report)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RuleThresholds {
    pub min_support:    f64,
    pub min_confidence: f64,
    pub min_lift:       f64,
}

pub fn mine_rules(
    baskets: &[&BTreeSet<ProductCategory>],
    thresholds: &RuleThresholds,
    recommendation_lift: f64,
) -> AssociationReport {
    let n = baskets.len() as f64;

    let mut item_counts: BTreeMap<ProductCategory, usize> = BTreeMap::new();
    let mut pair_counts: BTreeMap<(ProductCategory, ProductCategory), usize> = BTreeMap::new();
    for basket in baskets {
        let items: Vec<ProductCategory> = basket.iter().copied().collect();
        for (i, a) in items.iter().enumerate() {
            *item_counts.entry(*a).or_insert(0) += 1;
            for b in &items[i + 1..] {
                *pair_counts.entry((*a, *b)).or_insert(0) += 1;
            }
        }
    }
    let item_support: BTreeMap<ProductCategory, f64> =
        item_counts.iter().map(|(item, c)| (*item, *c as f64 / n)).collect();

    let mut rules = Vec::new();
    let mut bundles = Vec::new();
    for (&(a, b), &both) in &pair_counts {
        let support = both as f64 / n;
        let (pa, pb) = (item_support[&a], item_support[&b]);
        let Some(lift) = stats::ratio(support, pa * pb) else { continue };

        let mut surfaced = false;
        for (antecedent, consequent) in [(a, b), (b, a)] {
            let confidence = stats::ratio(both as f64, item_counts[&antecedent] as f64).unwrap_or(0.0);
            if support > thresholds.min_support && confidence > thresholds.min_confidence && lift > thresholds.min_lift {
                surfaced = true;
                rules.push(AssociationRule { antecedent, consequent, support, confidence, lift, customers: both });
            }
        }

        if surfaced && lift > recommendation_lift {
            bundles.push(BundleRecommendation {
                items: [a, b],
                lift,
                support,
                customers: both,
                message: format!(
                    "Offer a {} + {} bundle: customers combine them {:.1}x more often than chance",
                    a.label(),
                    b.label(),
                    lift
                ),
            });
        }
    }

    let by_lift = |l1: f64, s1: f64, l2: f64, s2: f64| {
        l2.partial_cmp(&l1)
            .unwrap_or(Ordering::Equal)
            .then(s2.partial_cmp(&s1).unwrap_or(Ordering::Equal))
    };
    rules.sort_by(|x, y| {
        by_lift(x.lift, x.support, y.lift, y.support)
            .then(x.antecedent.cmp(&y.antecedent))
            .then(x.consequent.cmp(&y.consequent))
    });
    bundles.sort_by(|x, y| by_lift(x.lift, x.support, y.lift, y.support).then(x.items.cmp(&y.items)));

    let co_occurrences = pair_counts
        .into_iter()
        .map(|((first, second), customers)| CoOccurrence { first, second, customers })
        .collect();

    AssociationReport { baskets: baskets.len(), item_support, co_occurrences, rules, bundles }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ProductCategory::*;

    fn basket(items: &[ProductCategory]) -> BTreeSet<ProductCategory> {
        items.iter().copied().collect()
    }

    #[test]
    fn rules_respect_thresholds_and_rank_by_lift() {
        let owned = vec![
            basket(&[Trial, Package]),
            basket(&[Trial, Package]),
            basket(&[Trial, Package]),
            basket(&[Gympass]),
            basket(&[Gympass]),
            basket(&[Gympass, Other]),
        ];
        let refs: Vec<&BTreeSet<ProductCategory>> = owned.iter().collect();
        let thresholds = RuleThresholds { min_support: 0.05, min_confidence: 0.3, min_lift: 1.2 };
        let report = mine_rules(&refs, &thresholds, 1.5);

        assert_eq!(report.baskets, 6);
        assert!(report.rules.iter().all(|r| r.lift > 1.2 && r.support > 0.05 && r.confidence > 0.3));
        assert!(report.rules.windows(2).all(|w| w[0].lift >= w[1].lift));
        // Trial and Package always appear together: lift = 1 / P(Trial) = 2.
        let tp = report.rules.iter().find(|r| r.antecedent == Package && r.consequent == Trial).unwrap();
        assert!((tp.lift - 2.0).abs() < 1e-12);
        assert!((tp.confidence - 1.0).abs() < 1e-12);
        assert!(report.bundles.iter().any(|b| b.items == [Package, Trial]));
    }
}
