//! The analytics engine: the single entry point over a normalized batch.
//!
//! EXECUTION ORDER:
//!   1. Validate configuration         (Fatal on failure)
//!   2. Feature engineer               (runs alone, everything depends on it)
//!   3. Analyzers, concurrently        (cohort, churn, LTV, segmentation,
//!                                      time series, association rules)
//!      plus financial and client metrics
//!   4. Executive summary              (pure composition over 3)
//!
//! RULES:
//!   - Analyzers read only the shared, immutable feature set.
//!   - No analyzer calls another analyzer.
//!   - All randomness flows through the RngBank, one stream per slot.
//!   - A failing analyzer yields an unavailable section, never a failed run.

use crate::{
    analyzer::{AnalysisContext, Analyzer},
    association_analyzer::AssociationAnalyzer,
    churn_analyzer::{ChurnAnalyzer, ScoringMode},
    clock::{CancelHandle, RunClock},
    cohort_analyzer::CohortAnalyzer,
    config::AnalyticsConfig,
    error::{AnalyticsResult, UnavailableReason},
    features::{self, FeatureSet},
    ltv_analyzer::LtvAnalyzer,
    metrics,
    report::{self, AnalyticsReport, AnalyticsRun, DataQualitySummary, SectionView, Warning},
    rng::RngBank,
    section::{Section, Unavailable},
    segmentation_analyzer::SegmentationAnalyzer,
    time_series_analyzer::{DecompositionMethod, TimeSeriesAnalyzer},
    types::NormalizedBatch,
};
use std::time::Duration;

pub struct AnalyticsEngine {
    config: AnalyticsConfig,
}

impl AnalyticsEngine {
    pub fn new(config: AnalyticsConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// Run every analysis over `batch`. Honors `config.timeout_ms`.
    pub fn run(&self, batch: &NormalizedBatch) -> AnalyticsResult<AnalyticsRun> {
        let clock = RunClock::new(self.config.reference_date);
        let clock = match self.config.timeout_ms {
            Some(ms) => clock.with_timeout(Duration::from_millis(ms)),
            None => clock,
        };
        self.run_with_clock(batch, &clock)
    }

    /// Sections still running when `timeout` elapses come back unavailable
    /// with reason `cancelled`.
    pub fn run_with_timeout(&self, batch: &NormalizedBatch, timeout: Duration) -> AnalyticsResult<AnalyticsRun> {
        let clock = RunClock::new(self.config.reference_date).with_timeout(timeout);
        self.run_with_clock(batch, &clock)
    }

    /// Run with a caller-owned cancel flag; see `RunClock::new_handle`.
    pub fn run_with_cancel(&self, batch: &NormalizedBatch, handle: &CancelHandle) -> AnalyticsResult<AnalyticsRun> {
        let clock = RunClock::new(self.config.reference_date).with_handle(handle);
        self.run_with_clock(batch, &clock)
    }

    pub fn run_with_clock(&self, batch: &NormalizedBatch, clock: &RunClock) -> AnalyticsResult<AnalyticsRun> {
        let config = &self.config;
        config.validate()?;
        log::info!(
            "engine: run started, {} customers, {} transactions, reference date {}, seed {}",
            batch.customers.len(),
            batch.transactions.len(),
            config.reference_date,
            config.random_seed
        );

        let features = features::engineer(batch, config.reference_date, config.churn.recent_window_days);
        let ctx = AnalysisContext { features: &features, config, clock };
        let bank = RngBank::new(config.random_seed);

        let mut financial = None;
        let mut clients = None;
        let mut cohorts = None;
        let mut churn = None;
        let mut ltv = None;
        let mut segmentation = None;
        let mut time_series = None;
        let mut association = None;

        rayon::scope(|s| {
            s.spawn(|_| cohorts = Some(run_section(&CohortAnalyzer, &ctx, &bank)));
            s.spawn(|_| churn = Some(run_section(&ChurnAnalyzer, &ctx, &bank)));
            s.spawn(|_| ltv = Some(run_section(&LtvAnalyzer, &ctx, &bank)));
            s.spawn(|_| segmentation = Some(run_section(&SegmentationAnalyzer, &ctx, &bank)));
            s.spawn(|_| time_series = Some(run_section(&TimeSeriesAnalyzer, &ctx, &bank)));
            s.spawn(|_| association = Some(run_section(&AssociationAnalyzer, &ctx, &bank)));
            s.spawn(|_| {
                financial = Some(metric_section("financial_metrics", metrics::financial_metrics(&features, &config.costs)));
                clients = Some(metric_section(
                    "client_metrics",
                    metrics::client_metrics(&features, config.ltv.days_per_month),
                ));
            });
        });

        let financial = financial.unwrap_or_else(missing);
        let clients = clients.unwrap_or_else(missing);
        let cohorts = cohorts.unwrap_or_else(missing);
        let churn = churn.unwrap_or_else(missing);
        let ltv = ltv.unwrap_or_else(missing);
        let segmentation = segmentation.unwrap_or_else(missing);
        let time_series = time_series.unwrap_or_else(missing);
        let association = association.unwrap_or_else(missing);

        let executive_summary = report::executive_summary(
            &SectionView {
                financial: &financial,
                clients: &clients,
                churn: &churn,
                ltv: &ltv,
                cohorts: &cohorts,
                segmentation: &segmentation,
                time_series: &time_series,
                association: &association,
            },
            config,
        );

        let report = AnalyticsReport {
            reference_date: config.reference_date,
            random_seed: config.random_seed,
            data_quality: DataQualitySummary::from_batch(batch, customers_without_transactions(&features)),
            financial_metrics: financial,
            client_metrics: clients,
            churn_scores: churn,
            ltv,
            cohort_retention: cohorts,
            segmentation,
            time_series,
            association_rules: association,
            executive_summary,
        };
        let warnings = collect_warnings(&report);

        let available = report.section_status().iter().filter(|(_, ok)| *ok).count();
        log::info!(
            "engine: run finished, {available}/{} sections available, {} warnings",
            report.section_status().len(),
            warnings.len()
        );
        Ok(AnalyticsRun { report, warnings })
    }
}

fn run_section<A: Analyzer>(analyzer: &A, ctx: &AnalysisContext<'_>, bank: &RngBank) -> Section<A::Output> {
    log::debug!("{}: started", analyzer.name());
    let mut rng = bank.for_analyzer(analyzer.slot());
    let result = analyzer.analyze(ctx, &mut rng);
    match &result {
        Ok(_) => log::debug!("{}: finished", analyzer.name()),
        Err(e) => log::warn!("{}: unavailable: {e}", analyzer.name()),
    }
    Section::from_result(result)
}

fn missing<T>() -> Section<T> {
    Section::unavailable(UnavailableReason::Failed, "analysis task did not report")
}

fn metric_section<T>(name: &str, result: AnalyticsResult<T>) -> Section<T> {
    if let Err(e) = &result {
        log::warn!("{name}: unavailable: {e}");
    }
    Section::from_result(result)
}

fn customers_without_transactions(features: &FeatureSet) -> usize {
    let counts = metrics::transactions_per_customer(features);
    features
        .customers
        .iter()
        .filter(|c| !counts.contains_key(c.customer_id.as_str()))
        .count()
}

fn collect_warnings(report: &AnalyticsReport) -> Vec<Warning> {
    let mut warnings = Vec::new();

    let dq = &report.data_quality;
    if dq.quarantined > 0 {
        warnings.push(Warning::new(
            "data_quality",
            format!("{} rows quarantined, {} rows flagged", dq.quarantined, dq.flagged),
        ));
    } else if dq.flagged > 0 {
        warnings.push(Warning::new("data_quality", format!("{} rows flagged", dq.flagged)));
    }

    let sections: [(&str, Option<&Unavailable>); 9] = [
        ("financial_metrics", unavailable(&report.financial_metrics)),
        ("client_metrics", unavailable(&report.client_metrics)),
        ("churn_scores", unavailable(&report.churn_scores)),
        ("ltv", unavailable(&report.ltv)),
        ("cohort_retention", unavailable(&report.cohort_retention)),
        ("segmentation", unavailable(&report.segmentation)),
        ("time_series", unavailable(&report.time_series)),
        ("association_rules", unavailable(&report.association_rules)),
        ("executive_summary", unavailable(&report.executive_summary)),
    ];
    for (name, u) in sections {
        if let Some(u) = u {
            warnings.push(Warning::new(name, format!("unavailable ({:?}): {}", u.reason, u.detail)));
        }
    }

    if let Some(churn) = report.churn_scores.value() {
        if churn.insufficient_class_diversity {
            warnings.push(Warning::new(
                "churn_scores",
                "single-class churn labels, classifier skipped and rule scores reported",
            ));
        } else if churn.mode == ScoringMode::RuleBased {
            warnings.push(Warning::new("churn_scores", "classifier did not converge, rule scores reported"));
        }
    }
    if let Some(note) = report.segmentation.value().and_then(|s| s.clustering.note.as_ref()) {
        warnings.push(Warning::new("segmentation", note.clone()));
    }
    if let Some(ts) = report.time_series.value() {
        if ts.decomposition.method == DecompositionMethod::RollingMeanFallback {
            warnings.push(Warning::new("time_series", "loess smoother did not settle, rolling-mean fallback used"));
        }
        if let Some(u) = unavailable(&ts.forecast) {
            warnings.push(Warning::new("time_series", format!("forecast unavailable: {}", u.detail)));
        }
    }
    warnings
}

fn unavailable<T>(section: &Section<T>) -> Option<&Unavailable> {
    match section {
        Section::Available(_) => None,
        Section::Unavailable(u) => Some(u),
    }
}
