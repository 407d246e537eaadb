//! Analyzer trait.
//!
//! RULE: every component that runs after the feature engineer implements
//! Analyzer. Analyzers read only the shared `AnalysisContext`; none calls
//! another analyzer, so the engine may run them in any order or all at
//! once.

use crate::{
    clock::RunClock,
    config::AnalyticsConfig,
    error::AnalyticsResult,
    features::FeatureSet,
    rng::{AnalyzerRng, AnalyzerSlot},
};
use serde::Serialize;

/// Read-only inputs shared by every analyzer in a run.
pub struct AnalysisContext<'a> {
    pub features: &'a FeatureSet,
    pub config:   &'a AnalyticsConfig,
    pub clock:    &'a RunClock,
}

/// The contract every analytics component fulfils.
pub trait Analyzer: Sync {
    type Output: Serialize + Send;

    /// Stable RNG slot; also the section name in logs.
    fn slot(&self) -> AnalyzerSlot;

    fn name(&self) -> &'static str {
        self.slot().name()
    }

    /// Compute this component's section.
    ///
    /// - `ctx`: the engineered features, configuration and run clock
    /// - `rng`: this analyzer's own deterministic stream
    ///
    /// Errors other than structural ones turn into an "unavailable"
    /// section; they never abort the run.
    fn analyze(&self, ctx: &AnalysisContext<'_>, rng: &mut AnalyzerRng) -> AnalyticsResult<Self::Output>;
}
