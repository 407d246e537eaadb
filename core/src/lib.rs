//! memberlens-core: batch analytics over gym and studio membership exports.
//!
//! Pipeline: raw export tables → `normalizer` → `NormalizedBatch` →
//! `AnalyticsEngine::run` → `AnalyticsReport` plus warnings.

pub mod analyzer;
pub mod association_analyzer;
pub mod churn_analyzer;
pub mod clock;
pub mod cohort_analyzer;
pub mod config;
pub mod engine;
pub mod error;
pub mod features;
pub mod kmeans;
pub mod ltv_analyzer;
pub mod metrics;
pub mod normalizer;
pub mod report;
pub mod rng;
pub mod section;
pub mod segmentation_analyzer;
pub mod stats;
pub mod time_series_analyzer;
pub mod types;

pub use clock::CancelHandle;
pub use config::AnalyticsConfig;
pub use engine::AnalyticsEngine;
pub use error::{AnalyticsError, AnalyticsResult};
pub use report::{AnalyticsReport, AnalyticsRun, Warning};
pub use section::Section;
