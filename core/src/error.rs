use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyticsError {
    #[error("Missing required columns in sheet '{sheet}': {columns:?}")]
    MissingColumns { sheet: String, columns: Vec<String> },

    #[error("Sheet '{sheet}' not found in export")]
    SheetNotFound { sheet: String },

    #[error("Unreadable source: {0}")]
    UnreadableSource(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data for {method}: {detail}")]
    InsufficientData { method: &'static str, detail: String },

    #[error("Degenerate input for {method}: {detail}")]
    DegenerateInput { method: &'static str, detail: String },

    #[error("{method} did not converge: {detail}")]
    NonConvergent { method: &'static str, detail: String },

    #[error("Cancelled during {stage}")]
    Cancelled { stage: &'static str },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type AnalyticsResult<T> = Result<T, AnalyticsError>;

/// Reason code attached to a section that could not be computed.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnavailableReason {
    InsufficientData,
    DegenerateInput,
    NonConvergent,
    Cancelled,
    Failed,
}

impl AnalyticsError {
    pub fn insufficient(method: &'static str, detail: impl Into<String>) -> Self {
        Self::InsufficientData { method, detail: detail.into() }
    }

    pub fn degenerate(method: &'static str, detail: impl Into<String>) -> Self {
        Self::DegenerateInput { method, detail: detail.into() }
    }

    pub fn non_convergent(method: &'static str, detail: impl Into<String>) -> Self {
        Self::NonConvergent { method, detail: detail.into() }
    }

    /// Structural failures abort the whole run; everything else degrades
    /// to an unavailable section.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingColumns { .. }
                | Self::SheetNotFound { .. }
                | Self::UnreadableSource(_)
                | Self::InvalidConfig(_)
                | Self::Io(_)
        )
    }

    pub fn unavailable_reason(&self) -> UnavailableReason {
        match self {
            Self::InsufficientData { .. } => UnavailableReason::InsufficientData,
            Self::DegenerateInput { .. }  => UnavailableReason::DegenerateInput,
            Self::NonConvergent { .. }    => UnavailableReason::NonConvergent,
            Self::Cancelled { .. }        => UnavailableReason::Cancelled,
            _                             => UnavailableReason::Failed,
        }
    }
}
