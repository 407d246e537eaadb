//! `Section<T>`: a report entry that is either computed or explicitly
//! unavailable with a reason code.

use crate::error::{AnalyticsError, AnalyticsResult, UnavailableReason};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Unavailable {
    pub reason: UnavailableReason,
    pub detail: String,
}

/// Serializes as `{"status": "available", "value": …}` or
/// `{"status": "unavailable", "value": {"reason": …, "detail": …}}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum Section<T> {
    Available(T),
    Unavailable(Unavailable),
}

impl<T> Section<T> {
    pub fn unavailable(reason: UnavailableReason, detail: impl Into<String>) -> Self {
        Self::Unavailable(Unavailable { reason, detail: detail.into() })
    }

    pub fn from_error(err: &AnalyticsError) -> Self {
        Self::unavailable(err.unavailable_reason(), err.to_string())
    }

    pub fn from_result(result: AnalyticsResult<T>) -> Self {
        match result {
            Ok(value) => Self::Available(value),
            Err(e) => Self::from_error(&e),
        }
    }

    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available(_))
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Available(v) => Some(v),
            Self::Unavailable(_) => None,
        }
    }

    pub fn reason(&self) -> Option<UnavailableReason> {
        match self {
            Self::Available(_) => None,
            Self::Unavailable(u) => Some(u.reason),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_status_tag() {
        let ok: Section<u32> = Section::Available(3);
        assert_eq!(serde_json::to_string(&ok).unwrap(), r#"{"status":"available","value":3}"#);

        let missing: Section<u32> = Section::from_error(&AnalyticsError::insufficient("ltv", "no customers"));
        let json = serde_json::to_value(&missing).unwrap();
        assert_eq!(json["status"], "unavailable");
        assert_eq!(json["value"]["reason"], "insufficient_data");
        assert!(json["value"]["detail"].as_str().unwrap().contains("no customers"));
    }
}
