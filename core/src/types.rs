//! Typed records produced by the normalizer and shared by every component.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Customer identifier as it appears in the export ("Código").
pub type CustomerId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum CustomerStatus {
    Active,
    Blocked,
    Cancelled,
    Unknown,
}

impl CustomerStatus {
    /// Fixed status vocabulary. Anything else maps to `Unknown`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "ativo" | "active"                     => Self::Active,
            "bloqueado" | "blocked"                => Self::Blocked,
            "cancelado" | "cancelled" | "canceled" | "excluído" | "excluido" => Self::Cancelled,
            _                                      => Self::Unknown,
        }
    }

    /// Cancelled and blocked contracts count as churned.
    pub fn is_churned(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Blocked)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Pix,
    CreditCard,
    CreditCardOnline,
    DebitCard,
    Other,
}

impl PaymentMethod {
    pub fn parse(raw: &str) -> Self {
        let lowered = raw.trim().to_lowercase();
        match lowered.as_str() {
            "dinheiro" | "cash" => Self::Cash,
            "pix"               => Self::Pix,
            _ if lowered.contains("online")
                && (lowered.contains("crédito") || lowered.contains("credito") || lowered.contains("credit")) =>
            {
                Self::CreditCardOnline
            }
            _ if lowered.contains("débito") || lowered.contains("debito") || lowered.contains("debit") => {
                Self::DebitCard
            }
            _ if lowered.contains("crédito") || lowered.contains("credito") || lowered.contains("credit") => {
                Self::CreditCard
            }
            _ => Self::Other,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Cash             => "Cash",
            Self::Pix              => "PIX",
            Self::CreditCard       => "Credit Card",
            Self::CreditCardOnline => "Credit Card Online",
            Self::DebitCard        => "Debit Card",
            Self::Other            => "Other",
        }
    }
}

/// One receipt line. Immutable once ingested.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub customer_id:     CustomerId,
    /// `None` when the export date could not be parsed; such rows only feed
    /// count-based metrics.
    pub date:            Option<NaiveDate>,
    pub gross_amount:    f64,
    pub discount:        f64,
    pub net_revenue:     f64,
    /// Raw item description; the category is assigned by the feature engineer.
    pub product:         String,
    pub payment_method:  PaymentMethod,
    pub consultant_id:   String,
    pub contract_status: CustomerStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Customer {
    pub customer_id:   CustomerId,
    pub name:          String,
    pub join_date:     Option<NaiveDate>,
    pub status:        CustomerStatus,
    pub contract_type: String,
    pub contract_end:  Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    MissingField,
    UnparsableAmount,
    UnparsableDate,
    UnknownStatus,
    UnknownCustomer,
    DuplicateCustomer,
    NegativeNetRevenue,
}

/// A malformed or suspicious row. Quarantined rows are dropped from the
/// batch; flagged rows are kept.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataQualityIssue {
    pub sheet:       String,
    pub row_index:   usize,
    pub kind:        IssueKind,
    pub detail:      String,
    pub quarantined: bool,
}

/// The immutable in-memory snapshot every analysis runs over.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NormalizedBatch {
    pub customers:    Vec<Customer>,
    pub transactions: Vec<Transaction>,
    pub issues:       Vec<DataQualityIssue>,
}

impl NormalizedBatch {
    pub fn is_empty(&self) -> bool {
        self.customers.is_empty() && self.transactions.is_empty()
    }

    pub fn quarantined_count(&self) -> usize {
        self.issues.iter().filter(|i| i.quarantined).count()
    }

    pub fn issue_count(&self, kind: IssueKind) -> usize {
        self.issues.iter().filter(|i| i.kind == kind).count()
    }
}
