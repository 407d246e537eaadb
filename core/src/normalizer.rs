//! Record normalizer: raw export rows → typed records or data-quality issues.
//!
//! Input is a set of raw tables (one per sheet) plus a `ColumnMapping`.
//! Rules:
//!   - Missing required columns abort the run (Fatal).
//!   - A malformed row never aborts: it is either quarantined (dropped and
//!     counted) or flagged (kept and counted).
//!   - Unknown status strings become `Unknown`, never dropped.
//!   - Unparsable dates keep the row with `date = None`.

use crate::{
    error::{AnalyticsError, AnalyticsResult},
    types::{
        Customer, CustomerId, CustomerStatus, DataQualityIssue, IssueKind, NormalizedBatch,
        PaymentMethod, Transaction,
    },
};
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

/// One row of an export sheet, keyed by header text.
pub type RawRow = BTreeMap<String, String>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTable {
    pub sheet_name: String,
    pub headers:    Vec<String>,
    pub rows:       Vec<RawRow>,
}

impl RawTable {
    fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|h| same_column(h, name))
    }
}

/// Prefix the export puts in front of the default consultant's name.
const DEFAULT_CONSULTANT_PREFIX: &str = "CONSULTOR PADRÃO - ";
const SHEET_MARKER: &str = "> metadata.sheet_name:";

// ── Column mapping ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionColumns {
    pub customer_id:    String,
    pub date:           String,
    pub gross_amount:   String,
    pub discount:       String,
    pub product:        String,
    pub payment_method: String,
    pub consultant:     String,
    pub status:         String,
}

impl Default for TransactionColumns {
    fn default() -> Self {
        Self {
            customer_id:    "Código".into(),
            date:           "Data Recibo".into(),
            gross_amount:   "Valor Total".into(),
            discount:       "Valor Desconto".into(),
            product:        "Item".into(),
            payment_method: "Forma Pagamento".into(),
            consultant:     "Consultor".into(),
            status:         "Status".into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomerColumns {
    pub customer_id:   String,
    pub name:          String,
    pub join_date:     String,
    pub status:        String,
    pub contract_type: String,
    pub contract_end:  String,
}

impl Default for CustomerColumns {
    fn default() -> Self {
        Self {
            customer_id:   "Código".into(),
            name:          "Cliente".into(),
            join_date:     "Cliente desde".into(),
            status:        "Status atual".into(),
            contract_type: "Contrato".into(),
            contract_end:  "Vencimento".into(),
        }
    }
}

/// Maps export headers onto record fields. Header matching ignores case
/// and surrounding whitespace.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ColumnMapping {
    pub transactions_sheet: String,
    pub customers_sheet:    String,
    pub transactions:       TransactionColumns,
    pub customers:          CustomerColumns,
}

impl Default for ColumnMapping {
    fn default() -> Self {
        Self {
            transactions_sheet: "Fluxo de Caixa".into(),
            customers_sheet:    "Clientes".into(),
            transactions:       TransactionColumns::default(),
            customers:          CustomerColumns::default(),
        }
    }
}

impl ColumnMapping {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        Ok(serde_json::from_str(&content)?)
    }
}

// ── Markdown export ────────────────────────────────────────────────

/// Split a markdown export into tables.
///
/// A table starts after a `> metadata.sheet_name: <name>` line. Its first
/// `|` row is the header, the `---` row is skipped and every later `|` row
/// is data. Tables without a marker are named `sheet_<n>`.
pub fn parse_markdown_export(content: &str) -> Vec<RawTable> {
    let mut tables: Vec<RawTable> = Vec::new();
    let mut current: Option<RawTable> = None;

    for line in content.lines() {
        let trimmed = line.trim();
        if let Some(name) = trimmed.strip_prefix(SHEET_MARKER) {
            if let Some(done) = current.take() {
                tables.push(done);
            }
            current = Some(RawTable { sheet_name: name.trim().to_string(), ..Default::default() });
            continue;
        }
        if !trimmed.starts_with('|') {
            continue;
        }

        let cells = split_cells(trimmed);
        let table = current.get_or_insert_with(|| RawTable {
            sheet_name: format!("sheet_{}", tables.len() + 1),
            ..Default::default()
        });

        if table.headers.is_empty() {
            table.headers = cells;
        } else if is_separator_row(&cells) {
            continue;
        } else {
            let row: RawRow = table
                .headers
                .iter()
                .enumerate()
                .map(|(i, h)| (h.clone(), cells.get(i).cloned().unwrap_or_default()))
                .collect();
            table.rows.push(row);
        }
    }
    if let Some(done) = current {
        tables.push(done);
    }
    tables
}

fn split_cells(line: &str) -> Vec<String> {
    let inner = line.trim_start_matches('|');
    let inner = inner.strip_suffix('|').unwrap_or(inner);
    inner.split('|').map(|c| c.trim().to_string()).collect()
}

fn is_separator_row(cells: &[String]) -> bool {
    cells.iter().any(|c| c.contains('-'))
        && cells.iter().all(|c| c.chars().all(|ch| matches!(ch, '-' | ':' | ' ')))
}

// ── Field parsers ──────────────────────────────────────────────────

/// Parse a monetary string.
///
/// Non `[0-9.,-]` characters are stripped. When both separators appear the
/// right-most one is the decimal point. A lone separator is a thousands
/// separator when it repeats or, for a comma, when exactly three digits
/// follow it; otherwise it is the decimal point.
pub fn parse_money(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || matches!(c, '.' | ',' | '-'))
        .collect();
    if !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let negative = cleaned.starts_with('-');
    let body: String = cleaned.chars().filter(|c| *c != '-').collect();

    let last_dot = body.rfind('.');
    let last_comma = body.rfind(',');
    let decimal_sep = match (last_dot, last_comma) {
        (Some(d), Some(c)) => Some(if d > c { '.' } else { ',' }),
        (Some(_), None) => lone_separator_decimal(&body, '.'),
        (None, Some(_)) => lone_separator_decimal(&body, ','),
        (None, None) => None,
    };

    let normalized: String = match decimal_sep {
        Some(sep) => {
            let split_at = body.rfind(sep)?;
            let (int_part, frac_part) = body.split_at(split_at);
            let int_digits: String = int_part.chars().filter(char::is_ascii_digit).collect();
            let frac_digits: String = frac_part.chars().filter(char::is_ascii_digit).collect();
            format!("{}.{}", if int_digits.is_empty() { "0" } else { &int_digits }, frac_digits)
        }
        None => body.chars().filter(char::is_ascii_digit).collect(),
    };

    let value: f64 = normalized.trim_end_matches('.').parse().ok()?;
    if !value.is_finite() {
        return None;
    }
    Some(if negative { -value } else { value })
}

fn lone_separator_decimal(body: &str, sep: char) -> Option<char> {
    if body.matches(sep).count() > 1 {
        return None;
    }
    let digits_after = body.rsplit(sep).next().map(str::len).unwrap_or(0);
    if sep == ',' && digits_after == 3 {
        None
    } else {
        Some(sep)
    }
}

/// Parse an export date. Time-of-day suffixes are ignored; day-first
/// formats win over month-first ones.
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let token = raw.split_whitespace().next()?;
    let token = token.split('T').next().unwrap_or(token);
    const FORMATS: [&str; 5] = ["%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y", "%d/%m/%y", "%Y/%m/%d"];
    FORMATS
        .iter()
        .find_map(|f| NaiveDate::parse_from_str(token, f).ok())
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%dT%H:%M:%S")
                .ok()
                .map(|dt| dt.date())
        })
}

fn clean_consultant(raw: &str) -> String {
    let stripped = raw.trim().strip_prefix(DEFAULT_CONSULTANT_PREFIX).unwrap_or(raw.trim());
    stripped.replace("--", "").trim().to_string()
}

fn same_column(header: &str, name: &str) -> bool {
    header.trim().eq_ignore_ascii_case(name.trim())
        || header.trim().to_lowercase() == name.trim().to_lowercase()
}

/// Cell lookup. Empty cells and the export's null spellings read as `None`.
fn field<'a>(row: &'a RawRow, column: &str) -> Option<&'a str> {
    row.iter()
        .find(|(k, _)| same_column(k, column))
        .map(|(_, v)| v.trim())
        .filter(|v| !v.is_empty() && !matches!(*v, "nan" | "NaN" | "None" | "NaT" | "null"))
}

// ── Normalizer ─────────────────────────────────────────────────────

pub struct Normalizer {
    mapping: ColumnMapping,
}

impl Normalizer {
    pub fn new(mapping: ColumnMapping) -> Self {
        Self { mapping }
    }

    /// Normalize a whole export. The transaction sheet is required; the
    /// customer sheet is optional and derived from transactions when absent.
    pub fn normalize(&self, tables: &[RawTable]) -> AnalyticsResult<NormalizedBatch> {
        let tx_cols = &self.mapping.transactions;
        let tx_required = [tx_cols.customer_id.as_str(), tx_cols.date.as_str(), tx_cols.gross_amount.as_str()];
        let tx_table = self
            .find_table(tables, &self.mapping.transactions_sheet, &tx_required)
            .ok_or_else(|| AnalyticsError::SheetNotFound {
                sheet: self.mapping.transactions_sheet.clone(),
            })?;

        let cu_cols = &self.mapping.customers;
        let cu_required = [cu_cols.customer_id.as_str(), cu_cols.status.as_str()];
        let customer_table = self.find_table(tables, &self.mapping.customers_sheet, &cu_required);

        let mut issues = Vec::new();
        let transactions = self.normalize_transactions(tx_table, &mut issues)?;
        let customers = match customer_table {
            Some(table) => self.normalize_customers(table, &mut issues)?,
            None => {
                log::info!(
                    "normalizer: no '{}' sheet, deriving customers from transactions",
                    self.mapping.customers_sheet
                );
                derive_customers(transactions.iter().map(|(_, t)| t))
            }
        };

        let batch = assemble_batch(customers, transactions, issues, &tx_table.sheet_name);
        log::info!(
            "normalizer: {} customers, {} transactions, {} issues ({} quarantined)",
            batch.customers.len(),
            batch.transactions.len(),
            batch.issues.len(),
            batch.quarantined_count()
        );
        Ok(batch)
    }

    /// Sheet lookup by name, then by the first table carrying every
    /// required column.
    fn find_table<'a>(&self, tables: &'a [RawTable], name: &str, required: &[&str]) -> Option<&'a RawTable> {
        tables
            .iter()
            .find(|t| t.sheet_name.trim().eq_ignore_ascii_case(name.trim()))
            .or_else(|| tables.iter().find(|t| required.iter().all(|c| t.has_column(c))))
    }

    pub fn normalize_transactions(
        &self,
        table: &RawTable,
        issues: &mut Vec<DataQualityIssue>,
    ) -> AnalyticsResult<Vec<(usize, Transaction)>> {
        let cols = &self.mapping.transactions;
        require_columns(table, &[&cols.customer_id, &cols.date, &cols.gross_amount])?;

        let sheet = table.sheet_name.as_str();
        let mut out = Vec::with_capacity(table.rows.len());
        for (row_index, row) in table.rows.iter().enumerate() {
            let mut flag = |kind, detail: String, quarantined| {
                issues.push(DataQualityIssue { sheet: sheet.to_string(), row_index, kind, detail, quarantined });
            };

            let Some(customer_id) = field(row, &cols.customer_id) else {
                flag(IssueKind::MissingField, format!("missing '{}'", cols.customer_id), true);
                continue;
            };

            let gross_raw = field(row, &cols.gross_amount).unwrap_or("");
            let gross_amount = parse_money(gross_raw).unwrap_or_else(|| {
                flag(IssueKind::UnparsableAmount, format!("gross amount '{gross_raw}'"), false);
                0.0
            });
            let discount = match field(row, &cols.discount) {
                None => 0.0,
                Some(raw) => parse_money(raw).unwrap_or_else(|| {
                    flag(IssueKind::UnparsableAmount, format!("discount '{raw}'"), false);
                    0.0
                }),
            };

            let date = match field(row, &cols.date) {
                None => {
                    flag(IssueKind::UnparsableDate, "missing date".into(), false);
                    None
                }
                Some(raw) => {
                    let parsed = parse_date(raw);
                    if parsed.is_none() {
                        flag(IssueKind::UnparsableDate, format!("date '{raw}'"), false);
                    }
                    parsed
                }
            };

            let contract_status = match field(row, &cols.status) {
                None => CustomerStatus::Unknown,
                Some(raw) => {
                    let status = CustomerStatus::parse(raw);
                    if status == CustomerStatus::Unknown {
                        flag(IssueKind::UnknownStatus, format!("status '{raw}'"), false);
                    }
                    status
                }
            };

            let net_revenue = gross_amount - discount;
            if net_revenue < 0.0 {
                flag(IssueKind::NegativeNetRevenue, format!("net revenue {net_revenue:.2}"), false);
            }

            out.push((row_index, Transaction {
                customer_id: customer_id.to_string(),
                date,
                gross_amount,
                discount,
                net_revenue,
                product: field(row, &cols.product).unwrap_or_default().to_string(),
                payment_method: PaymentMethod::parse(field(row, &cols.payment_method).unwrap_or_default()),
                consultant_id: clean_consultant(field(row, &cols.consultant).unwrap_or_default()),
                contract_status,
            }));
        }
        Ok(out)
    }

    pub fn normalize_customers(
        &self,
        table: &RawTable,
        issues: &mut Vec<DataQualityIssue>,
    ) -> AnalyticsResult<Vec<Customer>> {
        let cols = &self.mapping.customers;
        require_columns(table, &[&cols.customer_id, &cols.status])?;

        let sheet = table.sheet_name.as_str();
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::with_capacity(table.rows.len());
        for (row_index, row) in table.rows.iter().enumerate() {
            let mut flag = |kind, detail: String, quarantined| {
                issues.push(DataQualityIssue { sheet: sheet.to_string(), row_index, kind, detail, quarantined });
            };

            let Some(customer_id) = field(row, &cols.customer_id) else {
                flag(IssueKind::MissingField, format!("missing '{}'", cols.customer_id), true);
                continue;
            };
            if !seen.insert(customer_id.to_string()) {
                flag(IssueKind::DuplicateCustomer, format!("customer '{customer_id}' repeated"), true);
                continue;
            }

            let raw_status = field(row, &cols.status).unwrap_or_default();
            let status = CustomerStatus::parse(raw_status);
            if status == CustomerStatus::Unknown {
                flag(IssueKind::UnknownStatus, format!("status '{raw_status}'"), false);
            }

            let mut date_field = |column: &str| match field(row, column) {
                None => None,
                Some(raw) => {
                    let parsed = parse_date(raw);
                    if parsed.is_none() {
                        flag(IssueKind::UnparsableDate, format!("{column} '{raw}'"), false);
                    }
                    parsed
                }
            };
            let join_date = date_field(&cols.join_date);
            let contract_end = date_field(&cols.contract_end);

            out.push(Customer {
                customer_id: customer_id.to_string(),
                name: field(row, &cols.name).unwrap_or_default().to_string(),
                join_date,
                status,
                contract_type: field(row, &cols.contract_type).unwrap_or("Unknown").to_string(),
                contract_end,
            });
        }
        Ok(out)
    }
}

fn require_columns(table: &RawTable, required: &[&String]) -> AnalyticsResult<()> {
    let missing: Vec<String> = required
        .iter()
        .filter(|c| !table.has_column(c))
        .map(|c| c.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(AnalyticsError::MissingColumns { sheet: table.sheet_name.clone(), columns: missing })
    }
}

/// One customer per distinct transaction id. Status comes from the latest
/// dated transaction; join date is the first dated transaction.
pub fn derive_customers<'a>(transactions: impl IntoIterator<Item = &'a Transaction>) -> Vec<Customer> {
    let mut by_id: BTreeMap<&str, Customer> = BTreeMap::new();
    let mut latest: HashMap<&str, NaiveDate> = HashMap::new();

    for t in transactions {
        let entry = by_id.entry(t.customer_id.as_str()).or_insert_with(|| Customer {
            customer_id:   t.customer_id.clone(),
            name:          String::new(),
            join_date:     None,
            status:        t.contract_status,
            contract_type: "Unknown".into(),
            contract_end:  None,
        });
        if let Some(date) = t.date {
            entry.join_date = Some(entry.join_date.map_or(date, |d| d.min(date)));
            let newest = latest.entry(t.customer_id.as_str()).or_insert(date);
            if date >= *newest {
                *newest = date;
                entry.status = t.contract_status;
            }
        }
    }
    by_id.into_values().collect()
}

/// Quarantine transactions whose customer is unknown and build the batch.
/// Each transaction carries the index of the sheet row it came from.
pub fn assemble_batch(
    customers: Vec<Customer>,
    transactions: Vec<(usize, Transaction)>,
    mut issues: Vec<DataQualityIssue>,
    transaction_sheet: &str,
) -> NormalizedBatch {
    let known: HashSet<CustomerId> = customers.iter().map(|c| c.customer_id.clone()).collect();
    let mut kept = Vec::with_capacity(transactions.len());
    for (row_index, t) in transactions {
        if known.contains(&t.customer_id) {
            kept.push(t);
        } else {
            issues.push(DataQualityIssue {
                sheet: transaction_sheet.to_string(),
                row_index,
                kind: IssueKind::UnknownCustomer,
                detail: format!("customer '{}' not in customer sheet", t.customer_id),
                quarantined: true,
            });
        }
    }
    if !issues.is_empty() {
        log::warn!(
            "normalizer: {} data-quality issues, {} rows quarantined",
            issues.len(),
            issues.iter().filter(|i| i.quarantined).count()
        );
    }
    NormalizedBatch { customers, transactions: kept, issues }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_right_most_separator_is_decimal() {
        assert_eq!(parse_money("1.234,56"), Some(1234.56));
        assert_eq!(parse_money("1,234.56"), Some(1234.56));
        assert_eq!(parse_money("R$ 89,90"), Some(89.90));
        assert_eq!(parse_money("1,234"), Some(1234.0));
        assert_eq!(parse_money("1.234.567"), Some(1234567.0));
        assert_eq!(parse_money("-15,00"), Some(-15.0));
        assert_eq!(parse_money("000"), Some(0.0));
        assert_eq!(parse_money("abc"), None);
        assert_eq!(parse_money(""), None);
    }

    #[test]
    fn dates_accept_day_first_and_iso() {
        let d = NaiveDate::from_ymd_opt(2024, 3, 5).unwrap();
        assert_eq!(parse_date("05/03/2024"), Some(d));
        assert_eq!(parse_date("2024-03-05"), Some(d));
        assert_eq!(parse_date("05/03/2024 14:22:10"), Some(d));
        assert_eq!(parse_date("2024-03-05T14:22:10"), Some(d));
        assert_eq!(parse_date("not a date"), None);
    }

    #[test]
    fn consultant_prefix_is_stripped() {
        assert_eq!(clean_consultant("CONSULTOR PADRÃO - Ana"), "Ana");
        assert_eq!(clean_consultant("--"), "");
    }

    #[test]
    fn markdown_tables_split_on_sheet_marker() {
        let md = "\
> metadata.sheet_name: Clientes
| Código | Status atual |
|---|---|
| 1 | Ativo |
| 2 | Cancelado |

> metadata.sheet_name: Fluxo de Caixa
| Código | Valor Total |
| --- | --- |
| 1 | 10,00 |
";
        let tables = parse_markdown_export(md);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].sheet_name, "Clientes");
        assert_eq!(tables[0].rows.len(), 2);
        assert_eq!(tables[0].rows[1].get("Status atual").map(String::as_str), Some("Cancelado"));
        assert_eq!(tables[1].headers, vec!["Código".to_string(), "Valor Total".to_string()]);
        assert_eq!(tables[1].rows.len(), 1);
    }
}
