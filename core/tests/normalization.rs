mod common;

use common::{date, init_logging};
use memberlens_core::{
    normalizer::{parse_markdown_export, ColumnMapping, Normalizer},
    types::{CustomerStatus, IssueKind, NormalizedBatch, PaymentMethod},
    AnalyticsError,
};

// ── Helpers ──────────────────────────────────────────────────────────────────

const EXPORT: &str = "\
> metadata.sheet_name: Clientes
| Código | Cliente | Cliente desde | Status atual | Contrato | Vencimento |
|---|---|---|---|---|---|
| 101 | Ana Souza | 05/01/2024 | Ativo | Mensal | 05/07/2024 |
| 102 | Bruno Lima | 10/02/2024 | Cancelado | Mensal | nan |
| 102 | Bruno Lima (dup) | 10/02/2024 | Cancelado | Mensal | nan |
| nan | Sem Código | 10/02/2024 | Ativo | Mensal | nan |

> metadata.sheet_name: Fluxo de Caixa
| Código | Data Recibo | Valor Total | Valor Desconto | Item | Forma Pagamento | Consultor | Status |
|---|---|---|---|---|---|---|---|
| 101 | 05/01/2024 | 1.234,56 | 0,00 | Plano Mensal | PIX | CONSULTOR PADRÃO - Ana | Ativo |
| 101 | 2024-02-05 | 1,234.56 | 34.56 | Pacote 10x | Cartão de Crédito Online | -- | Ativo |
| 102 | 12/02/2024 | 000 | 0 | GYMPASS | Dinheiro | Ana | Cancelado |
| 102 | not a date | abc | 0 | Aula Experimental | Débito | Ana | Cancelado |
| 999 | 12/02/2024 | 10,00 | 0 | Água | PIX | Ana | Ativo |
";

fn normalize(content: &str) -> Result<NormalizedBatch, AnalyticsError> {
    init_logging();
    Normalizer::new(ColumnMapping::default()).normalize(&parse_markdown_export(content))
}

// ── Tests ────────────────────────────────────────────────────────────────────

/// Typed records come out of the markdown export; bad rows are flagged or
/// quarantined instead of failing the run.
#[test]
fn export_normalizes_into_typed_records() {
    let batch = normalize(EXPORT).expect("export normalizes");

    assert_eq!(batch.customers.len(), 2, "duplicate and id-less customers are quarantined");
    let ana = batch.customers.iter().find(|c| c.customer_id == "101").unwrap();
    assert_eq!(ana.status, CustomerStatus::Active);
    assert_eq!(ana.join_date, Some(date(2024, 1, 5)));
    assert_eq!(ana.contract_end, Some(date(2024, 7, 5)));

    // Unknown customer 999 is quarantined; the rest are kept.
    assert_eq!(batch.transactions.len(), 4);
    let first = &batch.transactions[0];
    assert_eq!(first.gross_amount, 1234.56);
    assert_eq!(first.payment_method, PaymentMethod::Pix);
    assert_eq!(first.consultant_id, "Ana");
    let second = &batch.transactions[1];
    assert!((second.net_revenue - 1200.0).abs() < 1e-9);
    assert_eq!(second.payment_method, PaymentMethod::CreditCardOnline);
    assert_eq!(second.consultant_id, "");

    let bad = &batch.transactions[3];
    assert_eq!(bad.gross_amount, 0.0, "unparsable amount becomes 0.0");
    assert_eq!(bad.date, None);

    assert_eq!(batch.issue_count(IssueKind::UnparsableAmount), 1);
    assert_eq!(batch.issue_count(IssueKind::UnparsableDate), 1);
    assert_eq!(batch.issue_count(IssueKind::DuplicateCustomer), 1);
    assert_eq!(batch.issue_count(IssueKind::UnknownCustomer), 1);
    assert_eq!(batch.quarantined_count(), 3);
}

/// A transaction sheet without its required columns aborts the run.
#[test]
fn missing_columns_are_fatal() {
    let export = "\
> metadata.sheet_name: Fluxo de Caixa
| Código | Item |
|---|---|
| 1 | Plano |
";
    let err = normalize(export).unwrap_err();
    match &err {
        AnalyticsError::MissingColumns { sheet, columns } => {
            assert_eq!(sheet, "Fluxo de Caixa");
            assert!(columns.iter().any(|c| c == "Data Recibo"), "columns: {columns:?}");
        }
        other => panic!("expected MissingColumns, got {other:?}"),
    }
    assert!(err.is_fatal());
}

/// Without a customer sheet, customers are derived from transactions.
#[test]
fn customers_are_derived_when_sheet_is_absent() {
    let export = "\
> metadata.sheet_name: Fluxo de Caixa
| Código | Data Recibo | Valor Total |
|---|---|---|
| 7 | 01/03/2024 | 50,00 |
| 7 | 08/03/2024 | 50,00 |
| 8 | 02/03/2024 | 80,00 |
";
    let batch = normalize(export).expect("normalizes");
    assert_eq!(batch.customers.len(), 2);
    assert_eq!(batch.transactions.len(), 3);
    assert_eq!(batch.customers[0].join_date, Some(date(2024, 3, 1)));
}

/// Quarantine issues point at the sheet row that carried the unknown
/// customer, even when earlier rows were dropped for missing ids.
#[test]
fn unknown_customer_issue_keeps_source_row() {
    let export = "\
> metadata.sheet_name: Clientes
| Código | Status atual |
|---|---|
| 1 | Ativo |

> metadata.sheet_name: Fluxo de Caixa
| Código | Data Recibo | Valor Total |
|---|---|---|
| nan | 01/03/2024 | 50,00 |
| nan | 02/03/2024 | 50,00 |
| 999 | 03/03/2024 | 50,00 |
| 1 | 04/03/2024 | 50,00 |
";
    let batch = normalize(export).expect("normalizes");
    assert_eq!(batch.transactions.len(), 1);

    let unknown: Vec<_> = batch.issues.iter().filter(|i| i.kind == IssueKind::UnknownCustomer).collect();
    assert_eq!(unknown.len(), 1);
    assert_eq!(unknown[0].row_index, 2, "issue must name the third sheet row, not the filtered position");
    assert_eq!(unknown[0].sheet, "Fluxo de Caixa");

    let missing: Vec<usize> = batch
        .issues
        .iter()
        .filter(|i| i.kind == IssueKind::MissingField)
        .map(|i| i.row_index)
        .collect();
    assert_eq!(missing, vec![0, 1]);
}
