//! Synthetic membership data shared by the integration tests.

#![allow(dead_code)]

use chrono::{Duration, NaiveDate};
use memberlens_core::{
    types::{Customer, CustomerStatus, NormalizedBatch, PaymentMethod, Transaction},
    AnalyticsConfig, AnalyticsEngine, AnalyticsRun,
};

pub const WEEKLY_PRICE: f64 = 50.0;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Reference date of `AnalyticsConfig::default_test()`.
pub fn reference_date() -> NaiveDate {
    date(2024, 6, 30)
}

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn customer(id: &str, status: CustomerStatus, join: NaiveDate) -> Customer {
    Customer {
        customer_id: id.to_string(),
        name: format!("Member {id}"),
        join_date: Some(join),
        status,
        contract_type: "Monthly".to_string(),
        contract_end: None,
    }
}

pub fn purchase(id: &str, on: NaiveDate, amount: f64, product: &str) -> Transaction {
    Transaction {
        customer_id: id.to_string(),
        date: Some(on),
        gross_amount: amount,
        discount: 0.0,
        net_revenue: amount,
        product: product.to_string(),
        payment_method: PaymentMethod::Pix,
        consultant_id: "Ana".to_string(),
        contract_status: CustomerStatus::Active,
    }
}

/// One purchase every seven days from `first` up to and including `last`.
pub fn weekly_purchases(id: &str, first: NaiveDate, last: NaiveDate, product: &str) -> Vec<Transaction> {
    first
        .iter_weeks()
        .take_while(|d| *d <= last)
        .map(|d| purchase(id, d, WEEKLY_PRICE, product))
        .collect()
}

/// 100 customers on monthly contracts:
///   - A000..A049 Active, buying $50 every week from January to the end
///     of June 2024 (the reference date is 2024-06-30)
///   - C000..C049 Cancelled, buying $50 every week from July 2023 to
///     January 2024 and nothing in the last 90+ days
pub fn scenario_batch() -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    for i in 0..50 {
        let id = format!("A{i:03}");
        let start = date(2024, 1, 1) + Duration::days(i % 7);
        batch.customers.push(customer(&id, CustomerStatus::Active, start));
        batch.transactions.extend(weekly_purchases(&id, start, date(2024, 6, 28), "Plano Mensal"));
    }
    for i in 0..50 {
        let id = format!("C{i:03}");
        let start = date(2023, 7, 1) + Duration::days(i % 7);
        batch.customers.push(customer(&id, CustomerStatus::Cancelled, start));
        batch.transactions.extend(weekly_purchases(&id, start, date(2024, 1, 31), "Plano Mensal"));
    }
    batch
}

/// Customers whose category baskets overlap: trials mostly convert to
/// packages, Gympass users rarely buy anything else.
pub fn basket_batch() -> NormalizedBatch {
    let mut batch = NormalizedBatch::default();
    let day = date(2024, 5, 1);
    for i in 0..40 {
        let id = format!("B{i:03}");
        batch.customers.push(customer(&id, CustomerStatus::Active, day));
        let on = day + Duration::days(i % 20);
        match i % 4 {
            0 | 1 => {
                batch.transactions.push(purchase(&id, on, 30.0, "Aula Experimental"));
                batch.transactions.push(purchase(&id, on + Duration::days(3), 400.0, "Pacote 10 aulas"));
            }
            2 => batch.transactions.push(purchase(&id, on, 0.0, "GYMPASS - Check-in")),
            _ => {
                batch.transactions.push(purchase(&id, on, 0.0, "Wellhub"));
                batch.transactions.push(purchase(&id, on + Duration::days(1), 120.0, "Personal Training"));
            }
        }
    }
    batch
}

pub fn run(batch: &NormalizedBatch, config: AnalyticsConfig) -> AnalyticsRun {
    init_logging();
    AnalyticsEngine::new(config).run(batch).expect("run should not fail")
}

pub fn run_default(batch: &NormalizedBatch) -> AnalyticsRun {
    run(batch, AnalyticsConfig::default_test())
}
