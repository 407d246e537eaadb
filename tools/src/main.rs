//! memberlens-runner: run the analytics engine over a membership export.
//!
//! Usage:
//!   memberlens-runner --input export.md
//!   memberlens-runner --input export.md --mapping columns.json --config run.json \
//!       --reference-date 2024-06-30 --seed 7 --timeout-ms 5000 --out report.json

use anyhow::{Context, Result};
use chrono::NaiveDate;
use memberlens_core::{
    normalizer::{parse_markdown_export, ColumnMapping, Normalizer},
    AnalyticsConfig, AnalyticsEngine, AnalyticsRun,
};
use std::env;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let input = string_arg(&args, "--input").context("--input <export.md> is required")?;
    let mapping_path = string_arg(&args, "--mapping");
    let config_path = string_arg(&args, "--config");
    let out = string_arg(&args, "--out");

    let mut config = match config_path {
        Some(path) => AnalyticsConfig::load(path)?,
        None => AnalyticsConfig::new(chrono::Local::now().date_naive()),
    };
    if let Some(raw) = string_arg(&args, "--reference-date") {
        config.reference_date = NaiveDate::parse_from_str(raw, "%Y-%m-%d")
            .with_context(|| format!("--reference-date must be YYYY-MM-DD, got {raw}"))?;
    }
    config.random_seed = parse_arg(&args, "--seed", config.random_seed);
    if let Some(ms) = string_arg(&args, "--timeout-ms").and_then(|v| v.parse().ok()) {
        config.timeout_ms = Some(ms);
    }

    let mapping = match mapping_path {
        Some(path) => ColumnMapping::load(path)?,
        None => ColumnMapping::default(),
    };

    eprintln!("memberlens-runner");
    eprintln!("  input:          {input}");
    eprintln!("  reference date: {}", config.reference_date);
    eprintln!("  seed:           {}", config.random_seed);
    eprintln!();

    let content = std::fs::read_to_string(input).with_context(|| format!("Cannot read {input}"))?;
    let tables = parse_markdown_export(&content);
    log::info!("runner: {} tables in {input}", tables.len());
    let batch = Normalizer::new(mapping).normalize(&tables)?;

    let run = AnalyticsEngine::new(config).run(&batch)?;
    print_summary(&run);

    let json = serde_json::to_string_pretty(&run)?;
    match out {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Cannot write {path}"))?;
            eprintln!("report written to {path}");
        }
        None => println!("{json}"),
    }
    Ok(())
}

fn print_summary(run: &AnalyticsRun) {
    let report = &run.report;
    let dq = &report.data_quality;
    eprintln!("=== RUN SUMMARY ===");
    eprintln!("  customers:      {}", dq.customers);
    eprintln!("  transactions:   {}", dq.transactions);
    eprintln!("  issues:         {} ({} quarantined)", dq.issues, dq.quarantined);
    for (name, available) in report.section_status() {
        eprintln!("  {name:<18} {}", if available { "available" } else { "unavailable" });
    }
    if let Some(summary) = report.executive_summary.value() {
        eprintln!();
        eprintln!("=== EXECUTIVE SUMMARY ===");
        eprintln!("  health:         {:.1} ({:?})", summary.health_score, summary.health_class);
        eprintln!("  risk level:     {:?}", summary.risk_level);
        for alert in &summary.alerts {
            eprintln!("  ! {alert}");
        }
        for rec in &summary.recommendations {
            eprintln!("  > {rec}");
        }
    }
    if !run.warnings.is_empty() {
        eprintln!();
        eprintln!("=== WARNINGS ===");
        for w in &run.warnings {
            eprintln!("  [{}] {}", w.source, w.message);
        }
    }
    eprintln!();
}

fn string_arg<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
