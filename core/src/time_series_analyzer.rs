//! Time-series decomposer, anomaly detector and forecaster.
//!
//! The daily net-revenue series runs from the first to the last dated
//! transaction with every missing day filled as a real zero. It is split
//! into trend + weekly seasonal + residual by an iterated loess smoother
//! (cycle-subseries smoothing, low-pass removal, loess trend). When the
//! smoother does not settle within `max_smoother_passes`, a rolling-mean
//! trend plus phase averages is used instead. The residual is always
//! `value - trend - seasonal`, so the three components add back to the
//! series exactly up to rounding.

use crate::{
    analyzer::{AnalysisContext, Analyzer},
    clock::RunClock,
    config::TimeSeriesSettings,
    error::{AnalyticsError, AnalyticsResult},
    rng::{AnalyzerRng, AnalyzerSlot},
    section::Section,
    stats::{self, StandardScaler},
};
use chrono::{Datelike, Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Loess span for each cycle-subseries.
const SEASONAL_SPAN: usize = 7;
/// Relative component change below which the smoother has settled.
const CONVERGENCE_TOLERANCE: f64 = 0.01;
const Z_95: f64 = 1.96;
/// A forecast beyond this multiple of the largest observed magnitude is
/// treated as a diverging fit.
const EXPLOSION_FACTOR: f64 = 10.0;
const LOF_CHECKPOINT_EVERY: usize = 100;
const WEEKDAYS: [&str; 7] = ["Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday"];

// ── Public types ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DecompositionMethod {
    Loess,
    RollingMeanFallback,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TrendDirection {
    Increasing,
    Decreasing,
    Flat,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SeriesPoint {
    pub date:     NaiveDate,
    pub value:    f64,
    pub trend:    f64,
    pub seasonal: f64,
    pub residual: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendFit {
    pub slope_per_day: f64,
    pub r_squared:     f64,
    pub direction:     TrendDirection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResidualStats {
    pub mean:            f64,
    pub std_dev:         f64,
    pub skewness:        Option<f64>,
    pub excess_kurtosis: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Decomposition {
    pub method:            DecompositionMethod,
    pub period:            usize,
    pub passes:            usize,
    pub points:            Vec<SeriesPoint>,
    /// Mean seasonal component per weekday name.
    pub seasonal_indices:  BTreeMap<String, f64>,
    /// 1 − Var(R)/Var(T+R), floored at 0.
    pub trend_strength:    f64,
    /// 1 − Var(R)/Var(S+R), floored at 0.
    pub seasonal_strength: f64,
    pub trend_fit:         Option<TrendFit>,
    pub residual_stats:    ResidualStats,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyDirection {
    Spike,
    Drop,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResidualAnomaly {
    pub date:      NaiveDate,
    pub actual:    f64,
    /// trend + seasonal for that day.
    pub expected:  f64,
    pub residual:  f64,
    pub z_score:   f64,
    pub direction: AnomalyDirection,
    /// actual − expected.
    pub impact:    f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DensityOutlier {
    pub date:      NaiveDate,
    pub value:     f64,
    pub lof_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnomalyReport {
    pub z_threshold:           f64,
    pub residual_anomalies:    Vec<ResidualAnomaly>,
    pub density_outliers:      Section<Vec<DensityOutlier>>,
    pub total_positive_impact: f64,
    pub total_negative_impact: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForecastPoint {
    pub date:  NaiveDate,
    pub value: f64,
    pub lower: f64,
    pub upper: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelForecast {
    pub residual_std: f64,
    pub points:       Vec<ForecastPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Forecast {
    pub horizon_days:       usize,
    pub models:             BTreeMap<String, Section<ModelForecast>>,
    pub models_used:        usize,
    /// Per-day average of every available model, bands included.
    pub ensemble:           Vec<ForecastPoint>,
    /// Revenue of the last `horizon_days` observed days.
    pub recent_total:       f64,
    pub forecast_total:     f64,
    pub implied_growth_pct: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TimeSeriesReport {
    pub start_date:    NaiveDate,
    pub end_date:      NaiveDate,
    pub days:          usize,
    pub zero_days:     usize,
    pub decomposition: Decomposition,
    pub anomalies:     AnomalyReport,
    pub forecast:      Section<Forecast>,
}

// ── Analyzer ───────────────────────────────────────────────────────

pub struct TimeSeriesAnalyzer;

impl Analyzer for TimeSeriesAnalyzer {
    type Output = TimeSeriesReport;

    fn slot(&self) -> AnalyzerSlot {
        AnalyzerSlot::TimeSeries
    }

    fn analyze(&self, ctx: &AnalysisContext<'_>, _rng: &mut AnalyzerRng) -> AnalyticsResult<TimeSeriesReport> {
        let settings = &ctx.config.time_series;
        let (dates, values) = daily_series(ctx.features.dated_transactions().map(|(t, d)| (d, t.net_revenue)));
        let period = settings.seasonal_period;
        if values.len() < 2 * period {
            return Err(AnalyticsError::insufficient(
                "time_series",
                format!("{} days of history, need at least {}", values.len(), 2 * period),
            ));
        }

        let decomposition = decompose(&dates, &values, settings, ctx.clock)?;
        let anomalies = detect_anomalies(&dates, &values, &decomposition, settings, ctx.clock)?;
        let forecast = match forecast(&dates, &values, settings, ctx.clock) {
            Err(e @ AnalyticsError::Cancelled { .. }) => return Err(e),
            other => Section::from_result(other),
        };

        log::info!(
            "time_series: {} days, {:?} decomposition, {} residual anomalies, forecast {}",
            values.len(),
            decomposition.method,
            anomalies.residual_anomalies.len(),
            if forecast.is_available() { "available" } else { "unavailable" }
        );

        Ok(TimeSeriesReport {
            start_date: dates[0],
            end_date: dates[dates.len() - 1],
            days: values.len(),
            zero_days: values.iter().filter(|v| **v == 0.0).count(),
            decomposition,
            anomalies,
            forecast,
        })
    }
}

/// Sum revenue per day and fill every gap between the first and last
/// date with zero.
pub fn daily_series(entries: impl Iterator<Item = (NaiveDate, f64)>) -> (Vec<NaiveDate>, Vec<f64>) {
    let mut by_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for (date, amount) in entries {
        *by_day.entry(date).or_insert(0.0) += amount;
    }
    let (Some(first), Some(last)) = (by_day.keys().next().copied(), by_day.keys().next_back().copied()) else {
        return (Vec::new(), Vec::new());
    };
    let dates: Vec<NaiveDate> = first.iter_days().take_while(|d| *d <= last).collect();
    let values = dates.iter().map(|d| by_day.get(d).copied().unwrap_or(0.0)).collect();
    (dates, values)
}

// ── Smoothing primitives ───────────────────────────────────────────

fn odd_at_least(n: usize) -> usize {
    if n % 2 == 0 { n + 1 } else { n }
}

/// Local linear regression with tricube weights over the `span` nearest
/// points of an evenly spaced series.
pub fn loess(values: &[f64], span: usize) -> Vec<f64> {
    let n = values.len();
    if n < 3 {
        return values.to_vec();
    }
    let q = span.clamp(2, n);
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(q / 2).min(n - q);
            let hi = lo + q;
            let h = (i - lo).max(hi - 1 - i) as f64 + 1.0;
            let (mut sw, mut sx, mut sy, mut sxx, mut sxy) = (0.0, 0.0, 0.0, 0.0, 0.0);
            for (j, y) in values.iter().enumerate().take(hi).skip(lo) {
                let x = j as f64 - i as f64;
                let w = (1.0 - (x.abs() / h).powi(3)).powi(3);
                sw += w;
                sx += w * x;
                sy += w * y;
                sxx += w * x * x;
                sxy += w * x * y;
            }
            // x is centred on i, so the fitted value is the intercept.
            let denom = sw * sxx - sx * sx;
            if denom.abs() > 1e-12 {
                (sxx * sy - sx * sxy) / denom
            } else {
                sy / sw
            }
        })
        .collect()
}

/// Centred moving average; the window shrinks at both ends.
pub fn moving_average(values: &[f64], window: usize) -> Vec<f64> {
    let n = values.len();
    let half = window / 2;
    (0..n)
        .map(|i| {
            let lo = i.saturating_sub(half);
            let hi = (i + window - half).min(n);
            values[lo..hi].iter().sum::<f64>() / (hi - lo) as f64
        })
        .collect()
}

fn relative_change(new: &[f64], old: &[f64]) -> f64 {
    let delta = new.iter().zip(old).map(|(a, b)| (a - b).abs()).fold(0.0, f64::max);
    let (lo, hi) = new.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)));
    let range = hi - lo;
    if range > 1e-9 { delta / range } else { delta }
}

// ── Decomposition ──────────────────────────────────────────────────

/// Iterated loess split. `None` when the components keep moving or stop
/// being finite.
fn loess_decompose(
    values: &[f64],
    period: usize,
    max_passes: usize,
    clock: &RunClock,
) -> AnalyticsResult<Option<(Vec<f64>, Vec<f64>, usize)>> {
    let n = values.len();
    let trend_span = odd_at_least((1.5 * period as f64 / (1.0 - 1.5 / SEASONAL_SPAN as f64)).ceil() as usize);
    let mut trend = vec![0.0; n];
    let mut seasonal = vec![0.0; n];

    for pass in 1..=max_passes {
        clock.checkpoint("time_series_decomposition")?;

        let detrended: Vec<f64> = values.iter().zip(&trend).map(|(y, t)| y - t).collect();
        let mut cycle = vec![0.0; n];
        for phase in 0..period {
            let sub: Vec<f64> = detrended.iter().skip(phase).step_by(period).copied().collect();
            for (k, v) in loess(&sub, SEASONAL_SPAN).into_iter().enumerate() {
                cycle[phase + k * period] = v;
            }
        }
        let low_pass = moving_average(&moving_average(&cycle, period), 3);
        let new_seasonal: Vec<f64> = cycle.iter().zip(&low_pass).map(|(c, l)| c - l).collect();

        let deseasonalized: Vec<f64> = values.iter().zip(&new_seasonal).map(|(y, s)| y - s).collect();
        let new_trend = loess(&deseasonalized, trend_span);

        if new_trend.iter().chain(&new_seasonal).any(|v| !v.is_finite()) {
            return Ok(None);
        }
        let settled = pass > 1
            && relative_change(&new_trend, &trend) < CONVERGENCE_TOLERANCE
            && relative_change(&new_seasonal, &seasonal) < CONVERGENCE_TOLERANCE;
        trend = new_trend;
        seasonal = new_seasonal;
        if settled {
            return Ok(Some((trend, seasonal, pass)));
        }
    }
    Ok(None)
}

/// Rolling-mean trend plus centred phase averages of the detrended series.
fn fallback_decompose(values: &[f64], period: usize) -> (Vec<f64>, Vec<f64>) {
    let trend = moving_average(values, period);
    let mut sums = vec![0.0; period];
    let mut counts = vec![0usize; period];
    for (i, (y, t)) in values.iter().zip(&trend).enumerate() {
        sums[i % period] += y - t;
        counts[i % period] += 1;
    }
    let phase_means: Vec<f64> = sums
        .iter()
        .zip(&counts)
        .map(|(s, c)| if *c > 0 { s / *c as f64 } else { 0.0 })
        .collect();
    let centre = stats::mean(&phase_means).unwrap_or(0.0);
    let seasonal = (0..values.len()).map(|i| phase_means[i % period] - centre).collect();
    (trend, seasonal)
}

fn strength(residual: &[f64], component: &[f64]) -> f64 {
    let combined: Vec<f64> = residual.iter().zip(component).map(|(r, c)| r + c).collect();
    let var_r = stats::variance(residual).unwrap_or(0.0);
    match stats::variance(&combined) {
        Some(v) if v > 0.0 => (1.0 - var_r / v).max(0.0),
        _ => 0.0,
    }
}

pub fn decompose(
    dates: &[NaiveDate],
    values: &[f64],
    settings: &TimeSeriesSettings,
    clock: &RunClock,
) -> AnalyticsResult<Decomposition> {
    let period = settings.seasonal_period;
    let (method, trend, seasonal, passes) =
        match loess_decompose(values, period, settings.max_smoother_passes, clock)? {
            Some((t, s, passes)) => (DecompositionMethod::Loess, t, s, passes),
            None => {
                log::warn!("time_series: loess smoother did not settle, using rolling-mean fallback");
                let (t, s) = fallback_decompose(values, period);
                (DecompositionMethod::RollingMeanFallback, t, s, settings.max_smoother_passes)
            }
        };
    let residual: Vec<f64> = values
        .iter()
        .zip(trend.iter().zip(&seasonal))
        .map(|(y, (t, s))| y - t - s)
        .collect();

    let mut by_weekday: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
    for (d, s) in dates.iter().zip(&seasonal) {
        by_weekday.entry(d.weekday().num_days_from_monday()).or_default().push(*s);
    }
    let seasonal_indices = by_weekday
        .into_iter()
        .filter_map(|(day, v)| Some((WEEKDAYS[day as usize].to_string(), stats::mean(&v)?)))
        .collect();

    let xs: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    let trend_fit = stats::linear_regression(&xs, &trend).map(|fit| TrendFit {
        slope_per_day: fit.slope,
        r_squared: fit.r_squared,
        direction: if fit.slope > 1e-9 {
            TrendDirection::Increasing
        } else if fit.slope < -1e-9 {
            TrendDirection::Decreasing
        } else {
            TrendDirection::Flat
        },
    });

    let residual_stats = ResidualStats {
        mean: stats::mean(&residual).unwrap_or(0.0),
        std_dev: stats::std_dev(&residual).unwrap_or(0.0),
        skewness: stats::skewness(&residual),
        excess_kurtosis: stats::excess_kurtosis(&residual),
    };

    let points = dates
        .iter()
        .zip(values)
        .enumerate()
        .map(|(i, (date, value))| SeriesPoint {
            date: *date,
            value: *value,
            trend: trend[i],
            seasonal: seasonal[i],
            residual: residual[i],
        })
        .collect();

    Ok(Decomposition {
        method,
        period,
        passes,
        points,
        seasonal_indices,
        trend_strength: strength(&residual, &trend),
        seasonal_strength: strength(&residual, &seasonal),
        trend_fit,
        residual_stats,
    })
}

// ── Anomalies ──────────────────────────────────────────────────────

fn detect_anomalies(
    dates: &[NaiveDate],
    values: &[f64],
    decomposition: &Decomposition,
    settings: &TimeSeriesSettings,
    clock: &RunClock,
) -> AnalyticsResult<AnomalyReport> {
    let stats_r = &decomposition.residual_stats;
    let residual_anomalies: Vec<ResidualAnomaly> = if stats_r.std_dev > 0.0 {
        decomposition
            .points
            .iter()
            .filter_map(|p| {
                let z = (p.residual - stats_r.mean) / stats_r.std_dev;
                (z.abs() > settings.anomaly_z_threshold).then(|| {
                    let expected = p.trend + p.seasonal;
                    ResidualAnomaly {
                        date: p.date,
                        actual: p.value,
                        expected,
                        residual: p.residual,
                        z_score: z,
                        direction: if z > 0.0 { AnomalyDirection::Spike } else { AnomalyDirection::Drop },
                        impact: p.value - expected,
                    }
                })
            })
            .collect()
    } else {
        Vec::new()
    };

    let density_outliers = match density_outliers(dates, values, settings, clock) {
        Err(e @ AnalyticsError::Cancelled { .. }) => return Err(e),
        other => Section::from_result(other),
    };

    Ok(AnomalyReport {
        z_threshold: settings.anomaly_z_threshold,
        total_positive_impact: residual_anomalies.iter().map(|a| a.impact).filter(|v| *v > 0.0).sum(),
        total_negative_impact: residual_anomalies.iter().map(|a| a.impact).filter(|v| *v < 0.0).sum(),
        residual_anomalies,
        density_outliers,
    })
}

/// Local outlier factor of every row. `k` is capped at n − 1.
pub fn local_outlier_factor(data: &[Vec<f64>], k: usize, clock: &RunClock) -> AnalyticsResult<Vec<f64>> {
    let n = data.len();
    let k = k.min(n.saturating_sub(1));
    if k == 0 {
        return Err(AnalyticsError::insufficient("local_outlier_factor", "fewer than two points"));
    }

    let mut neighbors: Vec<Vec<(usize, f64)>> = Vec::with_capacity(n);
    for i in 0..n {
        if i % LOF_CHECKPOINT_EVERY == 0 {
            clock.checkpoint("time_series_lof")?;
        }
        let mut dist: Vec<(usize, f64)> = (0..n)
            .filter(|j| *j != i)
            .map(|j| (j, stats::euclidean_distance(&data[i], &data[j])))
            .collect();
        dist.sort_by(|a, b| a.1.total_cmp(&b.1));
        dist.truncate(k);
        neighbors.push(dist);
    }
    let k_distance: Vec<f64> = neighbors.iter().map(|nb| nb.last().map_or(0.0, |(_, d)| *d)).collect();

    // Reachability sums are floored so duplicate points keep a finite density.
    let lrd: Vec<f64> = neighbors
        .iter()
        .map(|nb| {
            let reach: f64 = nb.iter().map(|(j, d)| d.max(k_distance[*j])).sum();
            nb.len() as f64 / reach.max(1e-10)
        })
        .collect();

    Ok(neighbors
        .iter()
        .enumerate()
        .map(|(i, nb)| nb.iter().map(|(j, _)| lrd[*j] / lrd[i]).sum::<f64>() / nb.len() as f64)
        .collect())
}

fn density_outliers(
    dates: &[NaiveDate],
    values: &[f64],
    settings: &TimeSeriesSettings,
    clock: &RunClock,
) -> AnalyticsResult<Vec<DensityOutlier>> {
    let rows: Vec<Vec<f64>> = dates
        .iter()
        .zip(values)
        .map(|(d, v)| vec![*v, d.weekday().num_days_from_monday() as f64, d.day() as f64])
        .collect();
    let scaler = StandardScaler::fit(&rows)
        .ok_or_else(|| AnalyticsError::insufficient("local_outlier_factor", "empty series"))?;
    let scores = local_outlier_factor(&scaler.transform(&rows), settings.lof_neighbors, clock)?;

    Ok(dates
        .iter()
        .zip(values)
        .zip(scores)
        .filter(|(_, score)| *score > settings.lof_threshold)
        .map(|((date, value), lof_score)| DensityOutlier { date: *date, value: *value, lof_score })
        .collect())
}

// ── Forecasting ────────────────────────────────────────────────────

fn forecast_dates(last: NaiveDate, horizon: usize) -> Vec<NaiveDate> {
    (1..=horizon as i64).map(|h| last + Duration::days(h)).collect()
}

fn explosion_limit(values: &[f64]) -> f64 {
    EXPLOSION_FACTOR * values.iter().fold(1.0_f64, |m, v| m.max(v.abs()))
}

/// AR(p) with intercept, fitted by least squares on the normal equations.
pub fn fit_autoregressive(values: &[f64], order: usize) -> AnalyticsResult<Vec<f64>> {
    let n = values.len();
    if n < 2 * order + 2 {
        return Err(AnalyticsError::insufficient("autoregressive", format!("{n} points for order {order}")));
    }
    let width = order + 1;
    let mut xtx = vec![vec![0.0; width]; width];
    let mut xty = vec![0.0; width];
    for t in order..n {
        let row: Vec<f64> = std::iter::once(1.0).chain((1..=order).map(|lag| values[t - lag])).collect();
        for a in 0..width {
            xty[a] += row[a] * values[t];
            for b in 0..width {
                xtx[a][b] += row[a] * row[b];
            }
        }
    }
    stats::solve_linear_system(xtx, xty)
        .ok_or_else(|| AnalyticsError::non_convergent("autoregressive", "singular normal equations"))
}

fn ar_predict(coefficients: &[f64], history: &[f64]) -> f64 {
    let len = history.len();
    coefficients[0]
        + coefficients[1..]
            .iter()
            .enumerate()
            .map(|(lag, c)| c * history[len - 1 - lag])
            .sum::<f64>()
}

fn autoregressive_forecast(
    dates: &[NaiveDate],
    values: &[f64],
    order: usize,
    horizon: usize,
) -> AnalyticsResult<ModelForecast> {
    let coefficients = fit_autoregressive(values, order)?;
    let residuals: Vec<f64> = (order..values.len())
        .map(|t| values[t] - ar_predict(&coefficients, &values[..t]))
        .collect();
    let sigma = stats::mean(&residuals.iter().map(|r| r * r).collect::<Vec<_>>()).unwrap_or(0.0).sqrt();

    let limit = explosion_limit(values);
    let mut history = values.to_vec();
    let mut points = Vec::with_capacity(horizon);
    for (h, date) in forecast_dates(dates[dates.len() - 1], horizon).into_iter().enumerate() {
        let value = ar_predict(&coefficients, &history);
        if !value.is_finite() || value.abs() > limit {
            return Err(AnalyticsError::non_convergent("autoregressive", "forecast diverged"));
        }
        let band = Z_95 * sigma * ((h + 1) as f64).sqrt();
        points.push(ForecastPoint { date, value, lower: value - band, upper: value + band });
        history.push(value);
    }
    Ok(ModelForecast { residual_std: sigma, points })
}

fn linear_trend_forecast(dates: &[NaiveDate], values: &[f64], horizon: usize) -> AnalyticsResult<ModelForecast> {
    let xs: Vec<f64> = (0..values.len()).map(|i| i as f64).collect();
    let fit = stats::linear_regression(&xs, values)
        .ok_or_else(|| AnalyticsError::degenerate("linear_trend", "fewer than two points"))?;
    let residuals: Vec<f64> = xs.iter().zip(values).map(|(x, y)| y - fit.predict(*x)).collect();
    let sigma = stats::sample_std_dev(&residuals).unwrap_or(0.0);

    let limit = explosion_limit(values);
    let n = values.len();
    let mut points = Vec::with_capacity(horizon);
    for (h, date) in forecast_dates(dates[n - 1], horizon).into_iter().enumerate() {
        let value = fit.predict((n + h) as f64);
        if !value.is_finite() || value.abs() > limit {
            return Err(AnalyticsError::non_convergent("linear_trend", "forecast diverged"));
        }
        let band = Z_95 * sigma;
        points.push(ForecastPoint { date, value, lower: value - band, upper: value + band });
    }
    Ok(ModelForecast { residual_std: sigma, points })
}

pub fn forecast(
    dates: &[NaiveDate],
    values: &[f64],
    settings: &TimeSeriesSettings,
    clock: &RunClock,
) -> AnalyticsResult<Forecast> {
    let horizon = settings.forecast_horizon_days;
    clock.checkpoint("time_series_forecast")?;

    let mut models = BTreeMap::new();
    models.insert(
        "autoregressive".to_string(),
        Section::from_result(autoregressive_forecast(dates, values, settings.ar_order, horizon)),
    );
    models.insert("linear_trend".to_string(), Section::from_result(linear_trend_forecast(dates, values, horizon)));

    let available: Vec<&ModelForecast> = models.values().filter_map(Section::value).collect();
    if available.is_empty() {
        return Err(AnalyticsError::non_convergent("forecast", "no forecasting model produced a usable fit"));
    }

    let count = available.len() as f64;
    let ensemble: Vec<ForecastPoint> = (0..horizon)
        .map(|h| {
            let avg = |f: fn(&ForecastPoint) -> f64| available.iter().map(|m| f(&m.points[h])).sum::<f64>() / count;
            ForecastPoint {
                date: available[0].points[h].date,
                value: avg(|p| p.value),
                lower: avg(|p| p.lower),
                upper: avg(|p| p.upper),
            }
        })
        .collect();

    let recent_total: f64 = values.iter().rev().take(horizon).sum();
    let forecast_total: f64 = ensemble.iter().map(|p| p.value).sum();
    Ok(Forecast {
        horizon_days: horizon,
        models_used: available.len(),
        models,
        ensemble,
        recent_total,
        forecast_total,
        implied_growth_pct: stats::ratio((forecast_total - recent_total) * 100.0, recent_total),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaps_are_zero_filled() {
        let d = |day| NaiveDate::from_ymd_opt(2024, 1, day).unwrap();
        let (dates, values) = daily_series(vec![(d(1), 10.0), (d(4), 5.0), (d(1), 2.0)].into_iter());
        assert_eq!(dates.len(), 4);
        assert_eq!(values, vec![12.0, 0.0, 0.0, 5.0]);
    }

    #[test]
    fn loess_reproduces_a_line() {
        let line: Vec<f64> = (0..20).map(|i| 3.0 + 2.0 * i as f64).collect();
        for (a, b) in loess(&line, 7).iter().zip(&line) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn lof_flags_an_isolated_point() {
        let mut data: Vec<Vec<f64>> = (0..20).map(|i| vec![(i % 5) as f64 * 0.1, (i / 5) as f64 * 0.1]).collect();
        data.push(vec![10.0, 10.0]);
        let clock = RunClock::new(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap());
        let scores = local_outlier_factor(&data, 5, &clock).unwrap();
        assert!(scores[20] > 1.5);
        assert!(scores[..20].iter().all(|s| *s < 1.5));
    }
}
