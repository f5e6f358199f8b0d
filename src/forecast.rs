//! Daily sales forecasting via additive decomposition
//!
//! Transactions are resampled onto a regular daily grid (missing days are
//! zero-sales days, not gaps), then modeled as linear trend + optional
//! weekly and yearly seasonal effects. The uncertainty band comes from
//! the residual standard deviation and widens with the forecast horizon.

use std::collections::BTreeMap;

use chrono::{Datelike, Duration, NaiveDate};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::AnalyticsError;
use crate::table::CanonicalTable;

/// Fewest distinct historical days a trend can be fit on.
pub const MIN_HISTORY_DAYS: usize = 2;

/// Z-score for the ~95% uncertainty band.
const CONFIDENCE_Z: f64 = 1.96;

/// Which seasonal components to fit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SeasonalityOptions {
    pub yearly: bool,
    pub weekly: bool,
    /// Accepted for interface parity; sub-daily effects are not observable
    /// on a daily grid, so this is a no-op.
    pub daily: bool,
}

impl Default for SeasonalityOptions {
    fn default() -> Self {
        Self {
            yearly: true,
            weekly: true,
            daily: false,
        }
    }
}

/// Fitted components, for the dashboard's component plots.
#[derive(Debug, Clone, Serialize)]
pub struct ForecastComponents {
    /// Trend value per output date, parallel to `ForecastResult::dates`.
    pub trend: Vec<f64>,
    /// Weekday name with its additive effect, Monday first.
    pub weekly: Vec<(String, f64)>,
}

/// Forecast output spanning history plus `periods` future days.
#[derive(Debug, Clone, Serialize)]
pub struct ForecastResult {
    pub dates: Vec<NaiveDate>,
    /// Observed daily totals; `None` for future dates, which is distinct
    /// from an observed zero-sales day.
    pub actual: Vec<Option<f64>>,
    pub predicted: Vec<f64>,
    pub lower_bound: Vec<f64>,
    pub upper_bound: Vec<f64>,
    pub periods: usize,
    pub components: ForecastComponents,
}

/// Sum totals per calendar day and fill the grid between the first and
/// last observed dates with explicit zeros.
pub fn daily_totals(table: &CanonicalTable) -> Vec<(NaiveDate, f64)> {
    let mut by_day: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for row in &table.rows {
        if let Some(date) = row.date {
            *by_day.entry(date).or_insert(0.0) += row.total.unwrap_or(0.0);
        }
    }
    let (Some(&first), Some(&last)) = (by_day.keys().next(), by_day.keys().last()) else {
        return Vec::new();
    };
    let mut series = Vec::new();
    let mut day = first;
    while day <= last {
        series.push((day, by_day.get(&day).copied().unwrap_or(0.0)));
        day += Duration::days(1);
    }
    series
}

/// Ordinary least squares fit of `y` against its index.
fn linear_trend(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean_t = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;
    let mut covariance = 0.0;
    let mut variance = 0.0;
    for (t, &y) in values.iter().enumerate() {
        let dt = t as f64 - mean_t;
        covariance += dt * (y - mean_y);
        variance += dt * dt;
    }
    let slope = if variance > 0.0 { covariance / variance } else { 0.0 };
    let intercept = mean_y - slope * mean_t;
    (intercept, slope)
}

fn weekday_index(date: NaiveDate) -> usize {
    date.weekday().num_days_from_monday() as usize
}

const WEEKDAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// Mean detrended value per grid position; positions with no observations
/// get a zero effect.
fn periodic_effects<const N: usize>(
    detrended: &[f64],
    positions: impl Iterator<Item = usize>,
) -> [f64; N] {
    let mut sums = [0.0; N];
    let mut counts = [0usize; N];
    for (value, pos) in detrended.iter().zip(positions) {
        sums[pos] += value;
        counts[pos] += 1;
    }
    let mut effects = [0.0; N];
    for i in 0..N {
        if counts[i] > 0 {
            effects[i] = sums[i] / counts[i] as f64;
        }
    }
    effects
}

/// Fit the additive model and project `periods` days past the last
/// observed date.
///
/// # Errors
/// * [`AnalyticsError::Parameter`] when `periods` is zero
/// * [`AnalyticsError::InsufficientHistory`] with fewer than
///   [`MIN_HISTORY_DAYS`] distinct observed days
pub fn forecast(
    table: &CanonicalTable,
    periods: usize,
    seasonality: SeasonalityOptions,
) -> crate::Result<ForecastResult> {
    if periods == 0 {
        return Err(AnalyticsError::Parameter {
            name: "periods",
            reason: "must forecast at least one day ahead".into(),
        });
    }

    let distinct_days = table
        .rows
        .iter()
        .filter_map(|r| r.date)
        .collect::<std::collections::BTreeSet<_>>()
        .len();
    if distinct_days < MIN_HISTORY_DAYS {
        return Err(AnalyticsError::InsufficientHistory {
            required: MIN_HISTORY_DAYS,
            found: distinct_days,
        });
    }

    let history = daily_totals(table);
    let values: Vec<f64> = history.iter().map(|(_, v)| *v).collect();
    let last_date = history[history.len() - 1].0;
    debug!(
        "forecasting {periods} days from {} grid days ({distinct_days} observed)",
        history.len()
    );

    let (intercept, slope) = linear_trend(&values);
    let trend_at = |t: usize| intercept + slope * t as f64;
    let detrended: Vec<f64> = values
        .iter()
        .enumerate()
        .map(|(t, &y)| y - trend_at(t))
        .collect();

    let weekly_effects: [f64; 7] = if seasonality.weekly {
        periodic_effects(&detrended, history.iter().map(|(d, _)| weekday_index(*d)))
    } else {
        [0.0; 7]
    };

    // Month-of-year effects only make sense once the history crosses a
    // month boundary; otherwise the single month would absorb the level.
    let spans_months = {
        let first = history[0].0;
        (first.year(), first.month()) != (last_date.year(), last_date.month())
    };
    let yearly_effects: [f64; 12] = if seasonality.yearly && spans_months {
        let deweekly: Vec<f64> = detrended
            .iter()
            .zip(history.iter())
            .map(|(v, (d, _))| v - weekly_effects[weekday_index(*d)])
            .collect();
        periodic_effects(&deweekly, history.iter().map(|(d, _)| d.month0() as usize))
    } else {
        [0.0; 12]
    };

    let predict_for = |t: usize, date: NaiveDate| {
        trend_at(t) + weekly_effects[weekday_index(date)] + yearly_effects[date.month0() as usize]
    };

    // Residual spread over the fitted history
    let residual_var = values
        .iter()
        .enumerate()
        .map(|(t, &y)| (y - predict_for(t, history[t].0)).powi(2))
        .sum::<f64>()
        / values.len() as f64;
    let sigma = residual_var.sqrt();

    let n_history = history.len();
    let total = n_history + periods;
    let mut dates = Vec::with_capacity(total);
    let mut actual = Vec::with_capacity(total);
    let mut predicted = Vec::with_capacity(total);
    let mut lower_bound = Vec::with_capacity(total);
    let mut upper_bound = Vec::with_capacity(total);
    let mut trend_series = Vec::with_capacity(total);

    for t in 0..total {
        let date = if t < n_history {
            history[t].0
        } else {
            last_date + Duration::days((t - n_history + 1) as i64)
        };
        let point = predict_for(t, date);
        // Horizon 0 across history, then counting up: the band never
        // narrows past the last observed date
        let horizon = t.saturating_sub(n_history - 1) as f64;
        let band = CONFIDENCE_Z * sigma * (1.0 + horizon).sqrt();

        dates.push(date);
        actual.push(if t < n_history { Some(history[t].1) } else { None });
        predicted.push(point);
        lower_bound.push(point - band);
        upper_bound.push(point + band);
        trend_series.push(trend_at(t));
    }

    let weekly = WEEKDAY_NAMES
        .iter()
        .zip(weekly_effects.iter())
        .map(|(name, &effect)| ((*name).to_string(), effect))
        .collect();

    Ok(ForecastResult {
        dates,
        actual,
        predicted,
        lower_bound,
        upper_bound,
        periods,
        components: ForecastComponents {
            trend: trend_series,
            weekly,
        },
    })
}
