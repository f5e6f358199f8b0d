//! Correlation analysis and templated business insights
//!
//! The numeric core is a plain Pearson correlation over the table's
//! numeric columns; everything layered on top is advisory text the
//! dashboard shows verbatim. Degenerate inputs (constant columns, too few
//! points) yield a correlation of 0 by convention rather than NaN, so the
//! caller never sees an undefined number.

use std::collections::BTreeMap;

use chrono::Datelike;
use log::debug;
use serde::Serialize;

use crate::table::{CanonicalRow, CanonicalTable};

/// |r| above which a pair is flagged as notable.
pub const NOTABLE_CORRELATION: f64 = 0.5;

/// How many notable pairs get commentary.
pub const MAX_COMMENTARY_PAIRS: usize = 3;

/// Week-over-week change (percent) beyond which a trend remark is made.
const TREND_REMARK_PCT: f64 = 5.0;

/// One correlated column pair.
#[derive(Debug, Clone, Serialize)]
pub struct CorrelationPair {
    pub left: String,
    pub right: String,
    pub r: f64,
    pub notable: bool,
}

/// Ranked correlations plus generated observations.
#[derive(Debug, Clone, Serialize)]
pub struct CorrelationReport {
    /// All pairs, sorted descending by |r|.
    pub pairs: Vec<CorrelationPair>,
    pub insights: Vec<String>,
}

/// Pearson correlation coefficient. Returns 0 when either side has fewer
/// than two points or zero variance.
pub fn pearson(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let mean_x = xs[..n].iter().sum::<f64>() / n as f64;
    let mean_y = ys[..n].iter().sum::<f64>() / n as f64;
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for i in 0..n {
        let dx = xs[i] - mean_x;
        let dy = ys[i] - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= 0.0 || var_y <= 0.0 {
        return 0.0;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

type NumericGetter = fn(&CanonicalRow) -> Option<f64>;

const NUMERIC_COLUMNS: [(&str, NumericGetter); 3] = [
    ("unit_price", |r| r.unit_price),
    ("quantity", |r| r.quantity.map(|q| q as f64)),
    ("total", |r| r.total),
];

fn pair_commentary(left: &str, right: &str, r: f64) -> String {
    let direction = if r > 0.0 { "positively" } else { "negatively" };
    let hint = match (left, right) {
        ("quantity", "total") | ("total", "quantity") => {
            " Larger baskets are driving revenue; bundle offers could push this further."
        }
        ("unit_price", "total") | ("total", "unit_price") => {
            " Revenue tracks price point; review pricing on slow movers."
        }
        ("unit_price", "quantity") | ("quantity", "unit_price") => {
            " Price level and units sold move together; check discount effectiveness."
        }
        _ => "",
    };
    format!("{left} and {right} are {direction} correlated (r = {r:.2}).{hint}")
}

fn category_commentary(table: &CanonicalTable, insights: &mut Vec<String>) {
    let mut by_category: BTreeMap<&str, f64> = BTreeMap::new();
    for row in &table.rows {
        if let (Some(category), Some(total)) = (row.category.as_deref(), row.total) {
            *by_category.entry(category).or_insert(0.0) += total;
        }
    }
    if by_category.len() < 2 {
        return;
    }
    let best = by_category
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal));
    let worst = by_category
        .iter()
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal));
    if let (Some((top, _)), Some((bottom, _))) = (best, worst) {
        insights.push(format!(
            "Top-selling category: {top}. Consider expanding this line."
        ));
        insights.push(format!(
            "Lowest-performing category: {bottom}. Consider promotions or discounts."
        ));
    }
}

fn trend_commentary(table: &CanonicalTable, insights: &mut Vec<String>) {
    // Weekly totals keyed by ISO year and week
    let mut by_week: BTreeMap<(i32, u32), f64> = BTreeMap::new();
    for row in &table.rows {
        if let (Some(date), Some(total)) = (row.date, row.total) {
            let iso = date.iso_week();
            *by_week.entry((iso.year(), iso.week())).or_insert(0.0) += total;
        }
    }
    if by_week.len() < 2 {
        return;
    }
    let weeks: Vec<f64> = by_week.values().copied().collect();
    let previous = weeks[weeks.len() - 2];
    let latest = weeks[weeks.len() - 1];
    if previous <= 0.0 {
        return;
    }
    let change = (latest - previous) / previous * 100.0;
    if change > TREND_REMARK_PCT {
        insights.push(format!(
            "Sales are up {change:.1}% week-over-week. Maintain current promotions."
        ));
    } else if change < -TREND_REMARK_PCT {
        insights.push(format!(
            "Sales are down {:.1}% week-over-week. Investigate pricing or stock issues.",
            change.abs()
        ));
    }
}

/// Compute pairwise correlations among numeric columns and derive
/// advisory observations from them and from category/trend aggregates.
pub fn summarize_correlations(table: &CanonicalTable) -> CorrelationReport {
    let mut pairs = Vec::new();
    for i in 0..NUMERIC_COLUMNS.len() {
        for j in (i + 1)..NUMERIC_COLUMNS.len() {
            let (left_name, left_get) = NUMERIC_COLUMNS[i];
            let (right_name, right_get) = NUMERIC_COLUMNS[j];
            // Pairwise-complete observations only
            let mut xs = Vec::new();
            let mut ys = Vec::new();
            for row in &table.rows {
                if let (Some(x), Some(y)) = (left_get(row), right_get(row)) {
                    xs.push(x);
                    ys.push(y);
                }
            }
            let r = pearson(&xs, &ys);
            pairs.push(CorrelationPair {
                left: left_name.to_string(),
                right: right_name.to_string(),
                r,
                notable: r.abs() > NOTABLE_CORRELATION,
            });
        }
    }
    pairs.sort_by(|a, b| {
        b.r.abs()
            .partial_cmp(&a.r.abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    debug!(
        "correlation pairs computed: {} ({} notable)",
        pairs.len(),
        pairs.iter().filter(|p| p.notable).count()
    );

    let mut insights = Vec::new();
    for pair in pairs
        .iter()
        .filter(|p| p.notable)
        .take(MAX_COMMENTARY_PAIRS)
    {
        insights.push(pair_commentary(&pair.left, &pair.right, pair.r));
    }
    category_commentary(table, &mut insights);
    trend_commentary(table, &mut insights);
    if insights.is_empty() {
        insights.push("No significant patterns found in the current selection.".to_string());
    }

    CorrelationReport { pairs, insights }
}
