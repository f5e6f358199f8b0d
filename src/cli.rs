//! Command-line interface definitions and argument parsing

use chrono::NaiveDate;
use clap::Parser;

use crate::error::AnalyticsError;
use crate::filter::FilterSpec;
use crate::forecast::SeasonalityOptions;
use crate::table::EncodingHint;

/// Retail analytics CLI: segmentation, churn prediction, forecasting and
/// insights over a sales CSV
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Path to the input CSV file
    #[arg(short, long, default_value = "data.csv")]
    pub input: String,

    /// Number of clusters for customer segmentation
    #[arg(short = 'k', long, default_value = "3")]
    pub clusters: usize,

    /// Number of future days to forecast
    #[arg(short, long, default_value = "30")]
    pub periods: usize,

    /// Seed for clustering initialization and the train/test split
    #[arg(long, default_value = "42")]
    pub seed: u64,

    /// Input encoding: auto, utf-8 or latin-1
    #[arg(long, default_value = "auto")]
    pub encoding: String,

    /// Keep only rows in this product category
    #[arg(long)]
    pub category: Option<String>,

    /// Keep only rows with this customer type
    #[arg(long)]
    pub customer_type: Option<String>,

    /// Keep only rows with this gender
    #[arg(long)]
    pub gender: Option<String>,

    /// Inclusive start of the date range (YYYY-MM-DD)
    #[arg(long)]
    pub start_date: Option<NaiveDate>,

    /// Inclusive end of the date range (YYYY-MM-DD)
    #[arg(long)]
    pub end_date: Option<NaiveDate>,

    /// Disable the weekly seasonal component of the forecast
    #[arg(long)]
    pub no_weekly: bool,

    /// Disable the yearly seasonal component of the forecast
    #[arg(long)]
    pub no_yearly: bool,

    /// Write all results as JSON to this path
    #[arg(long)]
    pub json: Option<String>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Args {
    pub fn encoding_hint(&self) -> crate::Result<EncodingHint> {
        match self.encoding.as_str() {
            "auto" => Ok(EncodingHint::Auto),
            "utf-8" | "utf8" => Ok(EncodingHint::Utf8),
            "latin-1" | "latin1" => Ok(EncodingHint::Latin1),
            other => Err(AnalyticsError::Parameter {
                name: "encoding",
                reason: format!("unknown encoding `{other}`"),
            }),
        }
    }

    /// Build a filter spec from the flags. Both ends of the date range
    /// must be given together.
    pub fn filter_spec(&self) -> crate::Result<FilterSpec> {
        let date_range = match (self.start_date, self.end_date) {
            (Some(start), Some(end)) if start <= end => Some((start, end)),
            (Some(start), Some(end)) => {
                return Err(AnalyticsError::Parameter {
                    name: "date_range",
                    reason: format!("start {start} is after end {end}"),
                });
            }
            (None, None) => None,
            _ => {
                return Err(AnalyticsError::Parameter {
                    name: "date_range",
                    reason: "both --start-date and --end-date are required".into(),
                });
            }
        };
        Ok(FilterSpec {
            category: self.category.clone(),
            customer_type: self.customer_type.clone(),
            gender: self.gender.clone(),
            date_range,
        })
    }

    pub fn seasonality(&self) -> SeasonalityOptions {
        SeasonalityOptions {
            yearly: !self.no_yearly,
            weekly: !self.no_weekly,
            daily: false,
        }
    }
}
