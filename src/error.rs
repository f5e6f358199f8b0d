//! Error taxonomy for the analytics core
//!
//! Row-level data problems (unparseable dates, non-numeric cells) never
//! surface here; they degrade to absent values during loading. These
//! variants cover the cases where an operation cannot produce a complete
//! result at all.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnalyticsError {
    /// The payload could not be tokenized into rows and columns.
    #[error("could not parse input as CSV: {0}")]
    Format(String),

    /// No usable columns survived header normalization.
    #[error("no recognized columns in header: {0}")]
    Schema(String),

    /// A caller-supplied parameter is out of its valid range.
    #[error("invalid parameter `{name}`: {reason}")]
    Parameter { name: &'static str, reason: String },

    /// The population is too small or single-class for the operation.
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    /// The forecast needs more distinct historical days than were found.
    #[error("insufficient history: {required} distinct days required, found {found}")]
    InsufficientHistory { required: usize, found: usize },
}
