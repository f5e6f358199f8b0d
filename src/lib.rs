//! ShopSight: analytics core for retail transaction data
//!
//! This library turns an uploaded CSV of sales records into customer
//! segments (K-Means over RFM-style features), a churn prediction with
//! feature importances, a daily sales forecast with uncertainty bounds,
//! and correlation-driven business insights. A serving layer passes a
//! table in and gets structured, serializable results back; nothing in
//! here touches sessions, files or the network.

pub mod churn;
pub mod cli;
pub mod error;
pub mod features;
pub mod filter;
pub mod forecast;
pub mod insights;
pub mod segment;
pub mod table;

// Re-export public items for easier access
pub use churn::{predict_churn, ChurnResult};
pub use cli::Args;
pub use error::AnalyticsError;
pub use features::{build_customer_features, CustomerFeatures, FeatureTable};
pub use filter::FilterSpec;
pub use forecast::{forecast, ForecastResult, SeasonalityOptions};
pub use insights::{summarize_correlations, CorrelationReport};
pub use segment::{segment, ClusterResult};
pub use table::{load_csv, CanonicalTable, EncodingHint};

/// Common result type used throughout the library
pub type Result<T> = std::result::Result<T, AnalyticsError>;
