//! Per-customer feature engineering from transaction rows
//!
//! Groups a filtered table by customer identity and derives the
//! recency/frequency/monetary aggregates that segmentation and churn
//! prediction both consume. Features are recomputed from scratch on every
//! request; filters change the population, so nothing here is cached.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use log::{debug, warn};
use ndarray::Array2;
use serde::Serialize;

use crate::error::AnalyticsError;
use crate::table::{CanonicalRow, CanonicalTable};

/// Feature names, in the column order used by [`FeatureTable::matrix`].
pub const FEATURE_NAMES: [&str; 5] = [
    "recency",
    "frequency",
    "monetary_total",
    "monetary_mean",
    "quantity_mean",
];

/// Aggregate features for one customer identity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CustomerFeatures {
    pub identity: String,
    /// Days since the last transaction, relative to the population's
    /// latest observed date.
    pub recency: f64,
    /// Transaction count.
    pub frequency: f64,
    pub monetary_total: f64,
    pub monetary_mean: f64,
    pub quantity_mean: f64,
}

impl CustomerFeatures {
    pub fn as_array(&self) -> [f64; 5] {
        [
            self.recency,
            self.frequency,
            self.monetary_total,
            self.monetary_mean,
            self.quantity_mean,
        ]
    }
}

/// Feature vectors for the current population.
#[derive(Debug, Clone, Serialize)]
pub struct FeatureTable {
    pub customers: Vec<CustomerFeatures>,
    /// True when the table had no customer identity column and each row was
    /// treated as its own customer. Downstream consumers should tell the
    /// user that segmentation and churn then run at transaction granularity.
    pub synthetic_identity: bool,
    /// Latest observed date in the population; recency is measured from it.
    pub reference_date: NaiveDate,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.customers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.customers.is_empty()
    }

    /// Raw feature matrix, one row per customer, columns per
    /// [`FEATURE_NAMES`].
    pub fn matrix(&self) -> Array2<f64> {
        let mut matrix = Array2::zeros((self.customers.len(), FEATURE_NAMES.len()));
        for (i, customer) in self.customers.iter().enumerate() {
            for (j, value) in customer.as_array().into_iter().enumerate() {
                matrix[[i, j]] = value;
            }
        }
        matrix
    }
}

struct GroupAccumulator {
    last_date: Option<NaiveDate>,
    count: usize,
    total_sum: f64,
    total_count: usize,
    quantity_sum: f64,
    quantity_count: usize,
}

impl GroupAccumulator {
    fn new() -> Self {
        Self {
            last_date: None,
            count: 0,
            total_sum: 0.0,
            total_count: 0,
            quantity_sum: 0.0,
            quantity_count: 0,
        }
    }

    fn push(&mut self, row: &CanonicalRow) {
        self.count += 1;
        if let Some(d) = row.date {
            self.last_date = Some(self.last_date.map_or(d, |prev| prev.max(d)));
        }
        if let Some(t) = row.total {
            self.total_sum += t;
            self.total_count += 1;
        }
        if let Some(q) = row.quantity {
            self.quantity_sum += q as f64;
            self.quantity_count += 1;
        }
    }

    /// A row contributes if any of its needed numeric fields is present.
    fn contributing(&self) -> bool {
        self.total_count > 0 || self.quantity_count > 0
    }
}

/// Build per-customer features from an already-filtered table.
///
/// Identity comes from the `customer_id` column when at least one row has
/// it; otherwise every row becomes its own synthetic identity (keyed by
/// transaction id when present). Groups without a parseable date or
/// without any contributing numeric cell are dropped rather than emitted
/// with undefined aggregates.
pub fn build_customer_features(table: &CanonicalTable) -> crate::Result<FeatureTable> {
    let has_customer_ids = table.rows.iter().any(|r| r.customer_id.is_some());
    let synthetic_identity = !has_customer_ids;
    if synthetic_identity {
        warn!("no customer identity column; features are per-transaction");
    }

    let mut groups: BTreeMap<String, GroupAccumulator> = BTreeMap::new();
    for (idx, row) in table.rows.iter().enumerate() {
        let identity = if has_customer_ids {
            match &row.customer_id {
                Some(id) => id.clone(),
                // Absent identity cannot be attributed to anyone.
                None => continue,
            }
        } else {
            row.transaction_id
                .clone()
                .unwrap_or_else(|| format!("row-{idx}"))
        };
        groups.entry(identity).or_insert_with(GroupAccumulator::new).push(row);
    }

    let reference_date = table
        .max_date()
        .ok_or_else(|| AnalyticsError::InsufficientData("no row has a parseable date".into()))?;

    let mut customers = Vec::new();
    for (identity, acc) in groups {
        let Some(last_date) = acc.last_date else {
            debug!("dropping identity {identity}: no dated rows");
            continue;
        };
        if !acc.contributing() {
            debug!("dropping identity {identity}: no contributing numeric cells");
            continue;
        }
        let monetary_mean = if acc.total_count > 0 {
            acc.total_sum / acc.total_count as f64
        } else {
            0.0
        };
        let quantity_mean = if acc.quantity_count > 0 {
            acc.quantity_sum / acc.quantity_count as f64
        } else {
            0.0
        };
        customers.push(CustomerFeatures {
            identity,
            recency: (reference_date - last_date).num_days() as f64,
            frequency: acc.count as f64,
            monetary_total: acc.total_sum,
            monetary_mean,
            quantity_mean,
        });
    }

    if customers.is_empty() {
        return Err(AnalyticsError::InsufficientData(
            "no customer group survived aggregation".into(),
        ));
    }
    debug!(
        "built features for {} customers (synthetic identity: {synthetic_identity})",
        customers.len()
    );

    Ok(FeatureTable {
        customers,
        synthetic_identity,
        reference_date,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{load_csv, EncodingHint};

    fn table_with_ids() -> CanonicalTable {
        let data = "\
Customer ID,Date,Total,Quantity
C1,2023-01-01,10.0,2
C1,2023-01-11,30.0,4
C2,2023-01-06,50.0,1
";
        load_csv(data.as_bytes(), EncodingHint::Auto).unwrap()
    }

    #[test]
    fn test_rfm_aggregates() {
        let features = build_customer_features(&table_with_ids()).unwrap();
        assert!(!features.synthetic_identity);
        assert_eq!(features.len(), 2);
        assert_eq!(
            features.reference_date,
            NaiveDate::from_ymd_opt(2023, 1, 11).unwrap()
        );

        let c1 = features
            .customers
            .iter()
            .find(|c| c.identity == "C1")
            .unwrap();
        assert_eq!(c1.recency, 0.0);
        assert_eq!(c1.frequency, 2.0);
        assert_eq!(c1.monetary_total, 40.0);
        assert_eq!(c1.monetary_mean, 20.0);
        assert_eq!(c1.quantity_mean, 3.0);

        let c2 = features
            .customers
            .iter()
            .find(|c| c.identity == "C2")
            .unwrap();
        assert_eq!(c2.recency, 5.0);
        assert_eq!(c2.frequency, 1.0);
    }

    #[test]
    fn test_synthetic_identity_per_row() {
        let data = "\
Invoice ID,Date,Total
INV-1,2023-01-01,10.0
INV-2,2023-01-02,20.0
";
        let table = load_csv(data.as_bytes(), EncodingHint::Auto).unwrap();
        let features = build_customer_features(&table).unwrap();
        assert!(features.synthetic_identity);
        assert_eq!(features.len(), 2);
        assert!(features.customers.iter().any(|c| c.identity == "INV-1"));
    }

    #[test]
    fn test_absent_numerics_do_not_poison_means() {
        let data = "\
Customer ID,Date,Total,Quantity
C1,2023-01-01,10.0,2
C1,2023-01-02,oops,3
";
        let table = load_csv(data.as_bytes(), EncodingHint::Auto).unwrap();
        let features = build_customer_features(&table).unwrap();
        let c1 = &features.customers[0];
        // Absent total contributes zero to the sum and is excluded from the
        // mean denominator
        assert_eq!(c1.monetary_total, 10.0);
        assert_eq!(c1.monetary_mean, 10.0);
        assert_eq!(c1.quantity_mean, 2.5);
        assert_eq!(c1.frequency, 2.0);
    }

    #[test]
    fn test_undated_group_dropped() {
        let data = "\
Customer ID,Date,Total
C1,2023-01-01,10.0
C2,bad-date,20.0
";
        let table = load_csv(data.as_bytes(), EncodingHint::Auto).unwrap();
        let features = build_customer_features(&table).unwrap();
        assert_eq!(features.len(), 1);
        assert_eq!(features.customers[0].identity, "C1");
    }

    #[test]
    fn test_no_dates_at_all_is_insufficient() {
        let data = "Customer ID,Date,Total\nC1,bad,10.0\n";
        let table = load_csv(data.as_bytes(), EncodingHint::Auto).unwrap();
        let err = build_customer_features(&table).unwrap_err();
        assert!(matches!(err, AnalyticsError::InsufficientData(_)));
    }

    #[test]
    fn test_matrix_shape() {
        let features = build_customer_features(&table_with_ids()).unwrap();
        let m = features.matrix();
        assert_eq!(m.shape(), &[2, FEATURE_NAMES.len()]);
    }
}
