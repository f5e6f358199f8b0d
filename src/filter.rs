//! Declarative row filtering over a canonical table
//!
//! Each dimension is an independent predicate; active predicates are
//! AND-combined. A row missing a column used by an active predicate is
//! excluded: absent never matches. Applying the same spec twice yields
//! the same subset.

use chrono::NaiveDate;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::table::{CanonicalRow, CanonicalTable};

/// Filter criteria for one analytics request. `None` (or the literal
/// `"All"`, which the dashboard sends for an untouched dropdown) leaves a
/// dimension unconstrained.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterSpec {
    pub category: Option<String>,
    pub customer_type: Option<String>,
    pub gender: Option<String>,
    /// Inclusive on both ends, compared on the date portion only.
    pub date_range: Option<(NaiveDate, NaiveDate)>,
}

fn active(choice: &Option<String>) -> Option<&str> {
    match choice.as_deref() {
        None | Some("All") => None,
        Some(v) => Some(v),
    }
}

impl FilterSpec {
    pub fn is_unconstrained(&self) -> bool {
        active(&self.category).is_none()
            && active(&self.customer_type).is_none()
            && active(&self.gender).is_none()
            && self.date_range.is_none()
    }

    fn matches(&self, row: &CanonicalRow) -> bool {
        if let Some(want) = active(&self.category) {
            match &row.category {
                Some(v) if v == want => {}
                _ => return false,
            }
        }
        if let Some(want) = active(&self.customer_type) {
            match &row.customer_type {
                Some(v) if v == want => {}
                _ => return false,
            }
        }
        if let Some(want) = active(&self.gender) {
            match &row.gender {
                Some(v) if v == want => {}
                _ => return false,
            }
        }
        if let Some((start, end)) = self.date_range {
            match row.date {
                Some(d) if d >= start && d <= end => {}
                _ => return false,
            }
        }
        true
    }

    /// Apply the filter, returning the matching subset in original order.
    pub fn apply(&self, table: &CanonicalTable) -> CanonicalTable {
        let rows: Vec<CanonicalRow> = table
            .rows
            .iter()
            .filter(|r| self.matches(r))
            .cloned()
            .collect();
        debug!("filter kept {} of {} rows", rows.len(), table.len());
        CanonicalTable {
            rows,
            extra_columns: table.extra_columns.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::{load_csv, EncodingHint};

    fn sample_table() -> CanonicalTable {
        let data = "\
Date,Product line,Customer type,Gender,Total
2023-01-01,Electronics,Member,Male,10.0
2023-01-02,Food and beverages,Normal,Female,20.0
2023-01-03,Electronics,Normal,Male,30.0
not-a-date,Electronics,Member,Female,40.0
";
        load_csv(data.as_bytes(), EncodingHint::Auto).unwrap()
    }

    #[test]
    fn test_unconstrained_keeps_everything() {
        let table = sample_table();
        let spec = FilterSpec::default();
        assert!(spec.is_unconstrained());
        assert_eq!(spec.apply(&table).len(), table.len());
    }

    #[test]
    fn test_all_sentinel_means_unconstrained() {
        let table = sample_table();
        let spec = FilterSpec {
            category: Some("All".into()),
            ..Default::default()
        };
        assert_eq!(spec.apply(&table).len(), table.len());
    }

    #[test]
    fn test_category_filter_and_order() {
        let table = sample_table();
        let spec = FilterSpec {
            category: Some("Electronics".into()),
            ..Default::default()
        };
        let out = spec.apply(&table);
        assert_eq!(out.len(), 3);
        assert!(out
            .rows
            .iter()
            .all(|r| r.category.as_deref() == Some("Electronics")));
        // Original order preserved
        assert_eq!(out.rows[0].total, Some(10.0));
        assert_eq!(out.rows[1].total, Some(30.0));
    }

    #[test]
    fn test_predicates_and_combine() {
        let table = sample_table();
        let spec = FilterSpec {
            category: Some("Electronics".into()),
            customer_type: Some("Normal".into()),
            ..Default::default()
        };
        let out = spec.apply(&table);
        assert_eq!(out.len(), 1);
        assert_eq!(out.rows[0].total, Some(30.0));
    }

    #[test]
    fn test_date_range_inclusive_and_absent_excluded() {
        let table = sample_table();
        let spec = FilterSpec {
            date_range: Some((
                NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2023, 1, 2).unwrap(),
            )),
            ..Default::default()
        };
        let out = spec.apply(&table);
        // Both endpoints kept, undated row excluded
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_idempotent() {
        let table = sample_table();
        let spec = FilterSpec {
            gender: Some("Male".into()),
            date_range: Some((
                NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2023, 1, 3).unwrap(),
            )),
            ..Default::default()
        };
        let once = spec.apply(&table);
        let twice = spec.apply(&once);
        assert_eq!(once.rows, twice.rows);
    }
}
