//! Customer churn labeling and prediction
//!
//! A customer counts as churned when their recency exceeds a fixed
//! threshold relative to the latest date observed in the current filtered
//! population. A decision tree is trained on the engineered features with
//! a seeded, stratified train/test split; accuracy is reported on the
//! held-out rows only.

use linfa::prelude::*;
use linfa_trees::DecisionTree;
use log::{debug, info};
use ndarray::{Array1, Array2};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use serde::Serialize;

use crate::error::AnalyticsError;
use crate::features::{FeatureTable, FEATURE_NAMES};

/// Recency (in days) past which a customer is labeled churned.
pub const CHURN_RECENCY_DAYS: f64 = 90.0;

/// Fraction of the population held out for evaluation.
pub const TEST_FRACTION: f64 = 0.2;

/// Smallest population the classifier will train on.
pub const MIN_CHURN_SAMPLES: usize = 10;

const MAX_TREE_DEPTH: usize = 8;

/// Churn analysis output.
#[derive(Debug, Clone, Serialize)]
pub struct ChurnResult {
    /// Fraction of the population labeled churned.
    pub churn_rate: f64,
    pub retention_rate: f64,
    pub churn_count: usize,
    pub total_customers: usize,
    /// Accuracy on the held-out test split.
    pub accuracy: f64,
    pub test_size: usize,
    /// Feature names, parallel to `importances`.
    pub features: Vec<String>,
    /// Non-negative weights summing to 1.
    pub importances: Vec<f64>,
}

/// Label every customer: true means churned.
pub fn churn_labels(features: &FeatureTable) -> Vec<bool> {
    features
        .customers
        .iter()
        .map(|c| c.recency > CHURN_RECENCY_DAYS)
        .collect()
}

/// Stratified index split: shuffle each class separately and hold out
/// roughly `TEST_FRACTION` of it, keeping at least one training row per
/// class so the classifier always sees both labels.
fn stratified_split(labels: &[bool], rng: &mut Xoshiro256Plus) -> (Vec<usize>, Vec<usize>) {
    let mut train = Vec::new();
    let mut test = Vec::new();
    for class in [false, true] {
        let mut indices: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, &l)| l == class)
            .map(|(i, _)| i)
            .collect();
        indices.shuffle(rng);
        let class_size = indices.len();
        let mut held_out = ((class_size as f64) * TEST_FRACTION).round() as usize;
        if class_size > 1 {
            held_out = held_out.clamp(1, class_size - 1);
        } else {
            held_out = 0;
        }
        test.extend_from_slice(&indices[..held_out]);
        train.extend_from_slice(&indices[held_out..]);
    }
    (train, test)
}

fn select_rows(matrix: &Array2<f64>, indices: &[usize]) -> Array2<f64> {
    let cols = matrix.ncols();
    let mut out = Array2::zeros((indices.len(), cols));
    for (row, &idx) in indices.iter().enumerate() {
        for j in 0..cols {
            out[[row, j]] = matrix[[idx, j]];
        }
    }
    out
}

/// Train a churn classifier over the current population.
///
/// # Errors
/// * [`AnalyticsError::InsufficientData`] when the population is smaller
///   than [`MIN_CHURN_SAMPLES`] or only one class is present
pub fn predict_churn(features: &FeatureTable, seed: u64) -> crate::Result<ChurnResult> {
    let total_customers = features.len();
    if total_customers < MIN_CHURN_SAMPLES {
        return Err(AnalyticsError::InsufficientData(format!(
            "{total_customers} customers, need at least {MIN_CHURN_SAMPLES}"
        )));
    }

    let labels = churn_labels(features);
    let churn_count = labels.iter().filter(|&&l| l).count();
    if churn_count == 0 || churn_count == total_customers {
        return Err(AnalyticsError::InsufficientData(
            "population is single-class; cannot train a binary classifier".into(),
        ));
    }
    let churn_rate = churn_count as f64 / total_customers as f64;

    let mut rng = Xoshiro256Plus::seed_from_u64(seed);
    let (train_idx, test_idx) = stratified_split(&labels, &mut rng);
    debug!(
        "churn split: {} train / {} test ({} churned of {total_customers})",
        train_idx.len(),
        test_idx.len(),
        churn_count
    );

    let matrix = features.matrix();
    let train_targets: Array1<usize> =
        Array1::from_iter(train_idx.iter().map(|&i| labels[i] as usize));
    let train_set = Dataset::new(select_rows(&matrix, &train_idx), train_targets);

    let model = DecisionTree::params()
        .max_depth(Some(MAX_TREE_DEPTH))
        .fit(&train_set)
        .map_err(|e| AnalyticsError::InsufficientData(format!("classifier fit failed: {e}")))?;

    let test_targets: Vec<usize> = test_idx.iter().map(|&i| labels[i] as usize).collect();
    let test_set = Dataset::new(
        select_rows(&matrix, &test_idx),
        Array1::from_iter(test_targets.iter().copied()),
    );
    let predictions = model.predict(&test_set);
    let correct = predictions
        .iter()
        .zip(test_targets.iter())
        .filter(|(p, t)| p == t)
        .count();
    let test_size = test_idx.len();
    let accuracy = if test_size > 0 {
        correct as f64 / test_size as f64
    } else {
        0.0
    };
    info!("churn model accuracy {accuracy:.3} on {test_size} held-out customers");

    // Normalize importances; a degenerate tree (single split or none) gets
    // a uniform attribution instead of all zeros
    let mut importances = model.feature_importance();
    let sum: f64 = importances.iter().sum();
    if sum > 0.0 {
        for imp in importances.iter_mut() {
            *imp /= sum;
        }
    } else {
        let uniform = 1.0 / FEATURE_NAMES.len() as f64;
        importances = vec![uniform; FEATURE_NAMES.len()];
    }

    Ok(ChurnResult {
        churn_rate,
        retention_rate: 1.0 - churn_rate,
        churn_count,
        total_customers,
        accuracy,
        test_size,
        features: FEATURE_NAMES.iter().map(|n| (*n).to_string()).collect(),
        importances,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::CustomerFeatures;
    use chrono::NaiveDate;

    fn customer(id: usize, recency: f64, monetary: f64) -> CustomerFeatures {
        CustomerFeatures {
            identity: format!("C{id}"),
            recency,
            frequency: 2.0 + (id % 3) as f64,
            monetary_total: monetary,
            monetary_mean: monetary / 2.0,
            quantity_mean: 1.0 + (id % 4) as f64,
        }
    }

    fn population(active: usize, lapsed: usize) -> FeatureTable {
        let mut customers = Vec::new();
        for i in 0..active {
            customers.push(customer(i, 5.0 + i as f64, 500.0 + 10.0 * i as f64));
        }
        for i in 0..lapsed {
            customers.push(customer(active + i, 120.0 + i as f64, 50.0 + 5.0 * i as f64));
        }
        FeatureTable {
            customers,
            synthetic_identity: false,
            reference_date: NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
        }
    }

    #[test]
    fn test_labels_follow_threshold() {
        let features = population(3, 2);
        let labels = churn_labels(&features);
        assert_eq!(labels, vec![false, false, false, true, true]);
    }

    #[test]
    fn test_importances_sum_to_one() {
        let features = population(8, 8);
        let result = predict_churn(&features, 42).unwrap();
        let sum: f64 = result.importances.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
        assert!(result.importances.iter().all(|&i| i >= 0.0));
        assert_eq!(result.features.len(), result.importances.len());
    }

    #[test]
    fn test_accuracy_in_unit_interval() {
        let features = population(10, 6);
        let result = predict_churn(&features, 42).unwrap();
        assert!((0.0..=1.0).contains(&result.accuracy));
        assert!(result.test_size > 0);
        assert_eq!(result.total_customers, 16);
        assert_eq!(result.churn_count, 6);
        assert!((result.churn_rate - 6.0 / 16.0).abs() < 1e-12);
        assert!((result.churn_rate + result.retention_rate - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_too_few_samples_rejected() {
        let features = population(4, 4);
        let err = predict_churn(&features, 42).unwrap_err();
        assert!(matches!(err, AnalyticsError::InsufficientData(_)));
    }

    #[test]
    fn test_single_class_rejected() {
        let features = population(12, 0);
        let err = predict_churn(&features, 42).unwrap_err();
        assert!(matches!(err, AnalyticsError::InsufficientData(_)));
    }

    #[test]
    fn test_split_keeps_both_classes_in_training() {
        let labels = vec![false, false, false, false, false, false, false, false, true, true];
        let mut rng = Xoshiro256Plus::seed_from_u64(1);
        let (train, test) = stratified_split(&labels, &mut rng);
        assert_eq!(train.len() + test.len(), labels.len());
        assert!(train.iter().any(|&i| labels[i]));
        assert!(train.iter().any(|&i| !labels[i]));
        assert!(!test.is_empty());
    }
}
