//! Customer segmentation via K-Means clustering
//!
//! Features are standardized over the current population (zero mean, unit
//! variance per column) before fitting; a pretrained scaler would be wrong
//! here because filters change the population on every request. Cluster
//! ids are relabeled in ascending order of the centroid's monetary mean so
//! that "cluster 0" stays the low-spend segment across presentations.

use std::collections::BTreeMap;

use linfa::prelude::*;
use linfa_clustering::KMeans;
use linfa_nn::distance::L2Dist;
use log::debug;
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256Plus;
use serde::Serialize;

use crate::error::AnalyticsError;
use crate::features::{FeatureTable, FEATURE_NAMES};

/// Iteration bound for Lloyd's algorithm; past it the best-effort
/// assignment is returned rather than an error.
pub const MAX_ITERATIONS: u64 = 100;

const TOLERANCE: f64 = 1e-4;

/// Column index of `monetary_mean` in the feature matrix, used to order
/// cluster ids.
const PRIMARY_FEATURE: usize = 3;

/// Summary statistics for one cluster, in raw (unstandardized) units.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterSummary {
    pub cluster_id: usize,
    pub member_count: usize,
    pub feature_means: BTreeMap<String, f64>,
    pub feature_sums: BTreeMap<String, f64>,
}

/// Segmentation output. Cluster ids are stable only within one run.
#[derive(Debug, Clone, Serialize)]
pub struct ClusterResult {
    pub k: usize,
    pub clusters: Vec<ClusterSummary>,
    /// Cluster id per customer, parallel to the input feature table.
    pub assignments: Vec<usize>,
    /// Within-cluster sum of squares in standardized space.
    pub inertia: f64,
}

/// Standardize each column to zero mean and unit variance over the current
/// population. A constant column standardizes to all zeros.
fn standardize(matrix: &Array2<f64>) -> Array2<f64> {
    let mut scaled = matrix.clone();
    for j in 0..matrix.ncols() {
        let column = matrix.column(j);
        let mean = column.mean().unwrap_or(0.0);
        let variance =
            column.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / column.len() as f64;
        let std_dev = variance.sqrt();
        for i in 0..matrix.nrows() {
            scaled[[i, j]] = if std_dev > 0.0 {
                (matrix[[i, j]] - mean) / std_dev
            } else {
                0.0
            };
        }
    }
    scaled
}

/// Compute within-cluster sum of squares against per-cluster means.
fn compute_inertia(scaled: &Array2<f64>, labels: &[usize], k: usize) -> f64 {
    let cols = scaled.ncols();
    let mut centroids = vec![vec![0.0; cols]; k];
    let mut counts = vec![0usize; k];
    for (i, &label) in labels.iter().enumerate() {
        counts[label] += 1;
        for j in 0..cols {
            centroids[label][j] += scaled[[i, j]];
        }
    }
    for (centroid, &count) in centroids.iter_mut().zip(counts.iter()) {
        if count > 0 {
            for value in centroid.iter_mut() {
                *value /= count as f64;
            }
        }
    }

    let mut inertia = 0.0;
    for (i, &label) in labels.iter().enumerate() {
        for j in 0..cols {
            inertia += (scaled[[i, j]] - centroids[label][j]).powi(2);
        }
    }
    inertia
}

/// Segment the population into `k` clusters.
///
/// # Arguments
/// * `features` - per-customer feature vectors for the current population
/// * `k` - cluster count, `1 <= k <= population`
/// * `seed` - rng seed for centroid initialization; same seed, same input,
///   same clusters
///
/// # Errors
/// * [`AnalyticsError::Parameter`] when `k` is out of range
pub fn segment(features: &FeatureTable, k: usize, seed: u64) -> crate::Result<ClusterResult> {
    let population = features.len();
    if k < 1 {
        return Err(AnalyticsError::Parameter {
            name: "k",
            reason: "cluster count must be at least 1".into(),
        });
    }
    if k > population {
        return Err(AnalyticsError::Parameter {
            name: "k",
            reason: format!("cluster count {k} exceeds population {population}"),
        });
    }

    let raw = features.matrix();
    let scaled = standardize(&raw);

    let dataset = Dataset::new(scaled.clone(), Array1::<usize>::zeros(population));
    let rng = Xoshiro256Plus::seed_from_u64(seed);
    let model = KMeans::params_with(k, rng, L2Dist)
        .max_n_iterations(MAX_ITERATIONS)
        .tolerance(TOLERANCE)
        .fit(&dataset)
        .map_err(|e| AnalyticsError::InsufficientData(format!("k-means fit failed: {e}")))?;
    let labels = model.predict(&dataset);
    debug!("k-means fitted with k={k} over {population} customers");

    // Per-cluster sums and counts in raw units
    let cols = raw.ncols();
    let mut sums = vec![vec![0.0; cols]; k];
    let mut counts = vec![0usize; k];
    for (i, &label) in labels.iter().enumerate() {
        counts[label] += 1;
        for j in 0..cols {
            sums[label][j] += raw[[i, j]];
        }
    }

    // Relabel ascending by the primary feature's mean; ties keep the lower
    // original index first
    let mut order: Vec<usize> = (0..k).collect();
    order.sort_by(|&a, &b| {
        let mean_a = if counts[a] > 0 {
            sums[a][PRIMARY_FEATURE] / counts[a] as f64
        } else {
            f64::INFINITY
        };
        let mean_b = if counts[b] > 0 {
            sums[b][PRIMARY_FEATURE] / counts[b] as f64
        } else {
            f64::INFINITY
        };
        mean_a
            .partial_cmp(&mean_b)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.cmp(&b))
    });
    let mut relabel = vec![0usize; k];
    for (new_id, &old_id) in order.iter().enumerate() {
        relabel[old_id] = new_id;
    }

    let assignments: Vec<usize> = labels.iter().map(|&l| relabel[l]).collect();

    let clusters: Vec<ClusterSummary> = order
        .iter()
        .enumerate()
        .map(|(new_id, &old_id)| {
            let member_count = counts[old_id];
            let mut feature_means = BTreeMap::new();
            let mut feature_sums = BTreeMap::new();
            for (j, name) in FEATURE_NAMES.iter().enumerate() {
                let sum = sums[old_id][j];
                feature_sums.insert((*name).to_string(), sum);
                let mean = if member_count > 0 {
                    sum / member_count as f64
                } else {
                    0.0
                };
                feature_means.insert((*name).to_string(), mean);
            }
            ClusterSummary {
                cluster_id: new_id,
                member_count,
                feature_means,
                feature_sums,
            }
        })
        .collect();

    let inertia = compute_inertia(&scaled, &assignments, k);

    Ok(ClusterResult {
        k,
        clusters,
        assignments,
        inertia,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::CustomerFeatures;
    use chrono::NaiveDate;

    fn feature_table(rows: &[(f64, f64, f64, f64, f64)]) -> FeatureTable {
        FeatureTable {
            customers: rows
                .iter()
                .enumerate()
                .map(|(i, &(r, f, mt, mm, qm))| CustomerFeatures {
                    identity: format!("C{i}"),
                    recency: r,
                    frequency: f,
                    monetary_total: mt,
                    monetary_mean: mm,
                    quantity_mean: qm,
                })
                .collect(),
            synthetic_identity: false,
            reference_date: NaiveDate::from_ymd_opt(2023, 6, 1).unwrap(),
        }
    }

    fn two_blobs() -> FeatureTable {
        feature_table(&[
            (1.0, 10.0, 1000.0, 100.0, 5.0),
            (2.0, 9.0, 980.0, 98.0, 5.0),
            (3.0, 11.0, 1020.0, 102.0, 6.0),
            (90.0, 1.0, 50.0, 50.0, 1.0),
            (95.0, 2.0, 60.0, 30.0, 1.0),
            (100.0, 1.0, 40.0, 40.0, 2.0),
        ])
    }

    #[test]
    fn test_k_of_one_puts_everyone_together() {
        let features = two_blobs();
        let result = segment(&features, 1, 42).unwrap();
        assert_eq!(result.clusters.len(), 1);
        assert_eq!(result.clusters[0].member_count, 6);
        assert!(result.assignments.iter().all(|&a| a == 0));
    }

    #[test]
    fn test_k_exceeding_population_is_rejected() {
        let features = two_blobs();
        let err = segment(&features, 7, 42).unwrap_err();
        assert!(matches!(err, AnalyticsError::Parameter { name: "k", .. }));
    }

    #[test]
    fn test_member_counts_sum_to_population() {
        let features = two_blobs();
        let result = segment(&features, 2, 42).unwrap();
        let total: usize = result.clusters.iter().map(|c| c.member_count).sum();
        assert_eq!(total, 6);
        assert_eq!(result.assignments.len(), 6);
    }

    #[test]
    fn test_cluster_ids_ordered_by_monetary_mean() {
        let features = two_blobs();
        let result = segment(&features, 2, 42).unwrap();
        let means: Vec<f64> = result
            .clusters
            .iter()
            .map(|c| c.feature_means["monetary_mean"])
            .collect();
        assert!(means.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_deterministic_for_fixed_seed() {
        let features = two_blobs();
        let first = segment(&features, 2, 7).unwrap();
        let second = segment(&features, 2, 7).unwrap();
        assert_eq!(first.assignments, second.assignments);
    }

    #[test]
    fn test_inertia_non_increasing_in_k() {
        let features = two_blobs();
        let k1 = segment(&features, 1, 42).unwrap();
        let k2 = segment(&features, 2, 42).unwrap();
        let k3 = segment(&features, 3, 42).unwrap();
        assert!(k2.inertia <= k1.inertia + 1e-9);
        assert!(k3.inertia <= k2.inertia + 1e-9);
        assert!(k1.inertia.is_finite());
    }
}
