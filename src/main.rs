//! ShopSight CLI: retail analytics over a sales CSV
//!
//! This is the main entrypoint that orchestrates loading, filtering,
//! segmentation, churn prediction, forecasting and insight generation.

use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use shopsight::{
    build_customer_features, forecast, load_csv, predict_churn, segment,
    summarize_correlations, Args,
};

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();

    if args.verbose {
        println!("ShopSight - Retail Transaction Analytics");
        println!("========================================\n");
    }

    let start_time = Instant::now();

    // Step 1: Load and normalize the data
    let bytes = std::fs::read(&args.input)
        .with_context(|| format!("could not read input file {}", args.input))?;
    let table = load_csv(&bytes, args.encoding_hint()?)?;
    println!("✓ Data loaded: {} rows", table.len());
    if args.verbose && !table.extra_columns.is_empty() {
        println!("  Unrecognized columns retained: {}", table.extra_columns.join(", "));
    }

    // Step 2: Apply filters
    let spec = args.filter_spec()?;
    let filtered = spec.apply(&table);
    if !spec.is_unconstrained() {
        println!("✓ Filters applied: {} of {} rows kept", filtered.len(), table.len());
    }

    let mut bundle = serde_json::Map::new();

    // Step 3: Customer features, segmentation, churn
    match build_customer_features(&filtered) {
        Ok(features) => {
            println!("✓ Features built for {} customers", features.len());
            if features.synthetic_identity {
                println!("  (no customer id column; treating each transaction as a customer)");
            }

            match segment(&features, args.clusters, args.seed) {
                Ok(result) => {
                    println!("\n=== Customer Segments (k={}) ===", result.k);
                    for cluster in &result.clusters {
                        println!(
                            "Cluster {}: {} customers, avg spend {:.2}, avg recency {:.1} days",
                            cluster.cluster_id,
                            cluster.member_count,
                            cluster.feature_means["monetary_mean"],
                            cluster.feature_means["recency"],
                        );
                    }
                    if args.verbose {
                        println!("Within-cluster sum of squares: {:.2}", result.inertia);
                    }
                    bundle.insert("segmentation".into(), serde_json::to_value(&result)?);
                }
                Err(e) => println!("✗ Segmentation unavailable: {e}"),
            }

            match predict_churn(&features, args.seed) {
                Ok(result) => {
                    println!("\n=== Churn Prediction ===");
                    println!(
                        "Churn rate: {:.1}% ({} of {} customers)",
                        result.churn_rate * 100.0,
                        result.churn_count,
                        result.total_customers
                    );
                    println!(
                        "Model accuracy: {:.1}% on {} held-out customers",
                        result.accuracy * 100.0,
                        result.test_size
                    );
                    if args.verbose {
                        for (name, importance) in
                            result.features.iter().zip(result.importances.iter())
                        {
                            println!("  {name}: {importance:.3}");
                        }
                    }
                    bundle.insert("churn".into(), serde_json::to_value(&result)?);
                }
                Err(e) => println!("✗ Churn prediction unavailable: {e}"),
            }
        }
        Err(e) => println!("✗ Customer analytics unavailable: {e}"),
    }

    // Step 4: Sales forecast
    match forecast(&filtered, args.periods, args.seasonality()) {
        Ok(result) => {
            println!("\n=== Sales Forecast ===");
            let first_future = result.dates.len() - result.periods;
            println!(
                "Projected {} days beyond {}",
                result.periods,
                result.dates[first_future - 1]
            );
            if args.verbose {
                for i in first_future..result.dates.len() {
                    println!(
                        "  {}: {:.2} [{:.2}, {:.2}]",
                        result.dates[i],
                        result.predicted[i],
                        result.lower_bound[i],
                        result.upper_bound[i]
                    );
                }
            }
            bundle.insert("forecast".into(), serde_json::to_value(&result)?);
        }
        Err(e) => println!("✗ Forecast unavailable: {e}"),
    }

    // Step 5: Insights
    let report = summarize_correlations(&filtered);
    println!("\n=== Insights ===");
    for insight in &report.insights {
        println!("- {insight}");
    }
    bundle.insert("insights".into(), serde_json::to_value(&report)?);

    if let Some(path) = &args.json {
        std::fs::write(path, serde_json::to_string_pretty(&bundle)?)
            .with_context(|| format!("could not write JSON output to {path}"))?;
        println!("\nResults written to {path}");
    }

    println!("\nTotal processing time: {:.2}s", start_time.elapsed().as_secs_f64());
    Ok(())
}
