//! Training driver: joins sales with demographics, fits the boosted tree
//! model and exports the artifacts the pricing API serves.

mod booster;
mod dataset;
mod metrics;

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use pricing_api::artifacts::{FEATURES_FILE, MODEL_FILE};
use pricing_api::regressor::GradientBoostedRegressor;
use pricing_api::table::{DemographicsTable, Table};
use pricing_api::vectorizer::FeatureSpec;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::booster::BoostingParams;

const TARGET: &str = "price";
const IMPORTANCES_FILE: &str = "feature_importances.json";
const TOP_IMPORTANCES: usize = 20;

#[derive(Parser, Debug)]
#[command(name = "pricing-trainer")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Train the house price model and export serving artifacts", long_about = None)]
struct Cli {
    /// Sales CSV, one row per sold house
    #[arg(long, default_value = "data/kc_house_data.csv")]
    sales: PathBuf,

    /// Demographics CSV keyed by zipcode
    #[arg(long, default_value = "data/zipcode_demographics.csv")]
    demographics: PathBuf,

    /// Directory receiving the model and feature list
    #[arg(long, default_value = "model")]
    model_dir: PathBuf,

    /// Fraction of rows held out for evaluation
    #[arg(long, default_value_t = 0.2)]
    test_size: f64,

    /// Seed for the split and the booster
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Number of boosting rounds
    #[arg(long, default_value_t = 200)]
    n_estimators: u32,

    /// Maximum tree depth
    #[arg(long, default_value_t = 3)]
    max_depth: u32,

    /// Shrinkage applied to every tree
    #[arg(long, default_value_t = 0.1)]
    learning_rate: f32,

    /// Fraction of training rows sampled per round
    #[arg(long, default_value_t = 1.0)]
    subsample: f32,

    /// Minimum hessian weight per leaf; one row weighs 1 under squared error
    #[arg(long, default_value_t = 1.0)]
    min_child_weight: f32,
}

impl Cli {
    fn boosting_params(&self) -> BoostingParams {
        BoostingParams {
            n_estimators: self.n_estimators,
            max_depth: self.max_depth,
            learning_rate: self.learning_rate,
            subsample: self.subsample,
            min_child_weight: self.min_child_weight,
            seed: self.seed,
        }
    }
}

#[derive(Serialize)]
struct Importance<'a> {
    feature: &'a str,
    importance: f64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    run(&cli)
}

fn run(cli: &Cli) -> Result<()> {
    ensure!(
        (0.0..1.0).contains(&cli.test_size),
        "test size must be in [0, 1)"
    );
    let started = Instant::now();
    info!(sales = %cli.sales.display(), demographics = %cli.demographics.display(), "loading data");

    let sales = Table::from_path(&cli.sales)
        .with_context(|| format!("failed to read {}", cli.sales.display()))?;
    let demographics = DemographicsTable::from_path(&cli.demographics)
        .with_context(|| format!("failed to read {}", cli.demographics.display()))?;

    let data = dataset::prepare(&sales, &demographics, TARGET)?;
    let (train, test) = dataset::train_test_split(data.len(), cli.test_size, cli.seed);
    ensure!(!train.is_empty(), "no rows left for training");
    let (x_train, y_train) = data.subset(&train);
    let (x_test, y_test) = data.subset(&test);
    info!(train = train.len(), test = test.len(), "split data");

    let fitted = booster::fit(&x_train, &y_train, &cli.boosting_params())?;

    let predictions = x_test
        .iter()
        .map(|row| fitted.model.predict_row(row))
        .collect::<Result<Vec<_>, _>>()?;
    match metrics::evaluate(&y_test, &predictions) {
        Some(m) => info!(rmse = m.rmse, mae = m.mae, r2 = m.r2, "test metrics"),
        None => warn!("empty test split, skipping evaluation"),
    }

    export(&cli.model_dir, &fitted.model, &data.features, &fitted.importances)?;
    info!(
        model_dir = %cli.model_dir.display(),
        elapsed_s = started.elapsed().as_secs(),
        "artifacts exported"
    );
    Ok(())
}

fn export(
    dir: &Path,
    model: &GradientBoostedRegressor,
    features: &FeatureSpec,
    importances: &[f64],
) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("failed to create {}", dir.display()))?;

    model
        .save(&dir.join(MODEL_FILE))
        .context("failed to write model")?;
    features
        .save(&dir.join(FEATURES_FILE))
        .context("failed to write feature list")?;

    let mut ranked: Vec<Importance> = features
        .names()
        .iter()
        .zip(importances)
        .map(|(feature, &importance)| Importance {
            feature,
            importance,
        })
        .collect();
    ranked.sort_by(|a, b| b.importance.total_cmp(&a.importance));
    ranked.truncate(TOP_IMPORTANCES);
    fs::write(
        dir.join(IMPORTANCES_FILE),
        serde_json::to_vec_pretty(&ranked)?,
    )
    .context("failed to write feature importances")?;

    Ok(())
}
