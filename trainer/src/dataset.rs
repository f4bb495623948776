//! Builds the training matrix through the same join and projection the API
//! applies at serving time.

use anyhow::{ensure, Context, Result};
use pricing_api::table::{region_code, DemographicsTable, Table, JOIN_KEY};
use pricing_api::vectorizer::{join_row, numeric, FeatureSpec, Vectorizer};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use tracing::{info, warn};

/// Columns never used as features besides the target.
pub const IDENTIFIER_COLUMNS: [&str; 1] = ["id"];

pub struct Dataset {
    pub features: FeatureSpec,
    pub x: Vec<Vec<f64>>,
    pub y: Vec<f64>,
}

impl Dataset {
    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn subset(&self, indices: &[usize]) -> (Vec<Vec<f64>>, Vec<f64>) {
        indices
            .iter()
            .map(|&i| (self.x[i].clone(), self.y[i]))
            .unzip()
    }
}

/// Joins sales with demographics, picks the numeric feature columns and
/// vectorizes every sale. Sales whose zipcode has no demographics row are
/// dropped.
pub fn prepare(sales: &Table, demographics: &DemographicsTable, target: &str) -> Result<Dataset> {
    ensure!(sales.has_column(JOIN_KEY), "sales data has no `{JOIN_KEY}` column");
    ensure!(sales.has_column(target), "sales data has no `{target}` column");

    let mut matched = Table {
        columns: sales.columns.clone(),
        rows: Vec::with_capacity(sales.len()),
    };
    for row in &sales.rows {
        let known = row
            .get(JOIN_KEY)
            .and_then(region_code)
            .is_some_and(|zipcode| demographics.contains(zipcode));
        if known {
            matched.rows.push(row.clone());
        }
    }
    let dropped = sales.len() - matched.len();
    if dropped > 0 {
        warn!(dropped, "sales without a demographics row were left out");
    }
    ensure!(!matched.is_empty(), "no sales matched the demographics table");

    let features = select_features(&matched, demographics, target);
    ensure!(!features.is_empty(), "no numeric feature columns after the join");
    info!(rows = matched.len(), features = features.len(), "joined sales with demographics");

    let x = Vectorizer::new(&features, demographics)
        .vectorize_batch(&matched)
        .context("failed to vectorize sales")?
        .into_rows();
    let y = matched
        .rows
        .iter()
        .enumerate()
        .map(|(index, row)| {
            row.get(target)
                .and_then(numeric)
                .with_context(|| format!("row {}: `{target}` is not numeric", index + 1))
        })
        .collect::<Result<_>>()?;

    Ok(Dataset { features, x, y })
}

/// Joined columns (sales first, then demographics) holding only numbers,
/// minus the target and identifier columns.
pub fn select_features(
    sales: &Table,
    demographics: &DemographicsTable,
    target: &str,
) -> FeatureSpec {
    let mut columns = sales.columns.clone();
    for column in demographics.columns() {
        if !columns.contains(column) {
            columns.push(column.clone());
        }
    }

    let joined: Vec<_> = sales
        .rows
        .iter()
        .filter_map(|row| {
            let zipcode = row.get(JOIN_KEY).and_then(region_code)?;
            Some(join_row(row, zipcode, demographics.get(zipcode)?))
        })
        .collect();

    let names = columns
        .into_iter()
        .filter(|column| column != target && !IDENTIFIER_COLUMNS.contains(&column.as_str()))
        .filter(|column| {
            joined
                .iter()
                .all(|row| row.get(column).and_then(numeric).is_some())
        })
        .collect();
    FeatureSpec::new(names)
}

/// Seeded shuffle split; the first `ceil(n * test_size)` shuffled rows form
/// the test set.
pub fn train_test_split(n: usize, test_size: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let test_len = ((n as f64) * test_size).ceil() as usize;
    let train = indices.split_off(test_len.min(n));
    (train, indices)
}
