//! Applies the model to vectorized input and shapes the responses.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde_json::Value;
use tracing::{debug, warn};

use crate::artifacts::Artifacts;
use crate::error::ApiError;
use crate::model::Prediction;
use crate::table::{Record, Table, TableError};

pub const PREDICTION_COLUMN: &str = "prediction";
const TIMESTAMP_COLUMN: &str = "_ts";

pub fn predict_one(
    artifacts: &Artifacts,
    model_version: &str,
    record: &Record,
) -> Result<Prediction, ApiError> {
    let started = Instant::now();
    let ready = artifacts.ready()?;
    let matrix = ready.vectorizer().vectorize_one(record)?;
    let prediction = ready
        .model
        .predict(&matrix)?
        .first()
        .copied()
        .ok_or_else(|| ApiError::Internal("model returned no prediction".into()))?;

    Ok(Prediction {
        prediction,
        model_version: model_version.to_string(),
        features_used: ready.features.names().to_vec(),
        timing_ms: elapsed_ms(started),
    })
}

/// Input rows in input order, each with a `prediction` column appended.
pub fn predict_batch(artifacts: &Artifacts, input: &Table) -> Result<Table, ApiError> {
    let started = Instant::now();
    let ready = artifacts.ready()?;
    let matrix = ready.vectorizer().vectorize_batch(input)?;
    let predictions = ready.model.predict(&matrix)?;

    let mut output = input.clone();
    output.set_column(PREDICTION_COLUMN, predictions.into_iter().map(Value::from));
    debug!(rows = output.len(), elapsed_ms = elapsed_ms(started), "batch predicted");
    Ok(output)
}

/// Writes `batch_{ts}.csv` into `dir` with a `_ts` column added.
pub fn write_batch_log(dir: &Path, output: &Table, ts: i64) -> Result<PathBuf, TableError> {
    fs::create_dir_all(dir)?;
    let mut logged = output.clone();
    logged.set_column(TIMESTAMP_COLUMN, std::iter::repeat(Value::from(ts)));

    let path = dir.join(format!("batch_{ts}.csv"));
    logged.write_csv(fs::File::create(&path)?)?;
    Ok(path)
}

/// Fire-and-forget batch log on the blocking pool; failures are only logged.
pub fn spawn_batch_log(dir: PathBuf, output: Table) {
    let ts = chrono::Utc::now().timestamp();
    tokio::task::spawn_blocking(move || match write_batch_log(&dir, &output, ts) {
        Ok(path) => debug!(path = %path.display(), "batch request logged"),
        Err(e) => warn!(dir = %dir.display(), error = %e, "failed to write batch log"),
    });
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
