use std::sync::Arc;

use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_TYPE};
use axum::{
    extract::{Json, Multipart, Query, State},
    response::{IntoResponse, Response},
};
use serde_json::Value;
use tracing::{debug, info};

use crate::app::AppState;
use crate::artifacts::{ArtifactStore, Artifacts};
use crate::error::ApiError;
use crate::model::{BatchPredictions, Metadata, Prediction};
use crate::predictor::{self, spawn_batch_log};
use crate::schema::{BatchPredictionOptions, HouseRecord, OutputFormat};
use crate::table::{Record, Table, JOIN_KEY};

const UPLOAD_FIELD: &str = "file";
const ACCEPTED_CONTENT_TYPES: [&str; 3] = [
    "text/csv",
    "application/vnd.ms-excel",
    "application/octet-stream",
];

/// Loaded artifacts, reading any missing ones from disk on the blocking pool.
async fn load_artifacts(store: &Arc<ArtifactStore>) -> Result<Artifacts, ApiError> {
    let current = store.snapshot();
    if current.is_complete() {
        return Ok(current);
    }
    let store = store.clone();
    tokio::task::spawn_blocking(move || store.ensure_loaded())
        .await
        .map_err(|e| ApiError::Internal(format!("artifact load task failed: {e}")))
}

pub async fn healthz() -> Json<Value> {
    Json(serde_json::json!({"status": "ok"}))
}

pub async fn metadata(State(state): State<AppState>) -> Result<Json<Metadata>, ApiError> {
    load_artifacts(&state.artifacts).await?;
    let paths = state.artifacts.paths().clone();
    let settings = state.settings.clone();
    let metadata =
        tokio::task::spawn_blocking(move || Metadata::collect(&paths, &settings.model_version))
            .await
            .map_err(|e| ApiError::Internal(format!("metadata task failed: {e}")))?;
    Ok(Json(metadata))
}

pub async fn predict(
    State(state): State<AppState>,
    house: Result<Json<HouseRecord>, JsonRejection>,
) -> Result<Json<Prediction>, ApiError> {
    let artifacts = load_artifacts(&state.artifacts).await?;
    artifacts.ready()?;
    let Json(house) = house?;
    let record = house.into_record()?;
    let prediction = predictor::predict_one(&artifacts, &state.settings.model_version, &record)?;
    debug!(zipcode = ?record.get(JOIN_KEY), prediction = prediction.prediction, "predicted");
    Ok(Json(prediction))
}

pub async fn predict_min(
    State(state): State<AppState>,
    payload: Result<Json<Record>, JsonRejection>,
) -> Result<Json<Prediction>, ApiError> {
    let artifacts = load_artifacts(&state.artifacts).await?;
    artifacts.ready()?;
    let Json(payload) = payload?;
    if !payload.contains_key(JOIN_KEY) {
        return Err(ApiError::InvalidInput(format!("{JOIN_KEY} is required")));
    }
    let prediction = predictor::predict_one(&artifacts, &state.settings.model_version, &payload)?;
    debug!(zipcode = ?payload.get(JOIN_KEY), prediction = prediction.prediction, "predicted");
    Ok(Json(prediction))
}

pub async fn predict_batch(
    State(state): State<AppState>,
    opts: Result<Query<BatchPredictionOptions>, QueryRejection>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, ApiError> {
    let artifacts = load_artifacts(&state.artifacts).await?;
    artifacts.ready()?;
    let Query(opts) = opts?;
    let mut multipart = multipart?;

    let mut upload = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::InvalidInput(format!("malformed multipart body: {e}")))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }
        if let Some(content_type) = field.content_type() {
            if !ACCEPTED_CONTENT_TYPES.contains(&content_type) {
                return Err(ApiError::InvalidInput(format!(
                    "Unsupported content type: {content_type}"
                )));
            }
        }
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::InvalidInput(format!("failed to read upload: {e}")))?;
        upload = Some(bytes);
        break;
    }
    let bytes = upload.ok_or_else(|| {
        ApiError::InvalidInput(format!("multipart field `{UPLOAD_FIELD}` is required"))
    })?;

    let output = tokio::task::spawn_blocking(move || {
        let input = Table::from_reader(bytes.as_ref())
            .map_err(|e| ApiError::InvalidInput(format!("could not parse CSV: {e}")))?;
        predictor::predict_batch(&artifacts, &input)
    })
    .await
    .map_err(|e| ApiError::Internal(format!("batch task failed: {e}")))??;
    info!(rows = output.len(), output = ?opts.output, "batch predicted");

    spawn_batch_log(state.artifacts.paths().logs.clone(), output.clone());

    match opts.output {
        OutputFormat::Json => Ok(Json(BatchPredictions {
            count: output.len(),
            predictions: output.rows,
        })
        .into_response()),
        OutputFormat::Csv => {
            let mut body = Vec::new();
            output
                .write_csv(&mut body)
                .map_err(|e| ApiError::Internal(e.to_string()))?;
            Ok((
                [
                    (CONTENT_TYPE, "text/csv"),
                    (CONTENT_DISPOSITION, "attachment; filename=predictions.csv"),
                ],
                body,
            )
                .into_response())
        }
    }
}
