use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::{
    routing::{get, post},
    Router,
};

use crate::artifacts::ArtifactStore;
use crate::config::Settings;
use crate::handler::{healthz, metadata, predict, predict_batch, predict_min};

/// Largest accepted batch upload.
const BATCH_BODY_LIMIT: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub artifacts: Arc<ArtifactStore>,
    pub settings: Arc<Settings>,
}

pub fn create_router(app_state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/metadata", get(metadata))
        .route("/predict", post(predict))
        .route("/predict_min", post(predict_min))
        .route(
            "/predict_batch",
            post(predict_batch).layer(DefaultBodyLimit::max(BATCH_BODY_LIMIT)),
        );

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", api_routes)
        .with_state(app_state)
}
