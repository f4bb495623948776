use std::fs;
use std::sync::Arc;

use anyhow::Context;
use pricing_api::app::{self, AppState};
use pricing_api::artifacts::{ArtifactPaths, ArtifactStore};
use pricing_api::config::Settings;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = Settings::from_env();
    let paths = ArtifactPaths::under(&settings.root);
    if let Err(e) = fs::create_dir_all(&paths.logs) {
        warn!(path = %paths.logs.display(), error = %e, "cannot create batch log directory");
    }

    let artifacts = Arc::new(ArtifactStore::new(paths));
    if let Err(e) = artifacts.ensure_loaded().ready() {
        warn!(error = %e, "starting without a complete set of artifacts");
    }

    let bind = settings.bind.clone();
    let state = AppState {
        artifacts,
        settings: Arc::new(settings),
    };

    let app = app::create_router(state);
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(addr = %bind, "pricing api listening");

    axum::serve(listener, app).await?;

    Ok(())
}
