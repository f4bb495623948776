use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::artifacts::ArtifactPaths;
use crate::table::{Record, JOIN_KEY};
use crate::vectorizer::FeatureSpec;

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Prediction {
    pub prediction: f64,
    pub model_version: String,
    pub features_used: Vec<String>,
    pub timing_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct BatchPredictions {
    pub count: usize,
    pub predictions: Vec<Record>, // input row plus `prediction`
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct Metadata {
    pub model_version: String,
    pub demographics_join_key: String,
    pub artifacts_present: BTreeMap<String, bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<String>>,
}

impl Metadata {
    /// Reads presence and the feature list from disk on every call.
    pub fn collect(paths: &ArtifactPaths, model_version: &str) -> Self {
        let features = paths
            .features
            .is_file()
            .then(|| FeatureSpec::from_path(&paths.features))
            .and_then(|loaded| {
                loaded
                    .map_err(|e| warn!(error = %e, "feature list present but unreadable"))
                    .ok()
            })
            .map(|spec| spec.names().to_vec());

        Self {
            model_version: model_version.to_string(),
            demographics_join_key: JOIN_KEY.to_string(),
            artifacts_present: paths.presence(),
            features,
        }
    }
}
