//! On-disk serving artifacts and their lazy, load-once holder.

use std::collections::BTreeMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::ApiError;
use crate::regressor::GradientBoostedRegressor;
use crate::table::DemographicsTable;
use crate::vectorizer::{FeatureSpec, Vectorizer};

pub const MODEL_FILE: &str = "model.json";
pub const FEATURES_FILE: &str = "model_features.json";
pub const DEMOGRAPHICS_FILE: &str = "zipcode_demographics.csv";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub model: PathBuf,
    pub features: PathBuf,
    pub demographics: PathBuf,
    pub logs: PathBuf,
}

impl ArtifactPaths {
    /// Standard layout: `model/`, `data/` and `logs/` under `root`.
    pub fn under(root: &Path) -> Self {
        Self {
            model: root.join("model").join(MODEL_FILE),
            features: root.join("model").join(FEATURES_FILE),
            demographics: root.join("data").join(DEMOGRAPHICS_FILE),
            logs: root.join("logs"),
        }
    }

    /// Existence of each artifact file keyed by file name. The flags are
    /// read straight from disk and do not depend on each other.
    pub fn presence(&self) -> BTreeMap<String, bool> {
        [&self.model, &self.features, &self.demographics]
            .into_iter()
            .map(|path| (file_name(path), path.is_file()))
            .collect()
    }
}

/// Snapshot of whichever artifacts have been loaded so far.
#[derive(Debug, Clone, Default)]
pub struct Artifacts {
    pub model: Option<Arc<GradientBoostedRegressor>>,
    pub features: Option<Arc<FeatureSpec>>,
    pub demographics: Option<Arc<DemographicsTable>>,
}

/// All three artifacts, present.
#[derive(Debug, Clone)]
pub struct Ready {
    pub model: Arc<GradientBoostedRegressor>,
    pub features: Arc<FeatureSpec>,
    pub demographics: Arc<DemographicsTable>,
}

impl Artifacts {
    pub fn is_complete(&self) -> bool {
        self.model.is_some() && self.features.is_some() && self.demographics.is_some()
    }

    pub fn ready(&self) -> Result<Ready, ApiError> {
        match (&self.model, &self.features, &self.demographics) {
            (Some(model), Some(features), Some(demographics)) => Ok(Ready {
                model: model.clone(),
                features: features.clone(),
                demographics: demographics.clone(),
            }),
            _ => {
                let missing = [
                    (MODEL_FILE, self.model.is_none()),
                    (FEATURES_FILE, self.features.is_none()),
                    (DEMOGRAPHICS_FILE, self.demographics.is_none()),
                ]
                .into_iter()
                .filter_map(|(name, absent)| absent.then_some(name))
                .collect();
                Err(ApiError::ServiceUnavailable(missing))
            }
        }
    }
}

impl Ready {
    pub fn vectorizer(&self) -> Vectorizer<'_> {
        Vectorizer::new(&self.features, &self.demographics)
    }
}

pub struct ArtifactStore {
    paths: ArtifactPaths,
    loaded: Mutex<Artifacts>,
}

impl ArtifactStore {
    pub fn new(paths: ArtifactPaths) -> Self {
        Self {
            paths,
            loaded: Mutex::new(Artifacts::default()),
        }
    }

    pub fn paths(&self) -> &ArtifactPaths {
        &self.paths
    }

    /// Current slots without touching the filesystem.
    pub fn snapshot(&self) -> Artifacts {
        self.loaded.lock().clone()
    }

    /// Fills every empty slot whose file exists. A filled slot is never
    /// reloaded; a missing or unreadable file leaves its slot empty.
    pub fn ensure_loaded(&self) -> Artifacts {
        let mut loaded = self.loaded.lock();
        if loaded.features.is_none() {
            loaded.features = load_slot(FEATURES_FILE, &self.paths.features, FeatureSpec::from_path);
        }
        if loaded.demographics.is_none() {
            loaded.demographics = load_slot(
                DEMOGRAPHICS_FILE,
                &self.paths.demographics,
                DemographicsTable::from_path,
            );
        }
        if loaded.model.is_none() {
            loaded.model = load_slot(MODEL_FILE, &self.paths.model, GradientBoostedRegressor::from_path);
        }
        loaded.clone()
    }
}

fn load_slot<T, E: Display>(
    artifact: &'static str,
    path: &Path,
    load: impl FnOnce(&Path) -> Result<T, E>,
) -> Option<Arc<T>> {
    if !path.is_file() {
        debug!(artifact, path = %path.display(), "artifact not present");
        return None;
    }
    match load(path) {
        Ok(value) => {
            info!(artifact, path = %path.display(), "artifact loaded");
            Some(Arc::new(value))
        }
        Err(e) => {
            warn!(artifact, path = %path.display(), error = %e, "failed to load artifact");
            None
        }
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use std::fs;
    use std::path::Path;

    use super::ArtifactPaths;

    pub const DEMOGRAPHICS: &str = "zipcode,population,income\n98001,12000,55000\n98002,8000,41000\n";
    pub const FEATURES: &str = r#"["bedrooms","sqft_living","population"]"#;
    /// `1000 + bedrooms <= 3 ? -100 : 100` plus `population <= 10000 ? -10 : 10`.
    pub const MODEL: &str = r#"{"base_score":1000,"learning_rate":1,"n_features":3,"trees":[
        {"nodes":[{"kind":"split","feature":0,"threshold":3,"left":1,"right":2},{"kind":"leaf","value":-100},{"kind":"leaf","value":100}]},
        {"nodes":[{"kind":"split","feature":2,"threshold":10000,"left":1,"right":2},{"kind":"leaf","value":-10},{"kind":"leaf","value":10}]}
    ]}"#;

    pub fn write_model(paths: &ArtifactPaths) {
        write(&paths.model, MODEL);
    }

    pub fn write_features(paths: &ArtifactPaths) {
        write(&paths.features, FEATURES);
    }

    pub fn write_demographics(paths: &ArtifactPaths) {
        write(&paths.demographics, DEMOGRAPHICS);
    }

    pub fn write_all(paths: &ArtifactPaths) {
        write_model(paths);
        write_features(paths);
        write_demographics(paths);
    }

    fn write(path: &Path, contents: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }
}
