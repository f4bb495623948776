//! Process configuration read from the environment.

use std::env;
use std::path::PathBuf;

pub const UNSET_VERSION: &str = "unset";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Reported by metadata and every prediction; not read from the model.
    pub model_version: String,
    /// Holds `model/`, `data/` and `logs/`.
    pub root: PathBuf,
    pub bind: String,
}

impl Settings {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            model_version: lookup("MODEL_VERSION").unwrap_or_else(|| UNSET_VERSION.to_string()),
            root: lookup("PRICING_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".")),
            bind: lookup("PRICING_BIND").unwrap_or_else(|| "0.0.0.0:3000".to_string()),
        }
    }
}
