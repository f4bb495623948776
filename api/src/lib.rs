//! Serving side of the house price model: artifact loading, the feature
//! vectorization contract and the HTTP API.

pub mod app;
pub mod artifacts;
pub mod config;
pub mod error;
pub mod handler;
pub mod model;
pub mod predictor;
pub mod regressor;
pub mod schema;
pub mod table;
pub mod vectorizer;
