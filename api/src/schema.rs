use ::serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::table::Record;

/// Fully specified house, as accepted by `/v1/predict`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HouseRecord {
    pub bedrooms: f64,
    pub bathrooms: f64,
    pub sqft_living: f64,
    pub sqft_lot: f64,
    pub floors: f64,
    pub waterfront: i32,
    pub view: i32,
    pub condition: i32,
    pub grade: i32,
    pub sqft_above: f64,
    pub sqft_basement: f64,
    pub yr_built: i32,
    pub yr_renovated: i32,
    pub zipcode: i64,
    pub lat: f64,
    pub long: f64,
    pub sqft_living15: f64,
    pub sqft_lot15: f64,
}

impl HouseRecord {
    pub fn into_record(self) -> Result<Record, ApiError> {
        if self.zipcode < 1 {
            return Err(ApiError::InvalidInput(format!(
                "zipcode must be >= 1, got {}",
                self.zipcode
            )));
        }
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(record)) => Ok(record),
            Ok(_) => Err(ApiError::Internal("house record did not serialize to an object".into())),
            Err(e) => Err(ApiError::InvalidInput(e.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Json,
    Csv,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct BatchPredictionOptions {
    #[serde(default)]
    pub output: OutputFormat,
}
