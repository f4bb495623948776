use axum::extract::multipart::MultipartRejection;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;
use tracing::{error, warn};

use crate::regressor::RegressorError;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Deployment is missing artifacts; not the caller's fault.
    #[error("Model artifacts not loaded ({}). Train or copy artifacts into the model directory.", .0.join(", "))]
    ServiceUnavailable(Vec<&'static str>),

    #[error("{0}")]
    InvalidInput(String),

    #[error("Unknown zipcode: {}", join_codes(.0))]
    UnknownRegion(Vec<i64>),

    /// Joined data lacks model columns: training and serving artifacts disagree.
    #[error("Missing required features: {0:?}")]
    MissingFeatures(Vec<String>),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::InvalidInput(_) => "invalid_input",
            Self::UnknownRegion(_) => "unknown_region",
            Self::MissingFeatures(_) => "missing_features",
            Self::Internal(_) => "internal",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::InvalidInput(_) | Self::UnknownRegion(_) | Self::MissingFeatures(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<RegressorError> for ApiError {
    fn from(err: RegressorError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidInput(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        Self::InvalidInput(rejection.body_text())
    }
}

impl From<MultipartRejection> for ApiError {
    fn from(rejection: MultipartRejection) -> Self {
        Self::InvalidInput(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let detail = match &self {
            Self::Internal(_) => {
                error!(error = %self, "prediction failed");
                "internal error".to_string()
            }
            Self::MissingFeatures(missing) => {
                error!(?missing, "artifact skew: joined record lacks model features");
                self.to_string()
            }
            Self::ServiceUnavailable(_) => {
                warn!(error = %self, "rejecting request");
                self.to_string()
            }
            _ => self.to_string(),
        };

        (
            self.status(),
            Json(serde_json::json!({"success": false, "error": self.kind(), "detail": detail})),
        )
            .into_response()
    }
}

fn join_codes(codes: &[i64]) -> String {
    codes
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_maps_to_status() {
        assert_eq!(
            ApiError::ServiceUnavailable(vec!["model"]).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::UnknownRegion(vec![1]).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::Internal("boom".into()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn messages_name_every_offender() {
        assert_eq!(
            ApiError::UnknownRegion(vec![98001, 98002]).to_string(),
            "Unknown zipcode: 98001, 98002"
        );
        assert_eq!(
            ApiError::MissingFeatures(vec!["income".into(), "population".into()]).to_string(),
            r#"Missing required features: ["income", "population"]"#
        );
    }

    #[test]
    fn internal_detail_is_not_leaked() {
        let response = ApiError::Internal("secret path".into()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
