//! API route handlers.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::PipelineError;
use crate::predictor::Predictor;
use crate::storage::RaceRepository;
use crate::trainer::ModelArtifact;
use crate::types::{
    ErrorResponse, HealthResponse, ModelInfoResponse, PredictRequest, PredictResponse,
    RankedDriver,
};

/// Application state shared across handlers.
pub struct AppState {
    pub predictor: Predictor,
    pub repository: Mutex<RaceRepository>,
}

/// Error type for API handlers.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: msg.into(),
        }
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            message: msg.into(),
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: msg.into(),
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::SchemaMismatch(_) => Self::bad_request(err.to_string()),
            PipelineError::NoModelAvailable => Self::unavailable(err.to_string()),
            other => {
                tracing::error!(error = %other, "request failed");
                Self::internal(other.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            error: self.status.to_string(),
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

fn model_info_response(artifact: &ModelArtifact) -> ModelInfoResponse {
    ModelInfoResponse {
        model_version: artifact.version.clone(),
        created_at: artifact.created_at.to_rfc3339(),
        num_features: artifact.schema.feature_names.len(),
        feature_names: artifact.schema.feature_names.clone(),
        encoding: artifact.encoding.clone(),
        ensemble_size: artifact.forest.trees.len(),
    }
}

/// Health check endpoint; unhealthy until a model is loaded.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let version = env!("CARGO_PKG_VERSION").to_string();
    if state.predictor.is_ready() {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ok".to_string(),
                version,
                reason: None,
            }),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "unhealthy".to_string(),
                version,
                reason: Some("model not loaded".to_string()),
            }),
        )
    }
}

/// Model info endpoint.
pub async fn model_info(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ModelInfoResponse>, ApiError> {
    let artifact = state
        .predictor
        .snapshot()
        .ok_or(PipelineError::NoModelAvailable)?;
    Ok(Json(model_info_response(&artifact)))
}

/// Prediction endpoint.
pub async fn predict(
    State(state): State<Arc<AppState>>,
    Json(req): Json<PredictRequest>,
) -> Result<Json<PredictResponse>, ApiError> {
    // Validate request
    if req.drivers.is_empty() {
        return Err(ApiError::bad_request("No drivers provided"));
    }
    let mut seen = HashSet::new();
    for entrant in &req.drivers {
        if entrant.driver_id.trim().is_empty() || entrant.team_id.trim().is_empty() {
            return Err(ApiError::bad_request("driver_id and team_id must not be empty"));
        }
        if !seen.insert(entrant.driver_id.as_str()) {
            return Err(ApiError::bad_request(format!(
                "Duplicate driver: {}",
                entrant.driver_id
            )));
        }
    }

    let history = state
        .repository
        .lock()
        .records_before(&req.race)
        .map_err(|e| ApiError::internal(format!("Failed to load history: {}", e)))?;

    let (artifact, ranking) = state
        .predictor
        .predict_race(&history, &req.race, &req.drivers)?;

    tracing::info!(
        race = %req.race.race_id,
        drivers = ranking.len(),
        model = %artifact.version,
        "prediction served"
    );

    let ranking: Vec<RankedDriver> = ranking
        .into_iter()
        .map(|(driver_id, win_probability)| RankedDriver {
            driver_id,
            win_probability,
        })
        .collect();

    Ok(Json(PredictResponse {
        race_id: req.race.race_id,
        model_version: artifact.version.clone(),
        predicted_winner: ranking.first().map(|r| r.driver_id.clone()),
        ranking,
    }))
}

/// Reload the current artifact from the registry.
pub async fn reload(
    State(state): State<Arc<AppState>>,
) -> Result<Json<ModelInfoResponse>, ApiError> {
    let artifact = state.predictor.reload()?;
    Ok(Json(model_info_response(&artifact)))
}
