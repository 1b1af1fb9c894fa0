use super::ErrorBody;
use crate::{
    bounding_box::{Detection, DetectionResult, ResultSummary},
    server::SharedState,
};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use thiserror::Error;
use tracing::instrument;

#[derive(Error, Debug)]
pub enum ResultError {
    #[error("no detection result available yet, upload an image to /files/ first")]
    NoPriorResult,
}

impl IntoResponse for ResultError {
    fn into_response(self) -> Response {
        let status = match self {
            ResultError::NoPriorResult => StatusCode::NOT_FOUND,
        };
        let body = ErrorBody {
            detail: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

fn latest(state: &SharedState) -> Result<Arc<DetectionResult>, ResultError> {
    state
        .detection_service
        .store()
        .latest()
        .ok_or(ResultError::NoPriorResult)
}

#[instrument(skip(state))]
pub async fn latest_result(
    State(state): State<SharedState>,
) -> Result<Json<Vec<Detection>>, ResultError> {
    let result = latest(&state)?;
    Ok(Json(result.detections.clone()))
}

#[instrument(skip(state))]
pub async fn latest_summary(
    State(state): State<SharedState>,
) -> Result<Json<ResultSummary>, ResultError> {
    let result = latest(&state)?;
    Ok(Json(ResultSummary::from(result.as_ref())))
}
