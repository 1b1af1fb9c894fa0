use super::ErrorBody;
use crate::{detection_service::DetectionServiceError, server::SharedState};
use axum::{
    body::{Body, Bytes},
    extract::{
        multipart::{MultipartError, MultipartRejection},
        Multipart, State,
    },
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
};
use thiserror::Error;
use tracing::instrument;

const FILE_FIELD: &str = "file";

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("expected a multipart/form-data upload: {0}")]
    NotMultipart(#[from] MultipartRejection),
    #[error("no `file` field in the multipart form")]
    MissingFile,
    #[error("malformed multipart request: {0}")]
    InvalidMultipart(#[from] MultipartError),
    #[error("{0}")]
    Processing(#[from] DetectionServiceError),
    #[error("HTTP builder failed: {0}")]
    HttpBuilder(String),
}

impl UploadError {
    pub fn status(&self) -> StatusCode {
        match self {
            UploadError::NotMultipart(e) => e.status(),
            UploadError::MissingFile => StatusCode::BAD_REQUEST,
            UploadError::InvalidMultipart(e) => e.status(),
            UploadError::Processing(DetectionServiceError::Decode(_)) => StatusCode::BAD_REQUEST,
            UploadError::Processing(_) | UploadError::HttpBuilder(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn outcome(&self) -> &'static str {
        match self {
            UploadError::NotMultipart(_)
            | UploadError::MissingFile
            | UploadError::InvalidMultipart(_) => "invalid_request",
            UploadError::Processing(DetectionServiceError::Decode(_)) => "invalid_image",
            UploadError::Processing(DetectionServiceError::Detector(_)) => "inference_failure",
            UploadError::Processing(_) | UploadError::HttpBuilder(_) => "internal_error",
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            detail: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

async fn read_file_field(mut multipart: Multipart) -> Result<Bytes, UploadError> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() == Some(FILE_FIELD) {
            tracing::debug!(
                "Received upload {:?} ({:?})",
                field.file_name(),
                field.content_type()
            );
            return Ok(field.bytes().await?);
        }
    }
    Err(UploadError::MissingFile)
}

async fn detect_and_respond(
    state: &SharedState,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, UploadError> {
    let image_data = read_file_field(multipart?).await?;
    let processed = state.detection_service.process_upload(image_data).await?;

    state.metrics.record_inference(
        processed.result.inference_ms,
        processed.result.detections.len(),
    );

    let response = Response::builder()
        .header(header::CONTENT_TYPE, "image/jpeg")
        .body(Body::from(processed.annotated_jpeg))
        .map_err(|e| UploadError::HttpBuilder(e.to_string()))?;

    Ok(response)
}

#[instrument(skip(state, multipart))]
pub async fn upload_file(
    State(state): State<SharedState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Response, UploadError> {
    let response = detect_and_respond(&state, multipart).await;

    match &response {
        Ok(_) => state.metrics.record_upload("success"),
        Err(e) => {
            if e.status().is_server_error() {
                tracing::error!("Upload failed: {}", e);
            } else {
                tracing::warn!("Rejected upload: {}", e);
            }
            state.metrics.record_upload(e.outcome());
        }
    }

    response
}
