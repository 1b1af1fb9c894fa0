mod metrics;
mod result;
mod status;
mod upload;

use crate::server::SharedState;
use axum::{
    routing::{get, post},
    Router,
};
use serde::Serialize;

pub use result::ResultError;
pub use upload::UploadError;

/// Body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub detail: String,
}

pub fn api_routes() -> Router<SharedState> {
    Router::new()
        .route("/", get(status::greeting))
        .route("/health", get(status::healthcheck))
        .route("/metrics", get(metrics::metrics_handler))
        .route("/files/", post(upload::upload_file))
        .route("/files", post(upload::upload_file))
        .route("/result/", get(result::latest_result))
        .route("/result", get(result::latest_result))
        .route("/result/summary/", get(result::latest_summary))
        .route("/result/summary", get(result::latest_summary))
}
