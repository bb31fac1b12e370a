//! Controller error taxonomy — narrower than the worker's, since the
//! controller only ever serves HTTP requests against the registry.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("malformed health report body")]
    MalformedReport,
}

impl IntoResponse for ControllerError {
    fn into_response(self) -> Response {
        match self {
            ControllerError::MalformedReport => {
                (StatusCode::BAD_REQUEST, self.to_string()).into_response()
            }
        }
    }
}
