//! Error handling for domogik-http
//!
//! Maps dispatch failures onto HTTP status codes. The body is always the
//! regular response envelope.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use domogik_core::dispatch::{DispatchError, RestResponse};

/// Application error type
#[derive(Debug)]
pub enum AppError {
    /// Failure reported by the dispatcher
    Dispatch(DispatchError),

    /// Failure outside the dispatcher, e.g. a panicking handler
    Internal(String),
}

impl From<DispatchError> for AppError {
    fn from(err: DispatchError) -> Self {
        Self::Dispatch(err)
    }
}

/// Status code for an error payload. Timeouts stay 200: "no data" is an answer.
pub fn status_for(error: &DispatchError) -> StatusCode {
    match error {
        DispatchError::Timeout(_) | DispatchError::Remote(_) => StatusCode::OK,
        DispatchError::BadRequest(_) => StatusCode::BAD_REQUEST,
        DispatchError::NotFound(_) => StatusCode::NOT_FOUND,
        DispatchError::Conflict(_) => StatusCode::CONFLICT,
        DispatchError::Storage(_) | DispatchError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

impl AppError {
    fn into_dispatch_error(self) -> DispatchError {
        match self {
            Self::Dispatch(err) => err,
            Self::Internal(msg) => DispatchError::Internal(msg),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let error = self.into_dispatch_error();
        let status = status_for(&error);
        let body = RestResponse::error("rest", error);
        (status, Json(body.to_json())).into_response()
    }
}
