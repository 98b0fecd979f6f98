//! Response rendering: JSON, or JSONP when the client names a callback.

use std::sync::LazyLock;

use axum::{
    Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use domogik_core::dispatch::RestResponse;
use regex::Regex;

use crate::error::status_for;

static CALLBACK_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z_$][A-Za-z0-9_$.]*$").expect("valid callback pattern"));

/// A rendered dispatcher response, optionally wrapped for JSONP.
#[derive(Debug)]
pub struct RestReply {
    /// Envelope produced by the dispatcher
    pub response: RestResponse,

    /// JSONP callback taken from the `callback` query parameter
    pub callback: Option<String>,
}

impl RestReply {
    pub fn new(response: RestResponse, callback: Option<String>) -> Self {
        Self { response, callback }
    }

    pub fn status(&self) -> StatusCode {
        self.response
            .error
            .as_ref()
            .map(status_for)
            .unwrap_or(StatusCode::OK)
    }
}

/// Whether `name` is safe to echo back as a JavaScript function name.
pub fn is_valid_callback(name: &str) -> bool {
    CALLBACK_NAME.is_match(name)
}

impl IntoResponse for RestReply {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = self.response.to_json();
        match self.callback {
            Some(callback) if is_valid_callback(&callback) => (
                status,
                [(header::CONTENT_TYPE, "application/javascript")],
                format!("{}({})", callback, body),
            )
                .into_response(),
            _ => (status, Json(body)).into_response(),
        }
    }
}
