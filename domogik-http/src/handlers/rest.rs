use std::{collections::BTreeMap, sync::LazyLock};

use axum::{
    extract::{Path, Query, State},
    http::Method,
};
use domogik_core::dispatch::InboundRequest;
use regex::Regex;
use tracing::info;

use crate::{models::RestReply, server::AppState};

static PASSWORD_SEGMENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"password/[^/]+").expect("valid password pattern"));

/// Path as it may be logged: password segments are masked.
pub fn loggable_path(path: &str) -> String {
    PASSWORD_SEGMENT
        .replace_all(path, "password/********")
        .into_owned()
}

/// Gateway status
#[axum::debug_handler]
pub async fn root(
    State(state): State<AppState>,
    method: Method,
    Query(query): Query<BTreeMap<String, String>>,
) -> RestReply {
    handle(state, method, "", query).await
}

/// Every other request goes through the dispatcher
#[axum::debug_handler]
pub async fn dispatch(
    State(state): State<AppState>,
    method: Method,
    Path(path): Path<String>,
    Query(query): Query<BTreeMap<String, String>>,
) -> RestReply {
    handle(state, method, &path, query).await
}

async fn handle(
    state: AppState,
    method: Method,
    path: &str,
    query: BTreeMap<String, String>,
) -> RestReply {
    info!(method = %method, path = %loggable_path(path), "REST request");
    let callback = query.get("callback").cloned();
    let request = InboundRequest::from_path(method.as_str(), path, query);
    let response = state.dispatcher.dispatch(&request).await;
    RestReply::new(response, callback)
}
