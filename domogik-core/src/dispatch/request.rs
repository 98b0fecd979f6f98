use std::collections::BTreeMap;

use super::{DispatchError, DispatchResult};

/// An inbound synchronous request, already split into path segments.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundRequest {
    pub verb: String,
    pub segments: Vec<String>,
    pub query: BTreeMap<String, String>,
}

impl InboundRequest {
    pub fn new(
        verb: impl Into<String>,
        segments: Vec<String>,
        query: BTreeMap<String, String>,
    ) -> Self {
        Self {
            verb: verb.into(),
            segments,
            query,
        }
    }

    /// Splits `path` on `/`, dropping empty segments.
    pub fn from_path(verb: impl Into<String>, path: &str, query: BTreeMap<String, String>) -> Self {
        let segments = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .map(String::from)
            .collect();
        Self::new(verb, segments, query)
    }

    pub fn get(path: &str) -> Self {
        Self::from_path("GET", path, BTreeMap::new())
    }

    pub fn route(&self) -> Option<&str> {
        self.segments.first().map(String::as_str)
    }

    /// Name of the data array the response carries for this route.
    pub fn data_type(&self) -> String {
        match self.segments.as_slice() {
            [] => "rest".to_string(),
            [route, rest @ ..] => match route.as_str() {
                "command" | "xpl-cmnd" => "xpl".to_string(),
                "plugin" if rest.first().is_some_and(|s| s == "config") => "config".to_string(),
                "plugin" => "plugin".to_string(),
                "stats" => "stats".to_string(),
                "account" if rest.first().is_some_and(|s| s == "person") => "person".to_string(),
                "account" => "account".to_string(),
                "events" => "event".to_string(),
                "queuecontent" => "queue".to_string(),
                "helper" => "helper".to_string(),
                "base" => rest.first().cloned().unwrap_or_else(|| "base".to_string()),
                _ => "rest".to_string(),
            },
        }
    }
}

/// Reads `key/value/key/value...` segments.
pub fn key_value_pairs<S: AsRef<str>>(segments: &[S]) -> DispatchResult<Vec<(String, String)>> {
    if segments.is_empty() {
        return Err(DispatchError::BadRequest("no parameters given".to_string()));
    }
    segments
        .chunks(2)
        .map(|pair| match pair {
            [key, value] => Ok((key.as_ref().to_string(), value.as_ref().to_string())),
            // a trailing key on its own
            _ => Err(DispatchError::BadRequest(format!(
                "missing value for parameter '{}'",
                pair.first().map(AsRef::as_ref).unwrap_or_default()
            ))),
        })
        .collect()
}
