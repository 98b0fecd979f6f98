use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value, json};

use super::{DispatchError, ERROR_CODE};
use crate::bus::BusMessage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// Rendered reply: `{"status", "code", "description", "<data_type>": [...]}`.
#[derive(Debug, Clone, PartialEq)]
pub struct RestResponse {
    pub status: ResponseStatus,
    pub code: u16,
    pub description: String,
    pub data_type: String,
    pub data: Vec<Value>,
    /// Set on error payloads so transports can pick a status code.
    pub error: Option<DispatchError>,
}

impl RestResponse {
    pub fn ok(data_type: impl Into<String>, data: Vec<Value>) -> Self {
        Self {
            status: ResponseStatus::Ok,
            code: 0,
            description: String::new(),
            data_type: data_type.into(),
            data,
            error: None,
        }
    }

    pub fn empty(data_type: impl Into<String>) -> Self {
        Self::ok(data_type, Vec::new())
    }

    pub fn error(data_type: impl Into<String>, error: DispatchError) -> Self {
        Self {
            status: ResponseStatus::Error,
            code: ERROR_CODE,
            description: error.to_string(),
            data_type: data_type.into(),
            data: Vec::new(),
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResponseStatus::Ok
    }

    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        body.insert("status".to_string(), json!(self.status));
        body.insert("code".to_string(), json!(self.code));
        body.insert("description".to_string(), json!(self.description));
        body.insert(self.data_type.clone(), Value::Array(self.data.clone()));
        Value::Object(body)
    }
}

impl Serialize for RestResponse {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// JSON view of a bus message; fields stay an ordered list of pairs.
pub fn message_json(message: &BusMessage) -> Value {
    json!({
        "type": message.kind(),
        "schema": message.schema(),
        "source": message.source(),
        "target": message.target(),
        "fields": message
            .fields()
            .iter()
            .map(|(key, value)| json!({"key": key, "value": value}))
            .collect::<Vec<_>>(),
    })
}
