use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{DispatchError, DispatchResult};
use crate::bus::{BusMessage, FieldFilter, FieldMatch, MessageKind, MessageMatcher};

/// Replaced by the device address in reply filters.
pub const ADDRESS_PLACEHOLDER: &str = "@address@";

/// How `/command/<techno>/<address>/<command>` maps onto a bus message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandDefinition {
    pub technology: String,
    pub command: String,
    pub schema: String,

    #[serde(default = "default_address_key")]
    pub address_key: String,

    #[serde(default = "default_command_key")]
    pub command_key: String,

    /// Value sent under `command_key`.
    pub command_value: String,

    #[serde(default)]
    pub parameters: Vec<CommandParameter>,

    /// Expected reply. Without one the command is fire-and-forget.
    #[serde(default)]
    pub listener: Option<ReplyListener>,
}

/// A message field filled from a fixed value, or else from the next path segment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommandParameter {
    pub key: String,
    #[serde(default)]
    pub value: Option<String>,
}

impl CommandParameter {
    pub fn positional(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: None,
        }
    }

    pub fn fixed(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: Some(value.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReplyListener {
    #[serde(default = "default_reply_kind")]
    pub kind: MessageKind,
    pub schema: String,
    /// Field patterns; `"name%"` is a prefix match.
    #[serde(default)]
    pub filter: BTreeMap<String, String>,
}

impl ReplyListener {
    pub fn new<K, V>(schema: impl Into<String>, filter: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            kind: default_reply_kind(),
            schema: schema.into(),
            filter: filter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

fn default_address_key() -> String {
    "device".to_string()
}

fn default_command_key() -> String {
    "command".to_string()
}

fn default_reply_kind() -> MessageKind {
    MessageKind::Trigger
}

impl CommandDefinition {
    /// Positional parameters take the path segments in order; segments left
    /// over once every parameter is filled are ignored.
    pub fn build_message(
        &self,
        source: &str,
        address: &str,
        args: &[String],
    ) -> DispatchResult<BusMessage> {
        let mut builder = BusMessage::builder(MessageKind::Command, self.schema.as_str())
            .source(source)
            .field(self.address_key.as_str(), address)
            .field(self.command_key.as_str(), self.command_value.as_str());

        let mut args = args.iter();
        for parameter in &self.parameters {
            let value = match &parameter.value {
                Some(fixed) => fixed.clone(),
                None => args.next().cloned().ok_or_else(|| {
                    DispatchError::BadRequest(format!(
                        "missing value for parameter '{}'",
                        parameter.key
                    ))
                })?,
            };
            builder = builder.field(parameter.key.as_str(), value);
        }
        let surplus = args.count();
        if surplus > 0 {
            debug!(
                technology = %self.technology,
                command = %self.command,
                surplus,
                "Ignoring surplus command parameters"
            );
        }
        Ok(builder.build())
    }

    pub fn reply_matcher(&self, address: &str) -> Option<MessageMatcher> {
        self.listener.as_ref().map(|listener| {
            let filter: FieldFilter = listener
                .filter
                .iter()
                .map(|(key, pattern)| {
                    (
                        key.as_str(),
                        FieldMatch::pattern(&pattern.replace(ADDRESS_PLACEHOLDER, address)),
                    )
                })
                .collect();
            MessageMatcher::new(listener.kind, listener.schema.as_str()).with_filter(filter)
        })
    }
}

/// Command definitions keyed by `(technology, command)`.
#[derive(Debug, Clone, Default)]
pub struct CommandCatalog {
    entries: HashMap<(String, String), CommandDefinition>,
}

impl CommandCatalog {
    pub fn new(definitions: impl IntoIterator<Item = CommandDefinition>) -> Self {
        Self {
            entries: definitions
                .into_iter()
                .map(|def| ((def.technology.clone(), def.command.clone()), def))
                .collect(),
        }
    }

    pub fn lookup(&self, technology: &str, command: &str) -> Option<&CommandDefinition> {
        self.entries
            .get(&(technology.to_string(), command.to_string()))
    }

    /// One matcher per distinct `(kind, schema)` any command expects a reply on.
    pub fn channel_matchers(&self) -> Vec<MessageMatcher> {
        let mut matchers: Vec<MessageMatcher> = Vec::new();
        for listener in self.entries.values().filter_map(|def| def.listener.as_ref()) {
            let matcher = MessageMatcher::new(listener.kind, listener.schema.as_str());
            if !matchers.contains(&matcher) {
                matchers.push(matcher);
            }
        }
        matchers
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
