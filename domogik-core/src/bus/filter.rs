use std::fmt;

use serde::{Deserialize, Serialize};

use super::message::{BusMessage, MessageKind};

/// Trailing marker turning a pattern into a prefix match: `"name%"`.
pub const WILDCARD: char = '%';

/// How a single field value is compared.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldMatch {
    Exact(String),
    Prefix(String),
}

impl FieldMatch {
    /// Parses the `"name%"` convention: a trailing wildcard makes a prefix match.
    pub fn pattern(pattern: &str) -> Self {
        match pattern.strip_suffix(WILDCARD) {
            Some(prefix) => Self::Prefix(prefix.to_string()),
            None => Self::Exact(pattern.to_string()),
        }
    }

    /// Matches every value.
    pub fn any() -> Self {
        Self::Prefix(String::new())
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            Self::Exact(expected) => value == expected,
            Self::Prefix(prefix) => value.starts_with(prefix.as_str()),
        }
    }
}

impl From<&str> for FieldMatch {
    fn from(pattern: &str) -> Self {
        Self::pattern(pattern)
    }
}

impl From<String> for FieldMatch {
    fn from(pattern: String) -> Self {
        Self::pattern(&pattern)
    }
}

impl fmt::Display for FieldMatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact(value) => write!(f, "{}", value),
            Self::Prefix(prefix) => write!(f, "{}{}", prefix, WILDCARD),
        }
    }
}

/// Conjunction of per-field criteria. An empty filter matches every message.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldFilter {
    criteria: Vec<(String, FieldMatch)>,
}

impl FieldFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, criterion: impl Into<FieldMatch>) -> Self {
        self.criteria.push((key.into(), criterion.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.criteria.is_empty()
    }

    pub fn criteria(&self) -> &[(String, FieldMatch)] {
        &self.criteria
    }

    /// Every filter key must be present, and at least one of its values must match.
    pub fn matches(&self, message: &BusMessage) -> bool {
        self.criteria.iter().all(|(key, criterion)| {
            message
                .field_values(key)
                .any(|value| criterion.matches(value))
        })
    }
}

impl<K, V> FromIterator<(K, V)> for FieldFilter
where
    K: Into<String>,
    V: Into<FieldMatch>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            criteria: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

/// Selects messages by kind, schema and field filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageMatcher {
    pub kind: MessageKind,
    pub schema: FieldMatch,
    pub filter: FieldFilter,
}

impl MessageMatcher {
    pub fn new(kind: MessageKind, schema: impl Into<FieldMatch>) -> Self {
        Self {
            kind,
            schema: schema.into(),
            filter: FieldFilter::default(),
        }
    }

    pub fn with_filter(mut self, filter: FieldFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn matches(&self, message: &BusMessage) -> bool {
        message.kind() == self.kind
            && self.schema.matches(message.schema())
            && self.filter.matches(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn detail_reply(plugin: &str) -> BusMessage {
        BusMessage::builder(MessageKind::Trigger, "domogik.system")
            .field("command", "detail")
            .field("plugin", plugin)
            .build()
    }

    #[test]
    fn test_wildcard_filter() {
        let filter = FieldFilter::new().with("plugin", "name%");
        assert!(filter.matches(&detail_reply("name_extra")));
        assert!(filter.matches(&detail_reply("name")));
        assert!(!filter.matches(&detail_reply("other")));
    }

    #[test]
    fn test_missing_key_never_matches() {
        let filter = FieldFilter::new().with("host", FieldMatch::any());
        assert!(!filter.matches(&detail_reply("x10")));
    }

    #[test]
    fn test_duplicate_keys_match_any_value() {
        let message = BusMessage::builder(MessageKind::Trigger, "sensor.basic")
            .field("device", "1")
            .field("device", "2")
            .build();
        assert!(FieldFilter::new().with("device", "2").matches(&message));
    }

    #[test]
    fn test_matcher_checks_kind_and_schema() {
        let matcher = MessageMatcher::new(MessageKind::Trigger, "domogik.system")
            .with_filter(FieldFilter::new().with("command", "detail"));
        assert!(matcher.matches(&detail_reply("x10")));

        let command = BusMessage::builder(MessageKind::Command, "domogik.system")
            .field("command", "detail")
            .build();
        assert!(!matcher.matches(&command));

        let any_schema = MessageMatcher::new(MessageKind::Trigger, "%");
        assert_eq!(any_schema.schema, FieldMatch::any());
        assert!(any_schema.matches(&detail_reply("x10")));
    }

    #[test]
    fn test_pattern_display_round_trips() {
        assert_eq!(FieldMatch::pattern("name%").to_string(), "name%");
        assert_eq!(FieldMatch::pattern("name").to_string(), "name");
    }

    proptest! {
        #[test]
        fn prefix_matches_every_extension(prefix in "[a-z_]{0,8}", suffix in "[a-z0-9_]{0,8}") {
            let criterion = FieldMatch::pattern(&format!("{}%", prefix));
            let value = format!("{}{}", prefix, suffix);
            prop_assert!(criterion.matches(&value));
        }

        #[test]
        fn exact_matches_only_itself(expected in "[a-z]{1,8}", other in "[a-z]{1,8}") {
            let criterion = FieldMatch::pattern(&expected);
            prop_assert_eq!(criterion.matches(&other), expected == other);
        }
    }
}
