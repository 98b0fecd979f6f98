use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use super::{BusError, BusResult};

pub const DEFAULT_HOP: u8 = 1;
pub const BROADCAST_TARGET: &str = "*";

/// Message type as carried on the first line of a wire block.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString,
)]
pub enum MessageKind {
    #[strum(serialize = "xpl-cmnd")]
    #[serde(rename = "xpl-cmnd")]
    Command,
    #[strum(serialize = "xpl-trig")]
    #[serde(rename = "xpl-trig")]
    Trigger,
}

/// An immutable bus message.
///
/// Field order is preserved and duplicate keys are allowed; plugin listings
/// rely on both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusMessage {
    kind: MessageKind,
    hop: u8,
    source: String,
    target: String,
    schema: String,
    fields: Vec<(String, String)>,
}

impl BusMessage {
    pub fn builder(kind: MessageKind, schema: impl Into<String>) -> MessageBuilder {
        MessageBuilder::new(kind, schema)
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn hop(&self) -> u8 {
        self.hop
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    /// First value stored under `key`.
    pub fn field(&self, key: &str) -> Option<&str> {
        self.field_values(key).next()
    }

    /// Every value stored under `key`, in message order.
    pub fn field_values<'a>(&'a self, key: &str) -> impl Iterator<Item = &'a str> {
        self.fields
            .iter()
            .filter(move |(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Values of the numbered fields `<prefix>0`, `<prefix>1`, ... in index order.
    pub fn indexed_fields(&self, prefix: &str) -> Vec<&str> {
        let mut indexed: Vec<(usize, &str)> = self
            .fields
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(prefix)
                    .and_then(|index| index.parse::<usize>().ok())
                    .map(|index| (index, v.as_str()))
            })
            .collect();
        indexed.sort_by_key(|(index, _)| *index);
        indexed.into_iter().map(|(_, v)| v).collect()
    }
}

#[derive(Debug, Clone)]
pub struct MessageBuilder {
    kind: MessageKind,
    hop: u8,
    source: String,
    target: String,
    schema: String,
    fields: Vec<(String, String)>,
}

impl MessageBuilder {
    pub fn new(kind: MessageKind, schema: impl Into<String>) -> Self {
        Self {
            kind,
            hop: DEFAULT_HOP,
            source: String::new(),
            target: BROADCAST_TARGET.to_string(),
            schema: schema.into(),
            fields: Vec::new(),
        }
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    pub fn hop(mut self, hop: u8) -> Self {
        self.hop = hop;
        self
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((key.into(), value.into()));
        self
    }

    pub fn fields<K, V>(mut self, fields: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.fields
            .extend(fields.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn build(self) -> BusMessage {
        BusMessage {
            kind: self.kind,
            hop: self.hop,
            source: self.source,
            target: self.target,
            schema: self.schema,
            fields: self.fields,
        }
    }
}

impl fmt::Display for BusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.kind)?;
        writeln!(f, "{{")?;
        writeln!(f, "hop={}", self.hop)?;
        writeln!(f, "source={}", self.source)?;
        writeln!(f, "target={}", self.target)?;
        writeln!(f, "}}")?;
        writeln!(f, "{}", self.schema)?;
        writeln!(f, "{{")?;
        for (key, value) in &self.fields {
            writeln!(f, "{}={}", key, value)?;
        }
        writeln!(f, "}}")
    }
}

impl FromStr for BusMessage {
    type Err = BusError;

    fn from_str(s: &str) -> BusResult<Self> {
        let mut lines = s.lines().map(str::trim_end);

        let kind_line = next_line(&mut lines, "message type")?;
        let kind = kind_line
            .parse::<MessageKind>()
            .map_err(|_| BusError::Codec(format!("unknown message type '{}'", kind_line)))?;
        let header = read_block(&mut lines, "header")?;
        let schema = next_line(&mut lines, "schema")?.to_string();
        let fields = read_block(&mut lines, "body")?;

        let mut hop = None;
        let mut source = None;
        let mut target = None;
        for (key, value) in header {
            match key.as_str() {
                "hop" => {
                    hop = Some(
                        value
                            .parse::<u8>()
                            .map_err(|_| BusError::Codec(format!("invalid hop count '{}'", value)))?,
                    )
                }
                "source" => source = Some(value),
                "target" => target = Some(value),
                _ => {}
            }
        }

        Ok(BusMessage {
            kind,
            hop: hop.unwrap_or(DEFAULT_HOP),
            source: source.ok_or(BusError::Codec("missing source header".to_string()))?,
            target: target.ok_or(BusError::Codec("missing target header".to_string()))?,
            schema,
            fields,
        })
    }
}

fn next_line<'a>(lines: &mut impl Iterator<Item = &'a str>, what: &str) -> BusResult<&'a str> {
    lines
        .find(|line| !line.is_empty())
        .ok_or_else(|| BusError::Codec(format!("missing {}", what)))
}

fn read_block<'a>(
    lines: &mut impl Iterator<Item = &'a str>,
    what: &str,
) -> BusResult<Vec<(String, String)>> {
    if next_line(lines, what)? != "{" {
        return Err(BusError::Codec(format!("expected '{{' to open {}", what)));
    }
    let mut pairs = Vec::new();
    loop {
        match lines.next() {
            None => return Err(BusError::Codec(format!("unterminated {}", what))),
            Some("}") => return Ok(pairs),
            Some(line) => {
                let (key, value) = line
                    .split_once('=')
                    .ok_or_else(|| BusError::Codec(format!("expected key=value, got '{}'", line)))?;
                pairs.push((key.to_string(), value.to_string()));
            }
        }
    }
}
