use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fs::File, io::BufReader, path::Path, time::Duration};

use crate::{
    Error, InternalResult,
    dispatch::command::{CommandDefinition, CommandParameter, ReplyListener},
    queue,
};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewayConfig {
    #[serde(default)]
    pub queues: QueueConfig,

    #[serde(default)]
    pub tickets: TicketConfig,

    #[serde(default)]
    pub bus: BusConfig,

    #[serde(default)]
    pub datetime: DateTimeConfig,

    #[serde(default = "default_commands")]
    pub commands: Vec<CommandDefinition>,

    #[serde(default = "default_entities")]
    pub entities: Vec<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            queues: QueueConfig::default(),
            tickets: TicketConfig::default(),
            bus: BusConfig::default(),
            datetime: DateTimeConfig::default(),
            commands: default_commands(),
            entities: default_entities(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueConfig {
    #[serde(default = "default_channels")]
    pub channels: BTreeMap<String, ChannelConfig>,

    /// Entries older than this are never matched.
    #[serde(default = "default_life_expectancy", with = "duration_ms")]
    pub life_expectancy: Duration,

    /// Single-reply timeout, also the wait for the first reply of a list.
    #[serde(default = "default_wait_timeout", with = "duration_ms")]
    pub wait_timeout: Duration,

    #[serde(default = "default_aggregation_window", with = "duration_ms")]
    pub aggregation_window: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            life_expectancy: default_life_expectancy(),
            wait_timeout: default_wait_timeout(),
            aggregation_window: default_aggregation_window(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelConfig {
    #[serde(default = "default_channel_size")]
    pub max_size: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_size: default_channel_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TicketConfig {
    #[serde(default = "default_ticket_queue_size")]
    pub max_size: usize,

    #[serde(default = "default_ticket_max_idle", with = "duration_ms")]
    pub max_idle: Duration,

    #[serde(default = "default_sweep_interval", with = "duration_ms")]
    pub sweep_interval: Duration,

    /// Message field carrying the entity id a ticket listens for.
    #[serde(default = "default_entity_key")]
    pub entity_key: String,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            max_size: default_ticket_queue_size(),
            max_idle: default_ticket_max_idle(),
            sweep_interval: default_sweep_interval(),
            entity_key: default_entity_key(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BusConfig {
    #[serde(default = "default_bus_capacity")]
    pub capacity: usize,

    /// `source` header stamped on every message the gateway sends.
    #[serde(default = "default_bus_source")]
    pub source: String,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            capacity: default_bus_capacity(),
            source: default_bus_source(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DateTimeConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_datetime_interval", with = "duration_ms")]
    pub interval: Duration,

    #[serde(default = "default_datetime_source")]
    pub source: String,
}

impl Default for DateTimeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: default_datetime_interval(),
            source: default_datetime_source(),
        }
    }
}

fn default_channels() -> BTreeMap<String, ChannelConfig> {
    [
        queue::SYSTEM_LIST,
        queue::SYSTEM_DETAIL,
        queue::SYSTEM_START,
        queue::SYSTEM_STOP,
        queue::COMMAND,
    ]
    .into_iter()
    .map(|name| (name.to_string(), ChannelConfig::default()))
    .collect()
}

fn default_channel_size() -> usize {
    10
}

fn default_life_expectancy() -> Duration {
    Duration::from_millis(3000)
}

fn default_wait_timeout() -> Duration {
    Duration::from_millis(15000)
}

fn default_aggregation_window() -> Duration {
    Duration::from_millis(1000)
}

fn default_ticket_queue_size() -> usize {
    50
}

fn default_ticket_max_idle() -> Duration {
    Duration::from_millis(600_000)
}

fn default_sweep_interval() -> Duration {
    Duration::from_millis(60_000)
}

fn default_entity_key() -> String {
    "device".to_string()
}

fn default_bus_capacity() -> usize {
    1024
}

fn default_bus_source() -> String {
    "domogik-rest.gateway".to_string()
}

fn default_datetime_interval() -> Duration {
    Duration::from_millis(60_000)
}

fn default_datetime_source() -> String {
    "domogik-datetime.gateway".to_string()
}

fn default_entities() -> Vec<String> {
    [
        "area",
        "room",
        "device",
        "device_technology",
        "device_type",
        "device_usage",
        "device_stats",
        "person",
        "user_account",
        "plugin_config",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_commands() -> Vec<CommandDefinition> {
    let switch = |command: &str| CommandDefinition {
        technology: "x10".to_string(),
        command: command.to_string(),
        schema: "x10.basic".to_string(),
        address_key: "device".to_string(),
        command_key: "command".to_string(),
        command_value: command.to_string(),
        parameters: Vec::new(),
        listener: Some(ReplyListener::new(
            "x10.basic",
            [("command", command), ("device", "@address@")],
        )),
    };
    let mut dim = switch("dim");
    dim.parameters.push(CommandParameter::positional("level"));
    vec![switch("on"), switch("off"), dim]
}

pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> InternalResult<T> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|e| {
        Error::Config(format!("Failed to open config file {}: {}", path.display(), e))
    })?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> InternalResult<T> {
    let config = serde_json::from_str(s)
        .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}

impl GatewayConfig {
    pub fn from_file(path: impl AsRef<Path>) -> InternalResult<Self> {
        from_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_gateway_config_serde() {
        let config = GatewayConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: GatewayConfig = from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: GatewayConfig =
            from_str(r#"{"queues": {"life_expectancy": 500}, "tickets": {"max_idle": 2000}}"#)
                .unwrap();
        assert_eq!(config.queues.life_expectancy, Duration::from_millis(500));
        assert_eq!(config.queues.aggregation_window, Duration::from_secs(1));
        assert_eq!(config.queues.channels.len(), 5);
        assert_eq!(config.queues.channels["command"].max_size, 10);
        assert_eq!(config.tickets.max_idle, Duration::from_secs(2));
        assert_eq!(config.tickets.entity_key, "device");
        assert_eq!(config.commands.len(), 3);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"queues": {{"channels": {{"command": {{"max_size": 2}}}}}}, "bus": {{"source": "rest.test"}}}}"#
        )
        .unwrap();

        let config = GatewayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.queues.channels.len(), 1);
        assert_eq!(config.queues.channels["command"].max_size, 2);
        assert_eq!(config.bus.source, "rest.test");
    }

    #[test]
    fn test_from_file_reports_missing_file() {
        let result = GatewayConfig::from_file("/nonexistent/domogik.json");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
