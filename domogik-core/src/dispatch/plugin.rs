//! Plugin management over `domogik.system`: listing, detail, start and stop.

use std::collections::HashSet;

use serde_json::{Value, json};
use strum::{Display, EnumString};

use super::{DispatchError, DispatchResult};
use crate::{
    bus::{BusMessage, FieldFilter, FieldMatch, MessageKind, MessageMatcher},
    queue,
};

pub const SYSTEM_SCHEMA: &str = "domogik.system";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum PluginAction {
    Start,
    Stop,
}

impl PluginAction {
    pub fn channel(self) -> &'static str {
        match self {
            Self::Start => queue::SYSTEM_START,
            Self::Stop => queue::SYSTEM_STOP,
        }
    }
}

pub fn list_request(source: &str) -> BusMessage {
    BusMessage::builder(MessageKind::Command, SYSTEM_SCHEMA)
        .source(source)
        .field("command", "list")
        .field("host", "*")
        .build()
}

/// Every `domogik.system` trigger answering `command`.
pub fn channel_matcher(command: &str) -> MessageMatcher {
    MessageMatcher::new(MessageKind::Trigger, SYSTEM_SCHEMA)
        .with_filter(FieldFilter::new().with("command", FieldMatch::Exact(command.to_string())))
}

pub fn list_matcher() -> MessageMatcher {
    channel_matcher("list")
}

/// One object per `pluginN` field of every reply.
///
/// Only the first reply of each host counts: a host answering concurrent
/// list commands repeats the same listing.
pub fn render_list(replies: &[BusMessage]) -> Vec<Value> {
    let mut hosts = HashSet::new();
    replies
        .iter()
        .filter(|&reply| hosts.insert(reply.field("host").unwrap_or(reply.source())))
        .flat_map(|reply| {
            let host = reply.field("host").unwrap_or_default().to_string();
            reply
                .indexed_fields("plugin")
                .into_iter()
                .map(move |line| {
                    let mut parts = line.splitn(4, ',');
                    let mut next = || parts.next().unwrap_or_default().to_string();
                    json!({
                        "name": next(),
                        "technology": next(),
                        "status": next(),
                        "description": next(),
                        "host": host,
                    })
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

pub fn detail_request(source: &str, name: &str, host: &str) -> BusMessage {
    BusMessage::builder(MessageKind::Command, SYSTEM_SCHEMA)
        .source(source)
        .field("command", "detail")
        .field("plugin", name)
        .field("host", host)
        .build()
}

pub fn detail_matcher(name: &str) -> MessageMatcher {
    MessageMatcher::new(MessageKind::Trigger, SYSTEM_SCHEMA).with_filter(
        FieldFilter::new()
            .with("command", "detail")
            .with("plugin", FieldMatch::Prefix(name.to_string())),
    )
}

pub fn render_detail(reply: &BusMessage) -> DispatchResult<Value> {
    check_reply(reply)?;
    let field = |key: &str| reply.field(key).unwrap_or_default().to_string();
    let configuration: Vec<Value> = reply
        .indexed_fields("config")
        .into_iter()
        .enumerate()
        .map(|(id, line)| {
            let mut parts = line.splitn(4, ',');
            let mut next = || parts.next().unwrap_or_default().to_string();
            json!({
                "id": id + 1,
                "key": next(),
                "type": next(),
                "description": next(),
                "default": next(),
            })
        })
        .collect();

    Ok(json!({
        "name": field("plugin"),
        "host": field("host"),
        "technology": field("technology"),
        "description": field("description"),
        "status": field("status"),
        "version": field("version"),
        "documentation": field("documentation"),
        "configuration": configuration,
    }))
}

pub fn control_request(source: &str, action: PluginAction, name: &str, host: &str) -> BusMessage {
    BusMessage::builder(MessageKind::Command, SYSTEM_SCHEMA)
        .source(source)
        .field("command", action.to_string())
        .field("plugin", name)
        .field("host", host)
        .build()
}

pub fn control_matcher(action: PluginAction, name: &str) -> MessageMatcher {
    MessageMatcher::new(MessageKind::Trigger, SYSTEM_SCHEMA).with_filter(
        FieldFilter::new()
            .with("command", FieldMatch::Exact(action.to_string()))
            .with("plugin", FieldMatch::Exact(name.to_string())),
    )
}

/// A reply carrying an `error` field is a remote failure.
pub fn check_reply(reply: &BusMessage) -> DispatchResult<()> {
    match reply.field("error") {
        Some(error) => Err(DispatchError::Remote(error.to_string())),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn list_reply(host: &str, plugins: &[&str]) -> BusMessage {
        BusMessage::builder(MessageKind::Trigger, SYSTEM_SCHEMA)
            .source(format!("domogik-manager.{}", host))
            .field("command", "list")
            .field("host", host)
            .fields(
                plugins
                    .iter()
                    .enumerate()
                    .map(|(i, p)| (format!("plugin{}", i), p.to_string())),
            )
            .build()
    }

    #[test]
    fn test_render_list_across_hosts() {
        let replies = vec![
            list_reply("darkstar", &["x10,x10,ON,X10 lights, lamps and dimmers"]),
            list_reply("igor", &["cidmodem,phone,OFF,Caller id", "xbmc_not,xbmc,ON,"]),
        ];
        let plugins = render_list(&replies);
        assert_eq!(plugins.len(), 3);
        assert_eq!(
            plugins[0],
            json!({
                "name": "x10",
                "technology": "x10",
                "status": "ON",
                "description": "X10 lights, lamps and dimmers",
                "host": "darkstar",
            })
        );
        assert_eq!(plugins[2]["name"], "xbmc_not");
        assert_eq!(plugins[2]["host"], "igor");
    }

    #[test]
    fn test_render_list_keeps_first_reply_per_host() {
        let replies = vec![
            list_reply("darkstar", &["x10,x10,ON,"]),
            list_reply("igor", &["cidmodem,phone,OFF,"]),
            list_reply("darkstar", &["x10,x10,ON,"]),
        ];
        let names: Vec<Value> = render_list(&replies)
            .into_iter()
            .map(|plugin| plugin["name"].clone())
            .collect();
        assert_eq!(names, vec![json!("x10"), json!("cidmodem")]);
    }

    #[test]
    fn test_config_ids_start_at_one() {
        let reply = BusMessage::builder(MessageKind::Trigger, SYSTEM_SCHEMA)
            .field("command", "detail")
            .field("plugin", "teleinfo")
            .field("config0", "startup-plugin,boolean,Start automatically,False")
            .field("config1", "device,string,Serial port,/dev/teleinfo")
            .build();
        let detail = render_detail(&reply).unwrap();
        let ids: Vec<&Value> = detail["configuration"]
            .as_array()
            .unwrap()
            .iter()
            .map(|entry| &entry["id"])
            .collect();
        assert_eq!(ids, vec![&json!(1), &json!(2)]);
    }

    #[test]
    fn test_channel_matcher_is_exact_on_command() {
        let matcher = channel_matcher("start");
        let start = control_request("rest.test", PluginAction::Start, "x10", "darkstar");
        let reply = BusMessage::builder(MessageKind::Trigger, SYSTEM_SCHEMA)
            .field("command", "start")
            .field("plugin", "x10")
            .build();
        assert!(!matcher.matches(&start));
        assert!(matcher.matches(&reply));
        assert!(!channel_matcher("stop").matches(&reply));
    }

    #[test]
    fn test_render_detail() {
        let reply = BusMessage::builder(MessageKind::Trigger, SYSTEM_SCHEMA)
            .field("command", "detail")
            .field("plugin", "x10")
            .field("host", "darkstar")
            .field("technology", "x10")
            .field("status", "ON")
            .field("version", "0.1")
            .field("documentation", "http://wiki.domogik.org/plugin_x10")
            .field("description", "X10 lights")
            .field("config0", "startup-plugin,boolean,Start automatically,False")
            .build();

        let detail = render_detail(&reply).unwrap();
        assert_eq!(detail["name"], "x10");
        assert_eq!(detail["version"], "0.1");
        assert_eq!(
            detail["configuration"],
            json!([{
                "id": 1,
                "key": "startup-plugin",
                "type": "boolean",
                "description": "Start automatically",
                "default": "False",
            }])
        );
    }

    #[test]
    fn test_error_field_becomes_remote_error() {
        let reply = BusMessage::builder(MessageKind::Trigger, SYSTEM_SCHEMA)
            .field("command", "start")
            .field("plugin", "x10")
            .field("error", "Plugin already running")
            .build();
        assert_eq!(
            check_reply(&reply),
            Err(DispatchError::Remote("Plugin already running".to_string()))
        );
        assert!(render_detail(&reply).is_err());
    }

    #[test]
    fn test_detail_matcher_uses_prefix() {
        let matcher = detail_matcher("x10");
        let reply = BusMessage::builder(MessageKind::Trigger, SYSTEM_SCHEMA)
            .field("command", "detail")
            .field("plugin", "x10_extra")
            .build();
        assert!(matcher.matches(&reply));
    }

    #[test]
    fn test_control_request_fields() {
        let message = control_request("rest.test", PluginAction::Stop, "x10", "darkstar");
        assert_eq!(message.field("command"), Some("stop"));
        assert_eq!(PluginAction::Stop.channel(), "system_stop");
        assert_eq!("start".parse::<PluginAction>().unwrap(), PluginAction::Start);
    }
}
