use std::{panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use serde_json::{Value, json};
use tracing::{debug, error, info, instrument, warn};

use super::{
    DispatchError, DispatchResult, RequestPhase,
    command::CommandCatalog,
    helper::HelperRegistry,
    plugin::{self, PluginAction},
    records::{self, parse_id},
    request::{InboundRequest, key_value_pairs},
    response::{RestResponse, message_json},
    stats::{self, records_json},
};
use crate::{
    bus::{
        BusMessage, BusTransport, ListenerHandle, ListenerRegistry, MessageKind, MessageMatcher,
    },
    queue::{self, QueueManager},
    repository::{RecordFields, Repository},
    ticket::{EntityId, TicketRegistry},
};

/// Bridges inbound requests to the bus and the repository.
///
/// Cheap to clone; every clone shares the same queues, listeners and tickets.
#[derive(Clone)]
pub struct Dispatcher {
    bus: Arc<dyn BusTransport>,
    listeners: ListenerRegistry,
    queues: QueueManager,
    tickets: TicketRegistry,
    repository: Arc<dyn Repository>,
    helpers: HelperRegistry,
    commands: Arc<CommandCatalog>,
    source: String,
}

impl Dispatcher {
    pub fn new(
        bus: Arc<dyn BusTransport>,
        listeners: ListenerRegistry,
        queues: QueueManager,
        tickets: TicketRegistry,
        repository: Arc<dyn Repository>,
    ) -> Self {
        Self {
            bus,
            listeners,
            queues,
            tickets,
            repository,
            helpers: HelperRegistry::default(),
            commands: Arc::new(CommandCatalog::default()),
            source: "domogik-rest.gateway".to_string(),
        }
    }

    pub fn with_helpers(mut self, helpers: HelperRegistry) -> Self {
        self.helpers = helpers;
        self
    }

    pub fn with_commands(mut self, commands: CommandCatalog) -> Self {
        self.commands = Arc::new(commands);
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn helpers(&self) -> &HelperRegistry {
        &self.helpers
    }

    /// Registers one listener per channel feeding its shared queue, which
    /// backs `/queuecontent` and the status usage. Requests wait on private
    /// inboxes, so nothing consumes these entries; they age out.
    ///
    /// The taps stay registered for as long as the returned handles live.
    pub fn tap_channels(&self) -> Vec<ListenerHandle> {
        let mut taps = vec![
            (queue::SYSTEM_LIST, plugin::channel_matcher("list")),
            (queue::SYSTEM_DETAIL, plugin::channel_matcher("detail")),
            (queue::SYSTEM_START, plugin::channel_matcher("start")),
            (queue::SYSTEM_STOP, plugin::channel_matcher("stop")),
        ];
        taps.extend(
            self.commands
                .channel_matchers()
                .into_iter()
                .map(|matcher| (queue::COMMAND, matcher)),
        );

        taps.into_iter()
            .filter_map(|(channel, matcher)| match self.queues.channel(channel) {
                Ok(queue) => Some(self.listeners.register(matcher, queue)),
                Err(err) => {
                    warn!(channel, error = %err, "Channel not configured, not tapped");
                    None
                }
            })
            .collect()
    }

    /// Handles one request. Always returns a rendered response; failures and
    /// panics below this point become error payloads.
    #[instrument(skip(self, request), fields(route = request.route().unwrap_or("/")))]
    pub async fn dispatch(&self, request: &InboundRequest) -> RestResponse {
        debug!(phase = %RequestPhase::Parsed, verb = %request.verb);
        let data_type = request.data_type();

        let outcome = AssertUnwindSafe(self.route(request)).catch_unwind().await;
        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                debug!(error = %err, "Request failed");
                RestResponse::error(data_type, err)
            }
            Err(_) => {
                error!("Request handler panicked");
                RestResponse::error(
                    data_type,
                    DispatchError::Internal("request handler panicked".to_string()),
                )
            }
        };
        debug!(phase = %RequestPhase::Rendered, status = ?response.status);
        response
    }

    async fn route(&self, request: &InboundRequest) -> DispatchResult<RestResponse> {
        let segments: Vec<&str> = request.segments.iter().map(String::as_str).collect();
        match segments.as_slice() {
            [] => Ok(self.status()),
            ["command", techno, address, command, args @ ..] => {
                self.command(techno, address, command, args).await
            }
            ["xpl-cmnd", schema, pairs @ ..] => self.raw_command(schema, pairs),
            ["plugin", rest @ ..] => self.plugin(rest).await,
            ["events", rest @ ..] => self.events(rest),
            ["queuecontent", channel] => self.queue_content(channel),
            ["base", entity, rest @ ..] => self.base(entity, rest).await,
            ["stats", rest @ ..] => Ok(RestResponse::ok(
                "stats",
                stats::route(self.repository.as_ref(), rest).await?,
            )),
            ["account", rest @ ..] => {
                let data_type = request.data_type();
                let records = records::account(self.repository.as_ref(), rest).await?;
                Ok(RestResponse::ok(data_type, records_json(records)))
            }
            ["helper", rest @ ..] => self.helper(rest).await,
            [route, ..] => Err(DispatchError::NotFound(format!(
                "Unknown request: {}",
                route
            ))),
        }
    }

    fn status(&self) -> RestResponse {
        let mut queues = json!(self.queues.usage());
        queues["event"] = json!(format!("-/{}", self.tickets.queue_max_size()));
        RestResponse::ok(
            "rest",
            vec![json!({
                "info": { "version": env!("CARGO_PKG_VERSION") },
                "queue": queues,
                "event": {
                    "count": self.tickets.count(),
                    "max_size": self.tickets.queue_max_size(),
                    "tickets": self.tickets.list(),
                },
            })],
        )
    }

    /// Publishes `message` and waits for the first reply matching `matcher` on `channel`.
    async fn request_one(
        &self,
        channel: &str,
        subject: &str,
        message: BusMessage,
        matcher: MessageMatcher,
    ) -> DispatchResult<BusMessage> {
        // Private to this request so concurrent identical requests never
        // take each other's replies. The channel queue is fed by its tap.
        let queue = Arc::new(self.queues.channel(channel)?.inbox());
        // Held until this function returns or its future is dropped.
        let _registration = self.listeners.register(matcher.clone(), queue.clone());

        self.bus.publish(message)?;
        debug!(phase = %RequestPhase::Published, channel);

        debug!(phase = %RequestPhase::Waiting, channel);
        match queue.wait_one(&matcher, self.queues.wait_timeout()).await {
            Ok(reply) => {
                debug!(phase = %RequestPhase::Matched, channel);
                Ok(reply)
            }
            Err(err) => {
                debug!(phase = %RequestPhase::TimedOut, channel, error = %err);
                Err(DispatchError::Timeout(subject.to_string()))
            }
        }
    }

    /// Publishes `message` and collects replies for the aggregation window.
    async fn request_many(
        &self,
        channel: &str,
        subject: &str,
        message: BusMessage,
        matcher: MessageMatcher,
    ) -> DispatchResult<Vec<BusMessage>> {
        let queue = Arc::new(self.queues.channel(channel)?.inbox());
        let _registration = self.listeners.register(matcher.clone(), queue.clone());

        self.bus.publish(message)?;
        debug!(phase = %RequestPhase::Published, channel);

        debug!(phase = %RequestPhase::Aggregating, channel);
        match queue
            .wait_many(
                &matcher,
                self.queues.wait_timeout(),
                self.queues.aggregation_window(),
            )
            .await
        {
            Ok(replies) => {
                debug!(phase = %RequestPhase::Aggregated, channel, replies = replies.len());
                Ok(replies)
            }
            Err(err) => {
                debug!(phase = %RequestPhase::TimedOut, channel, error = %err);
                Err(DispatchError::Timeout(subject.to_string()))
            }
        }
    }

    async fn command(
        &self,
        techno: &str,
        address: &str,
        command: &str,
        args: &[&str],
    ) -> DispatchResult<RestResponse> {
        let definition = self.commands.lookup(techno, command).ok_or_else(|| {
            DispatchError::NotFound(format!("No command '{}' for technology '{}'", command, techno))
        })?;
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let message = definition.build_message(&self.source, address, &args)?;

        match definition.reply_matcher(address) {
            Some(matcher) => {
                let reply = self
                    .request_one(queue::COMMAND, "command", message, matcher)
                    .await?;
                Ok(RestResponse::ok("xpl", vec![json!(reply.to_string())]))
            }
            None => {
                self.bus.publish(message)?;
                debug!(phase = %RequestPhase::Published, "Fire-and-forget command");
                Ok(RestResponse::empty("xpl"))
            }
        }
    }

    fn raw_command(&self, schema: &str, pairs: &[&str]) -> DispatchResult<RestResponse> {
        let fields = key_value_pairs(pairs)?;
        let message = BusMessage::builder(MessageKind::Command, schema)
            .source(self.source.as_str())
            .fields(fields)
            .build();
        self.bus.publish(message)?;
        debug!(phase = %RequestPhase::Published, schema);
        Ok(RestResponse::empty("xpl"))
    }

    async fn plugin(&self, segments: &[&str]) -> DispatchResult<RestResponse> {
        match segments {
            ["list"] => {
                let replies = self
                    .request_many(
                        queue::SYSTEM_LIST,
                        "plugin list",
                        plugin::list_request(&self.source),
                        plugin::list_matcher(),
                    )
                    .await?;
                Ok(RestResponse::ok("plugin", plugin::render_list(&replies)))
            }
            ["detail", name, host] => {
                let reply = self
                    .request_one(
                        queue::SYSTEM_DETAIL,
                        "plugin detail",
                        plugin::detail_request(&self.source, name, host),
                        plugin::detail_matcher(name),
                    )
                    .await?;
                Ok(RestResponse::ok("plugin", vec![plugin::render_detail(&reply)?]))
            }
            ["config", rest @ ..] => {
                let records = records::plugin_config(self.repository.as_ref(), rest).await?;
                Ok(RestResponse::ok("config", records_json(records)))
            }
            [action, name, host] => {
                let action: PluginAction = action.parse().map_err(|_| {
                    DispatchError::NotFound(format!("Unknown plugin request: {}", action))
                })?;
                let subject = format!("plugin {}", action);
                let reply = self
                    .request_one(
                        action.channel(),
                        &subject,
                        plugin::control_request(&self.source, action, name, host),
                        plugin::control_matcher(action, name),
                    )
                    .await?;
                plugin::check_reply(&reply)?;
                info!(plugin = %name, host = %host, %action, "Plugin control acknowledged");
                Ok(RestResponse::empty("plugin"))
            }
            _ => Err(DispatchError::BadRequest(format!(
                "Unknown plugin request: /{}",
                segments.join("/")
            ))),
        }
    }

    fn events(&self, segments: &[&str]) -> DispatchResult<RestResponse> {
        match segments {
            ["request", "new", ids @ ..] if !ids.is_empty() => {
                let entity_ids = ids
                    .iter()
                    .map(|id| {
                        id.parse::<EntityId>().map_err(|_| {
                            DispatchError::BadRequest(format!("entity id must be an integer: {}", id))
                        })
                    })
                    .collect::<DispatchResult<Vec<_>>>()?;
                let opened = self.tickets.create(entity_ids);
                Ok(RestResponse::ok(
                    "event",
                    vec![json!({
                        "ticket_id": opened.ticket,
                        "entities": opened.entity_ids,
                        "messages": opened.messages.iter().map(message_json).collect::<Vec<_>>(),
                    })],
                ))
            }
            ["request", "get", ticket] => {
                let messages = self.tickets.get(ticket).ok_or_else(|| {
                    DispatchError::NotFound("Error in getting event in queue".to_string())
                })?;
                Ok(RestResponse::ok(
                    "event",
                    vec![json!({
                        "ticket_id": ticket,
                        "messages": messages.iter().map(message_json).collect::<Vec<_>>(),
                    })],
                ))
            }
            ["request", "free", ticket] => {
                if !self.tickets.free(ticket) {
                    return Err(DispatchError::NotFound(
                        "Error when trying to free queue for event".to_string(),
                    ));
                }
                Ok(RestResponse::empty("event"))
            }
            _ => Err(DispatchError::BadRequest(format!(
                "Unknown events request: /{}",
                segments.join("/")
            ))),
        }
    }

    fn queue_content(&self, channel: &str) -> DispatchResult<RestResponse> {
        let queue = self.queues.channel(channel)?;
        let entries = queue
            .snapshot()
            .into_iter()
            .map(|entry| {
                json!({
                    "time": entry.received_wall.to_rfc3339(),
                    "content": entry.message.to_string(),
                })
            })
            .collect();
        Ok(RestResponse::ok("queue", entries))
    }

    async fn base(&self, entity: &str, segments: &[&str]) -> DispatchResult<RestResponse> {
        let records = match segments {
            ["list"] => self.repository.list(entity, &RecordFields::new()).await?,
            ["list", "by-id", id] => vec![self.repository.get(entity, parse_id(id)?).await?],
            ["add", pairs @ ..] => {
                let fields = record_fields(pairs)?;
                info!(target: "domogik::dm", entity, "add");
                vec![self.repository.add(entity, fields).await?]
            }
            ["update", "id", id, pairs @ ..] => {
                let id = parse_id(id)?;
                let fields = record_fields(pairs)?;
                info!(target: "domogik::dm", entity, id, "update");
                vec![self.repository.update(entity, id, fields).await?]
            }
            ["del", id] => {
                let id = parse_id(id)?;
                info!(target: "domogik::dm", entity, id, "del");
                vec![self.repository.delete(entity, id).await?]
            }
            _ => {
                return Err(DispatchError::BadRequest(format!(
                    "Unknown request for {}: /{}",
                    entity,
                    segments.join("/")
                )));
            }
        };
        Ok(RestResponse::ok(entity, records_json(records)))
    }

    async fn helper(&self, segments: &[&str]) -> DispatchResult<RestResponse> {
        match segments {
            [] | ["help"] => Ok(RestResponse::ok(
                "helper",
                self.helpers
                    .describe()
                    .into_iter()
                    .map(|(name, description)| json!(format!("{} : {}", name, description)))
                    .collect(),
            )),
            [name, args @ ..] => {
                let handler = self.helpers.get(name).ok_or_else(|| {
                    DispatchError::NotFound(format!("Helper '{}' does not exist", name))
                })?;
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                let lines = handler.execute(&args).await.inspect_err(|e| {
                    warn!(helper = %name, error = %e, "Helper failed");
                })?;
                Ok(RestResponse::ok("helper", lines.into_iter().map(Value::String).collect()))
            }
        }
    }
}

fn record_fields(segments: &[&str]) -> DispatchResult<RecordFields> {
    Ok(key_value_pairs(segments)?.into_iter().collect())
}
