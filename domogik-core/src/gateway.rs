use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::{
    InternalResult,
    bus::{BusTransport, ListenerHandle, ListenerRegistry, LocalBus},
    config::GatewayConfig,
    dispatch::{CommandCatalog, Dispatcher, HelperRegistry},
    plugins::{DateTimeBroadcaster, DateTimeHelper},
    queue::QueueManager,
    repository::InMemoryRepository,
    ticket::{Sweeper, TicketRegistry},
};

/// Everything the gateway needs, wired from one [`GatewayConfig`].
pub struct Gateway {
    pub config: GatewayConfig,
    pub bus: Arc<LocalBus>,
    pub listeners: ListenerRegistry,
    pub queues: QueueManager,
    pub tickets: TicketRegistry,
    pub repository: Arc<InMemoryRepository>,
    pub helpers: HelperRegistry,
    pub dispatcher: Dispatcher,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        let listeners = ListenerRegistry::new();
        let bus = Arc::new(LocalBus::new(config.bus.capacity, listeners.clone()));
        let queues = QueueManager::new(&config.queues);
        let tickets = TicketRegistry::new(config.tickets.clone(), listeners.clone());
        let repository = Arc::new(InMemoryRepository::new(config.entities.iter().cloned()));
        let helpers = HelperRegistry::new();
        helpers.register("datetime", Arc::new(DateTimeHelper));

        let dispatcher = Dispatcher::new(
            bus.clone(),
            listeners.clone(),
            queues.clone(),
            tickets.clone(),
            repository.clone(),
        )
        .with_helpers(helpers.clone())
        .with_commands(CommandCatalog::new(config.commands.iter().cloned()))
        .with_source(config.bus.source.as_str());

        Self {
            config,
            bus,
            listeners,
            queues,
            tickets,
            repository,
            helpers,
            dispatcher,
        }
    }

    /// Starts the bus pump, the ticket sweeper and, when enabled, the clock,
    /// and taps the reply channels.
    pub fn start(&self) -> InternalResult<GatewayTasks> {
        let pump = self.bus.start()?;
        let taps = self.dispatcher.tap_channels();
        let sweeper = self.tickets.spawn_sweeper(self.config.tickets.sweep_interval);

        let clock = self.config.datetime.enabled.then(|| {
            let bus: Arc<dyn BusTransport> = self.bus.clone();
            let broadcaster = Arc::new(DateTimeBroadcaster::new(
                bus,
                self.config.datetime.source.as_str(),
                self.config.datetime.interval,
            ));
            let handle = Arc::clone(&broadcaster).spawn();
            (broadcaster, handle)
        });

        info!(
            channels = ?self.queues.channel_names(),
            taps = taps.len(),
            clock = clock.is_some(),
            "Gateway started"
        );
        Ok(GatewayTasks {
            taps,
            pump,
            sweeper,
            clock,
        })
    }
}

/// Background tasks started by [`Gateway::start`].
pub struct GatewayTasks {
    taps: Vec<ListenerHandle>,
    pump: JoinHandle<()>,
    sweeper: Sweeper,
    clock: Option<(Arc<DateTimeBroadcaster>, JoinHandle<()>)>,
}

impl GatewayTasks {
    pub fn shutdown(self) {
        if let Some((broadcaster, handle)) = self.clock {
            broadcaster.stop();
            handle.abort();
        }
        self.sweeper.stop();
        drop(self.taps);
        self.pump.abort();
        info!("Gateway stopped");
    }
}
