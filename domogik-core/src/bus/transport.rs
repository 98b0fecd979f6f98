use std::sync::{Mutex, PoisonError};

use tokio::{
    sync::broadcast::{self, error::RecvError},
    task::JoinHandle,
};
use tracing::{debug, info, trace, warn};

use super::{BusError, BusResult, listener::ListenerRegistry, message::BusMessage};

/// Publishing side of the message bus.
pub trait BusTransport: Send + Sync {
    fn publish(&self, message: BusMessage) -> BusResult<()>;
}

/// In-process bus over a broadcast channel.
///
/// A pump task started with [`LocalBus::start`] feeds every published message
/// into the listener registry. Messages published before the pump starts are
/// buffered up to `capacity`.
pub struct LocalBus {
    sender: broadcast::Sender<BusMessage>,
    pump_receiver: Mutex<Option<broadcast::Receiver<BusMessage>>>,
    listeners: ListenerRegistry,
    capacity: usize,
}

impl LocalBus {
    pub fn new(capacity: usize, listeners: ListenerRegistry) -> Self {
        let (sender, receiver) = broadcast::channel(capacity);
        Self {
            sender,
            pump_receiver: Mutex::new(Some(receiver)),
            listeners,
            capacity,
        }
    }

    /// Spawns the delivery task. Fails if it is already running.
    pub fn start(&self) -> BusResult<JoinHandle<()>> {
        let mut receiver = self
            .pump_receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
            .ok_or(BusError::AlreadyStarted)?;
        let listeners = self.listeners.clone();

        info!(capacity = self.capacity, "Starting bus pump");
        Ok(tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(message) => {
                        listeners.dispatch(&message);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Bus pump lagged, messages were lost");
                    }
                    Err(RecvError::Closed) => {
                        debug!("Bus closed, stopping pump");
                        break;
                    }
                }
            }
        }))
    }

    /// Raw view of the bus traffic, independent of the listener registry.
    pub fn subscribe(&self) -> broadcast::Receiver<BusMessage> {
        self.sender.subscribe()
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn subscribers_size(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl BusTransport for LocalBus {
    fn publish(&self, message: BusMessage) -> BusResult<()> {
        trace!(
            kind = %message.kind(),
            schema = message.schema(),
            source = message.source(),
            "Publishing bus message"
        );
        self.sender
            .send(message)
            .map(|_| ())
            .map_err(|e| BusError::SendFailed {
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{MessageKind, MessageMatcher};
    use crate::queue::CorrelatedQueue;
    use std::{sync::Arc, time::Duration};

    #[tokio::test]
    async fn test_pump_feeds_listeners() {
        let listeners = ListenerRegistry::new();
        let bus = LocalBus::new(16, listeners.clone());
        let queue = Arc::new(CorrelatedQueue::new(
            "test",
            10,
            Duration::from_secs(5),
        ));
        let matcher = MessageMatcher::new(MessageKind::Trigger, "hbeat.app");
        let _registration = listeners.register(matcher.clone(), queue.clone());

        // published before the pump exists: buffered
        bus.publish(
            BusMessage::builder(MessageKind::Trigger, "hbeat.app")
                .source("domogik-x10.darkstar")
                .build(),
        )
        .unwrap();
        let _pump = bus.start().unwrap();

        let message = queue
            .wait_one(&matcher, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(message.source(), "domogik-x10.darkstar");
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let bus = LocalBus::new(4, ListenerRegistry::new());
        let _pump = bus.start().unwrap();
        assert_eq!(bus.start().unwrap_err(), BusError::AlreadyStarted);
    }
}
