//! Ticketed event subscriptions for long-polling clients.
//!
//! A ticket owns one [`CorrelatedQueue`] fed by listeners on the entity ids it
//! was created for. Clients poll it with [`TicketRegistry::get`] instead of
//! holding a connection open.
//!
//! Locking is two-level: the ticket table guards ticket lifecycle, each
//! ticket queue guards its own messages. Bus delivery only ever touches the
//! queue lock.
//!
//! Idle tickets are reclaimed lazily on `get` and by the periodic sweep
//! started with [`TicketRegistry::spawn_sweeper`]. Idle age counts from the
//! last `create` or `get`.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use tokio::{task::JoinHandle, time::Instant};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    bus::{BusMessage, FieldFilter, FieldMatch, ListenerHandle, ListenerRegistry, MessageKind, MessageMatcher},
    config::TicketConfig,
    queue::CorrelatedQueue,
};

pub type Ticket = String;
pub type EntityId = i64;

struct TicketEntry {
    entity_ids: Vec<EntityId>,
    queue: Arc<CorrelatedQueue>,
    // Dropped with the entry, which unregisters the listeners.
    _listeners: Vec<ListenerHandle>,
    created_at: Instant,
    last_access: Instant,
}

/// A freshly opened ticket and whatever was already buffered for it.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenedTicket {
    pub ticket: Ticket,
    pub entity_ids: Vec<EntityId>,
    pub messages: Vec<BusMessage>,
}

#[derive(Clone)]
pub struct TicketRegistry {
    tickets: Arc<DashMap<Ticket, TicketEntry>>,
    listeners: ListenerRegistry,
    config: TicketConfig,
}

impl TicketRegistry {
    pub fn new(config: TicketConfig, listeners: ListenerRegistry) -> Self {
        Self {
            tickets: Arc::new(DashMap::new()),
            listeners,
            config,
        }
    }

    /// Opens a ticket listening for trigger messages about `entity_ids`.
    pub fn create(&self, entity_ids: Vec<EntityId>) -> OpenedTicket {
        let ticket = Uuid::new_v4().to_string();
        let queue = Arc::new(CorrelatedQueue::new(
            format!("event:{}", ticket),
            self.config.max_size,
            self.config.max_idle,
        ));

        let listeners = entity_ids
            .iter()
            .map(|id| {
                let matcher = MessageMatcher::new(MessageKind::Trigger, FieldMatch::any())
                    .with_filter(
                        FieldFilter::new()
                            .with(self.config.entity_key.as_str(), FieldMatch::Exact(id.to_string())),
                    );
                self.listeners.register(matcher, queue.clone())
            })
            .collect();

        let now = Instant::now();
        self.tickets.insert(
            ticket.clone(),
            TicketEntry {
                entity_ids: entity_ids.clone(),
                queue: Arc::clone(&queue),
                _listeners: listeners,
                created_at: now,
                last_access: now,
            },
        );
        info!(ticket = %ticket, entities = ?entity_ids, "Opened event ticket");

        OpenedTicket {
            ticket,
            entity_ids,
            messages: queue.drain(),
        }
    }

    /// Drains the messages buffered for `ticket`.
    ///
    /// `None` when the ticket is unknown or has been idle too long; an idle
    /// ticket is reclaimed on the spot.
    pub fn get(&self, ticket: &str) -> Option<Vec<BusMessage>> {
        let now = Instant::now();
        match self.tickets.get_mut(ticket) {
            None => return None,
            Some(mut entry) => {
                if !self.is_idle(&entry, now) {
                    entry.last_access = now;
                    return Some(entry.queue.drain());
                }
            }
        }
        if self.tickets.remove(ticket).is_some() {
            debug!(ticket, "Reclaimed idle ticket on access");
        }
        None
    }

    /// Drops `ticket`, its queue and its listeners. Returns whether it existed.
    pub fn free(&self, ticket: &str) -> bool {
        let removed = self.tickets.remove(ticket);
        if let Some((_, entry)) = &removed {
            info!(
                ticket,
                lifetime = ?entry.created_at.elapsed(),
                "Freed event ticket"
            );
        }
        removed.is_some()
    }

    pub fn count(&self) -> usize {
        self.tickets.len()
    }

    pub fn list(&self) -> Vec<Ticket> {
        let mut tickets: Vec<Ticket> = self.tickets.iter().map(|e| e.key().clone()).collect();
        tickets.sort();
        tickets
    }

    pub fn entities(&self, ticket: &str) -> Option<Vec<EntityId>> {
        self.tickets.get(ticket).map(|entry| entry.entity_ids.clone())
    }

    pub fn queue_max_size(&self) -> usize {
        self.config.max_size
    }

    /// Removes every idle ticket. Returns how many were reclaimed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let before = self.tickets.len();
        self.tickets.retain(|_, entry| !self.is_idle(entry, now));
        let reclaimed = before.saturating_sub(self.tickets.len());
        if reclaimed > 0 {
            info!(reclaimed, "Swept idle tickets");
        }
        reclaimed
    }

    /// Runs [`sweep`](Self::sweep) every `interval` until the sweeper is stopped.
    pub fn spawn_sweeper(&self, interval: Duration) -> Sweeper {
        let running = Arc::new(AtomicBool::new(true));
        let registry = self.clone();
        let flag = Arc::clone(&running);
        let handle = tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            // first tick completes immediately
            timer.tick().await;
            while flag.load(Ordering::SeqCst) {
                timer.tick().await;
                registry.sweep();
            }
            debug!("Ticket sweeper stopped");
        });
        Sweeper { running, handle }
    }

    fn is_idle(&self, entry: &TicketEntry, now: Instant) -> bool {
        now.duration_since(entry.last_access) > self.config.max_idle
    }
}

/// Background ticket sweep; stops when [`Sweeper::stop`] is called.
pub struct Sweeper {
    running: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Sweeper {
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst) && !self.handle.is_finished()
    }

    pub fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn registry(max_idle: Duration) -> (TicketRegistry, ListenerRegistry) {
        let listeners = ListenerRegistry::new();
        let config = TicketConfig {
            max_idle,
            ..Default::default()
        };
        (TicketRegistry::new(config, listeners.clone()), listeners)
    }

    fn sensor(device: &str, value: &str) -> BusMessage {
        BusMessage::builder(MessageKind::Trigger, "sensor.basic")
            .source("domogik-x10.darkstar")
            .field("device", device)
            .field("current", value)
            .build()
    }

    #[tokio::test]
    async fn test_ticket_round_trip() {
        let (tickets, listeners) = registry(Duration::from_secs(60));
        let opened = tickets.create(vec![1, 2]);
        assert!(opened.messages.is_empty());
        assert_eq!(listeners.len(), 2);

        listeners.dispatch(&sensor("1", "on"));
        listeners.dispatch(&sensor("3", "on"));
        listeners.dispatch(&sensor("2", "off"));

        let messages = tickets.get(&opened.ticket).unwrap();
        let devices: Vec<&str> = messages.iter().filter_map(|m| m.field("device")).collect();
        assert_eq!(devices, vec!["1", "2"]);

        assert_eq!(tickets.get(&opened.ticket), Some(vec![]));

        assert!(tickets.free(&opened.ticket));
        assert_eq!(tickets.get(&opened.ticket), None);
        assert!(!tickets.free(&opened.ticket));
        assert!(listeners.is_empty());
    }

    #[tokio::test]
    async fn test_tickets_do_not_share_queues() {
        let (tickets, listeners) = registry(Duration::from_secs(60));
        let first = tickets.create(vec![1]);
        let second = tickets.create(vec![1]);
        assert_ne!(first.ticket, second.ticket);

        listeners.dispatch(&sensor("1", "on"));
        assert_eq!(tickets.get(&first.ticket).unwrap().len(), 1);
        assert_eq!(tickets.get(&second.ticket).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_count_and_list() {
        let (tickets, _listeners) = registry(Duration::from_secs(60));
        let a = tickets.create(vec![1]);
        let b = tickets.create(vec![2, 3]);
        assert_eq!(tickets.count(), 2);

        let mut expected = vec![a.ticket.clone(), b.ticket.clone()];
        expected.sort();
        assert_eq!(tickets.list(), expected);
        assert_eq!(tickets.entities(&b.ticket), Some(vec![2, 3]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_ticket_expires_on_access() {
        let (tickets, listeners) = registry(Duration::from_secs(5));
        let opened = tickets.create(vec![1]);

        tokio::time::advance(Duration::from_secs(3)).await;
        // access resets the idle clock
        assert!(tickets.get(&opened.ticket).is_some());
        tokio::time::advance(Duration::from_secs(3)).await;
        assert!(tickets.get(&opened.ticket).is_some());

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(tickets.get(&opened.ticket), None);
        assert_eq!(tickets.count(), 0);
        assert!(listeners.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_reclaims_idle_tickets() {
        let (tickets, listeners) = registry(Duration::from_secs(5));
        let idle = tickets.create(vec![1]);
        let sweeper = tickets.spawn_sweeper(Duration::from_secs(2));
        assert!(sweeper.is_running());

        tokio::time::sleep(Duration::from_secs(4)).await;
        let fresh = tickets.create(vec![2]);
        tokio::time::sleep(Duration::from_secs(3)).await;

        // idle ticket is 7s old, fresh one 3s
        assert_eq!(tickets.list(), vec![fresh.ticket.clone()]);
        assert_eq!(tickets.entities(&idle.ticket), None);
        assert_eq!(listeners.len(), 1);
        sweeper.stop();
    }
}
