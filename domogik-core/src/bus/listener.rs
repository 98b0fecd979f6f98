use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use dashmap::DashMap;
use tracing::{debug, trace, warn};

use super::{BusResult, filter::MessageMatcher, message::BusMessage};

pub type ListenerId = u64;

/// Receives every bus message matching its registration.
///
/// Invoked on the transport's delivery task: implementations must hand the
/// message off and return quickly.
pub trait Listener: Send + Sync {
    fn on_message(&self, message: &BusMessage) -> BusResult<()>;
}

impl<F> Listener for F
where
    F: Fn(&BusMessage) -> BusResult<()> + Send + Sync,
{
    fn on_message(&self, message: &BusMessage) -> BusResult<()> {
        self(message)
    }
}

struct Registration {
    matcher: MessageMatcher,
    listener: Arc<dyn Listener>,
}

/// Routes inbound messages to every registration whose matcher accepts them.
///
/// The registry holds no message state; registrations are usually short-lived
/// and owned through a [`ListenerHandle`].
#[derive(Clone, Default)]
pub struct ListenerRegistry {
    registrations: Arc<DashMap<ListenerId, Arc<Registration>>>,
    next_id: Arc<AtomicU64>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `listener`; the registration lives as long as the returned handle.
    pub fn register(&self, matcher: MessageMatcher, listener: Arc<dyn Listener>) -> ListenerHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        debug!(
            listener_id = id,
            kind = %matcher.kind,
            schema = %matcher.schema,
            "Registering bus listener"
        );
        self.registrations
            .insert(id, Arc::new(Registration { matcher, listener }));
        ListenerHandle {
            id,
            registry: self.clone(),
        }
    }

    /// Removes a registration. Unknown ids are ignored.
    pub fn unregister(&self, id: ListenerId) -> bool {
        let removed = self.registrations.remove(&id).is_some();
        if removed {
            debug!(listener_id = id, "Unregistered bus listener");
        }
        removed
    }

    /// Delivers `message` to every matching listener, in registration order.
    ///
    /// A listener that fails or panics is logged and skipped. Returns the
    /// number of listeners that accepted the message.
    pub fn dispatch(&self, message: &BusMessage) -> usize {
        // Collected first so listeners may (un)register without holding shard locks.
        let mut targets: Vec<(ListenerId, Arc<Registration>)> = self
            .registrations
            .iter()
            .filter(|entry| entry.value().matcher.matches(message))
            .map(|entry| (*entry.key(), Arc::clone(entry.value())))
            .collect();
        targets.sort_by_key(|(id, _)| *id);

        trace!(
            schema = message.schema(),
            matched = targets.len(),
            "Dispatching bus message"
        );

        let mut delivered = 0;
        for (id, registration) in targets {
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| registration.listener.on_message(message)));
            match outcome {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!(listener_id = id, error = %e, "Bus listener failed"),
                Err(_) => warn!(listener_id = id, "Bus listener panicked"),
            }
        }
        delivered
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }
}

impl fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("registrations", &self.registrations.len())
            .finish()
    }
}

/// Scoped registration: dropping the handle unregisters the listener.
#[must_use = "dropping the handle unregisters the listener immediately"]
pub struct ListenerHandle {
    id: ListenerId,
    registry: ListenerRegistry,
}

impl ListenerHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

impl fmt::Debug for ListenerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerHandle").field("id", &self.id).finish()
    }
}
