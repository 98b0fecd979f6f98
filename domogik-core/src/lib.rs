//! # Domogik gateway core
//!
//! The request/response layer between synchronous clients and the
//! home-automation message bus. A client request becomes a broadcast on the
//! bus; replies from plugins arrive asynchronously and are correlated back to
//! the waiting request.
//!
//! ## Building blocks
//!
//! - [`bus`]: message model and wire codec, field filters, the listener
//!   registry and the in-process transport.
//! - [`queue`]: bounded, time-limited correlated queues with single-reply
//!   and aggregated multi-reply waits, one per named channel.
//! - [`ticket`]: long-poll event subscriptions, each with its own queue.
//! - [`dispatch`]: routes an inbound request to fire-and-forget, single-reply
//!   or multi-reply flows and renders the response envelope.
//! - [`repository`]: the persistence boundary used when rendering records.
//! - [`plugins`]: bus participants that run next to the gateway.
//!
//! ## Request flow
//!
//! ```text
//! Dispatcher → register listener → publish → pump → ListenerRegistry → CorrelatedQueue → wait → render
//! ```
//!
//! [`gateway::Gateway`] wires all of it from a [`config::GatewayConfig`].

pub mod bus;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gateway;
pub mod plugins;
pub mod queue;
pub mod repository;
pub mod ticket;

pub use error::*;
pub use gateway::{Gateway, GatewayTasks};

#[cfg(test)]
mod tests {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    #[ctor::ctor]
    fn init_tests() {
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    }
}
