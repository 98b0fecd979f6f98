//! Bus plumbing: message model, field filters, listener registry and the
//! in-process transport.
//!
//! Every reply the gateway waits for travels through here:
//!
//! ```text
//! BusTransport::publish → pump task → ListenerRegistry::dispatch → Listener (usually a CorrelatedQueue)
//! ```

pub mod filter;
pub mod listener;
pub mod message;
pub mod transport;

use thiserror::Error;

pub use filter::{FieldFilter, FieldMatch, MessageMatcher, WILDCARD};
pub use listener::{Listener, ListenerHandle, ListenerId, ListenerRegistry};
pub use message::{BusMessage, MessageBuilder, MessageKind};
pub use transport::{BusTransport, LocalBus};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Malformed bus message: {0}")]
    Codec(String),

    #[error("Failed to publish message: {message}")]
    SendFailed { message: String },

    #[error("Bus pump already started")]
    AlreadyStarted,

    #[error("Listener rejected message: {0}")]
    Listener(String),
}

pub type BusResult<T> = Result<T, BusError>;
