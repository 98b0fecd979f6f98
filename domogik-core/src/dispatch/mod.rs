//! Request dispatcher: turns one inbound request into zero or one bus
//! broadcast, waits for the correlated reply when there is one, and renders a
//! [`RestResponse`].
//!
//! Each request moves through [`RequestPhase`]s and always ends `Rendered`,
//! with either a data payload or an error payload.

pub mod command;
pub mod dispatcher;
pub mod helper;
pub mod plugin;
pub mod records;
pub mod request;
pub mod response;
pub mod stats;

use strum::Display;
use thiserror::Error;

use crate::{bus::BusError, queue::QueueError, repository::RepositoryError};

pub use command::{CommandCatalog, CommandDefinition};
pub use dispatcher::Dispatcher;
pub use helper::{Handler, HandlerError, HelperRegistry};
pub use request::InboundRequest;
pub use response::{ResponseStatus, RestResponse};

/// Code carried by every error payload.
pub const ERROR_CODE: u16 = 999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestPhase {
    Parsed,
    Published,
    Waiting,
    Matched,
    TimedOut,
    Aggregating,
    Aggregated,
    Rendered,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("No data or timeout on getting {0} response")]
    Timeout(String),

    #[error("Storage error: {0}")]
    Storage(String),

    /// Error reported by the remote participant in its reply.
    #[error("{0}")]
    Remote(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

impl From<RepositoryError> for DispatchError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound { .. } | RepositoryError::UnknownEntity(_) => {
                Self::NotFound(err.to_string())
            }
            RepositoryError::Conflict(msg) => Self::Conflict(msg),
            RepositoryError::Storage(msg) => Self::Storage(msg),
        }
    }
}

impl From<QueueError> for DispatchError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Timeout { queue, .. } => Self::Timeout(queue),
            QueueError::UnknownChannel(_) => Self::NotFound(err.to_string()),
        }
    }
}

impl From<BusError> for DispatchError {
    fn from(err: BusError) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<HandlerError> for DispatchError {
    fn from(err: HandlerError) -> Self {
        match err {
            HandlerError::InvalidArguments(msg) => Self::BadRequest(msg),
            HandlerError::Failed(msg) => Self::Internal(msg),
        }
    }
}
