//! Correlated request queues.
//!
//! A [`CorrelatedQueue`] buffers bus replies for one logical channel and lets
//! concurrent waiters pick out the entries matching their own request. The
//! [`QueueManager`] owns the fixed set of named channels.

pub mod correlated;
pub mod manager;

use std::time::Duration;

use thiserror::Error;

pub use correlated::{CorrelatedQueue, QueueEntry};
pub use manager::QueueManager;

pub const SYSTEM_LIST: &str = "system_list";
pub const SYSTEM_DETAIL: &str = "system_detail";
pub const SYSTEM_START: &str = "system_start";
pub const SYSTEM_STOP: &str = "system_stop";
pub const COMMAND: &str = "command";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("No matching message on queue '{queue}' within {timeout:?}")]
    Timeout { queue: String, timeout: Duration },

    #[error("Unknown queue channel: {0}")]
    UnknownChannel(String),
}

pub type QueueResult<T> = Result<T, QueueError>;
