use thiserror::Error;

use crate::{
    bus::BusError, dispatch::DispatchError, queue::QueueError, repository::RepositoryError,
};

#[derive(Error, Debug)]
pub enum Error {
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type InternalResult<T> = Result<T, Error>;

impl Error {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Error::Internal(message.into())
    }
}
