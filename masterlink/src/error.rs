use std::time::Duration;

use thiserror::Error;

/// Fatal errors returned synchronously from `connect`. Never retried here.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("failed to connect to master at {endpoint}: {source}")]
    Transport {
        endpoint: String,
        #[source]
        source: TransportError,
    },

    #[error("client is already connected")]
    AlreadyConnected,

    /// A closed client cannot be reconnected; build a new one.
    #[error("client has been closed")]
    Closed,

    #[error("invalid identity: {0}")]
    InvalidIdentity(String),
}

/// Errors raised by a frame transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport handle is gone; no further frames will arrive.
    #[error("transport closed")]
    Closed,

    #[error("received message without frames")]
    EmptyMessage,

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("connection refused: {0}")]
    Refused(String),

    #[error(transparent)]
    Zmq(#[from] zeromq::ZmqError),

    /// Fault raised on purpose by the in-memory transport.
    #[error("injected fault: {0}")]
    Injected(String),
}

impl TransportError {
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}
