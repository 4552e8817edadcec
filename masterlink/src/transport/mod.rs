//! Frame transports between a worker and the master.
//!
//! A transport is split into a sink half (written only by the sender loop)
//! and a source half (read only by the receiver loop), so the two loops never
//! contend on the handle.
//!
//! Implementations:
//! - **zmq**: ZeroMQ DEALER socket carrying the worker identity
//! - **memory**: in-process transport with a scriptable master end

pub mod memory;
pub mod zmq;

use bytes::Bytes;

use crate::error::TransportError;

pub use memory::{MasterEnd, MemoryConnector};
pub use zmq::ZmqConnector;

/// Write half of a transport.
#[async_trait::async_trait]
pub trait FrameSink: Send + 'static {
    async fn send_frame(&mut self, frame: Bytes) -> Result<(), TransportError>;
}

/// Read half of a transport.
#[async_trait::async_trait]
pub trait FrameSource: Send + 'static {
    /// Waits for the next frame. Returns [`TransportError::Closed`] once the
    /// handle is gone; other errors are transient.
    async fn recv_frame(&mut self) -> Result<Bytes, TransportError>;
}

/// Both halves of an opened transport.
pub struct TransportPair {
    pub sink: Box<dyn FrameSink>,
    pub source: Box<dyn FrameSource>,
}

/// Opens a transport to `endpoint` registered under `identity`.
#[async_trait::async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &str, identity: &str)
    -> Result<TransportPair, TransportError>;
}
