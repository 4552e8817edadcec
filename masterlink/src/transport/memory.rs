//! In-process transport with a scriptable master end.
//!
//! [`channel`] returns a [`MemoryConnector`] for the client and a
//! [`MasterEnd`] standing in for the master: it injects frames and read
//! errors, observes transmitted frames, and can fail sends or refuse the
//! connection.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::mpsc;

use super::{Connector, FrameSink, FrameSource, TransportPair};
use crate::error::TransportError;

type Delivery = Result<Bytes, TransportError>;

#[derive(Default)]
struct Faults {
    failing_sends: AtomicUsize,
    send_attempts: AtomicUsize,
    refuse: AtomicBool,
    connected: Mutex<Option<(String, String)>>,
}

struct WorkerSide {
    inbound: mpsc::UnboundedReceiver<Delivery>,
    outbound: mpsc::UnboundedSender<Bytes>,
}

/// Client half of an in-memory transport. Accepts a single connection.
pub struct MemoryConnector {
    faults: Arc<Faults>,
    worker: Mutex<Option<WorkerSide>>,
}

/// Master half of an in-memory transport.
pub struct MasterEnd {
    faults: Arc<Faults>,
    to_worker: mpsc::UnboundedSender<Delivery>,
    from_worker: mpsc::UnboundedReceiver<Bytes>,
}

pub fn channel() -> (MemoryConnector, MasterEnd) {
    let (to_worker, inbound) = mpsc::unbounded_channel();
    let (outbound, from_worker) = mpsc::unbounded_channel();
    let faults = Arc::new(Faults::default());

    let connector = MemoryConnector {
        faults: Arc::clone(&faults),
        worker: Mutex::new(Some(WorkerSide { inbound, outbound })),
    };
    let master = MasterEnd {
        faults,
        to_worker,
        from_worker,
    };
    (connector, master)
}

#[async_trait::async_trait]
impl Connector for MemoryConnector {
    async fn connect(
        &self,
        endpoint: &str,
        identity: &str,
    ) -> Result<TransportPair, TransportError> {
        if self.faults.refuse.load(Ordering::SeqCst) {
            return Err(TransportError::Refused(endpoint.to_string()));
        }

        let worker = self
            .worker
            .lock()
            .map_err(|_| TransportError::Refused("connector lock poisoned".to_string()))?
            .take()
            .ok_or_else(|| TransportError::Refused(format!("{endpoint} already in use")))?;

        if let Ok(mut connected) = self.faults.connected.lock() {
            *connected = Some((endpoint.to_string(), identity.to_string()));
        }

        Ok(TransportPair {
            sink: Box::new(MemorySink {
                faults: Arc::clone(&self.faults),
                tx: worker.outbound,
            }),
            source: Box::new(MemorySource {
                rx: worker.inbound,
            }),
        })
    }
}

struct MemorySink {
    faults: Arc<Faults>,
    tx: mpsc::UnboundedSender<Bytes>,
}

#[async_trait::async_trait]
impl FrameSink for MemorySink {
    async fn send_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.faults.send_attempts.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .faults
            .failing_sends
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(TransportError::Injected("send failure".to_string()));
        }
        self.tx.send(frame).map_err(|_| TransportError::Closed)
    }
}

struct MemorySource {
    rx: mpsc::UnboundedReceiver<Delivery>,
}

#[async_trait::async_trait]
impl FrameSource for MemorySource {
    async fn recv_frame(&mut self) -> Result<Bytes, TransportError> {
        self.rx.recv().await.unwrap_or(Err(TransportError::Closed))
    }
}

impl MasterEnd {
    /// Queues a frame for the worker to receive.
    pub fn push_frame(&self, frame: impl Into<Bytes>) {
        let _ = self.to_worker.send(Ok(frame.into()));
    }

    /// Makes the worker's next receive fail with `error`.
    pub fn push_error(&self, error: TransportError) {
        let _ = self.to_worker.send(Err(error));
    }

    /// Next frame the worker transmitted, or `None` once its sink is gone.
    pub async fn next_frame(&mut self) -> Option<Bytes> {
        self.from_worker.recv().await
    }

    pub fn try_next_frame(&mut self) -> Option<Bytes> {
        self.from_worker.try_recv().ok()
    }

    /// Fails the next `count` send attempts.
    pub fn fail_next_sends(&self, count: usize) {
        self.faults.failing_sends.store(count, Ordering::SeqCst);
    }

    /// Total send attempts seen, including failed ones.
    pub fn send_attempts(&self) -> usize {
        self.faults.send_attempts.load(Ordering::SeqCst)
    }

    pub fn refuse_connections(&self) {
        self.faults.refuse.store(true, Ordering::SeqCst);
    }

    /// Endpoint and identity the worker connected with.
    pub fn connected_as(&self) -> Option<(String, String)> {
        self.faults.connected.lock().ok().and_then(|c| c.clone())
    }
}
