//! Receiver loop: transport → codec → identity filter → inbound queue.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::codec::Codec;
use crate::message::Message;
use crate::transport::FrameSource;

pub(crate) struct ReceiverLoop {
    pub source: Box<dyn FrameSource>,
    pub codec: Arc<dyn Codec>,
    pub identity: String,
    pub inbound: mpsc::Sender<Message>,
    pub shutdown: CancellationToken,
}

impl ReceiverLoop {
    pub async fn run(mut self) {
        tracing::trace!(identity = %self.identity, "Receiver loop starting");
        loop {
            let received = tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                received = self.source.recv_frame() => received,
            };

            let frame = match received {
                Ok(frame) => frame,
                Err(e) if e.is_closed() => {
                    tracing::warn!("Transport closed, stopping link");
                    // Take the sender loop down with us.
                    self.shutdown.cancel();
                    break;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Error reading from master");
                    continue;
                }
            };

            let msg = match self.codec.decode(&frame) {
                Ok(msg) => msg,
                Err(e) => {
                    tracing::warn!(error = %e, frame_size_bytes = frame.len(), "Failed to decode frame, dropping");
                    continue;
                }
            };

            if !msg.is_for(&self.identity) {
                tracing::debug!(
                    msg_type = msg.msg_type(),
                    node_id = msg.node_id(),
                    identity = %self.identity,
                    "Message not addressed to this worker, dropping"
                );
                continue;
            }

            tracing::trace!(msg_type = msg.msg_type(), "Received message from master");
            tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                sent = self.inbound.send(msg) => {
                    if let Err(mpsc::error::SendError(msg)) = sent {
                        tracing::debug!(msg_type = msg.msg_type(), "Inbound receiver dropped, discarding message");
                    }
                }
            }
        }
        tracing::trace!("Receiver loop exiting");
    }
}
