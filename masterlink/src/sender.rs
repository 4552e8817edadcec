//! Sender loop: outbound queue → codec → transport, with bounded retry.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::codec::Codec;
use crate::config::RetryPolicy;
use crate::error::TransportError;
use crate::message::Message;
use crate::notify::DisconnectNotifier;
use crate::transport::FrameSink;

/// Result of [`send_with_retry`].
#[derive(Debug)]
pub enum SendOutcome {
    Delivered { retries: u32 },
    /// Every attempt failed; the frame is dropped for good.
    Abandoned { attempts: u32, error: TransportError },
}

impl SendOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, Self::Delivered { .. })
    }
}

/// Transmits `frame`, retrying failed attempts after a fixed delay until
/// `policy.max_retries` is exceeded.
pub async fn send_with_retry(
    sink: &mut dyn FrameSink,
    frame: Bytes,
    policy: &RetryPolicy,
) -> SendOutcome {
    let mut retries: u32 = 0;
    loop {
        match sink.send_frame(frame.clone()).await {
            Ok(()) => {
                if retries > 0 {
                    tracing::info!(retries, "Send succeeded after retries");
                }
                return SendOutcome::Delivered { retries };
            }
            Err(error) => {
                retries += 1;
                if retries > policy.max_retries {
                    tracing::warn!(retries = policy.max_retries, error = %error, "Send failed after retries, dropping frame");
                    return SendOutcome::Abandoned {
                        attempts: retries,
                        error,
                    };
                }
                tracing::debug!(retry = retries, error = %error, "Send failed, retrying");
                tokio::time::sleep(policy.delay).await;
            }
        }
    }
}

pub(crate) struct SenderLoop {
    pub sink: Box<dyn FrameSink>,
    pub codec: Arc<dyn Codec>,
    pub outbound: mpsc::Receiver<Message>,
    pub retry: RetryPolicy,
    pub notifier: DisconnectNotifier,
    pub shutdown: CancellationToken,
}

impl SenderLoop {
    pub async fn run(mut self) {
        tracing::trace!("Sender loop starting");
        loop {
            let msg = tokio::select! {
                biased;

                _ = self.shutdown.cancelled() => break,

                msg = self.outbound.recv() => match msg {
                    Some(msg) => msg,
                    None => {
                        tracing::debug!("Outbound queue closed");
                        break;
                    }
                },
            };
            self.process(msg).await;
        }
        tracing::trace!("Sender loop exiting");
    }

    async fn process(&mut self, msg: Message) {
        match self.codec.encode(&msg) {
            Ok(frame) => {
                let outcome = send_with_retry(self.sink.as_mut(), frame, &self.retry).await;
                tracing::trace!(msg_type = msg.msg_type(), delivered = outcome.is_delivered(), "Send attempt complete");
            }
            Err(e) => {
                tracing::warn!(msg_type = msg.msg_type(), error = %e, "Failed to encode message, dropping");
            }
        }

        // Fires whether or not the quit frame actually reached the master.
        if msg.is_quit() && self.notifier.fire() {
            tracing::info!("Quit processed, disconnect signalled");
        }
    }
}
