//! ZeroMQ DEALER transport.
//!
//! The worker identity is set as the socket's routing id, so a ROUTER on the
//! master side can address replies to this worker.

use bytes::Bytes;
use zeromq::util::PeerIdentity;
use zeromq::{
    DealerRecvHalf, DealerSendHalf, DealerSocket, Socket, SocketOptions, SocketRecv, SocketSend,
    ZmqMessage,
};

use super::{Connector, FrameSink, FrameSource, TransportPair};
use crate::error::TransportError;

/// Connects DEALER sockets over TCP.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZmqConnector;

#[async_trait::async_trait]
impl Connector for ZmqConnector {
    async fn connect(
        &self,
        endpoint: &str,
        identity: &str,
    ) -> Result<TransportPair, TransportError> {
        let peer_id = PeerIdentity::try_from(identity.as_bytes().to_vec())?;
        let mut options = SocketOptions::default();
        options.peer_identity(peer_id);

        let mut socket = DealerSocket::with_options(options);
        tracing::debug!(%endpoint, %identity, "Connecting dealer socket");
        socket.connect(endpoint).await?;

        let (send, recv) = socket.split();
        Ok(TransportPair {
            sink: Box::new(DealerSink { inner: send }),
            source: Box::new(DealerSource { inner: recv }),
        })
    }
}

struct DealerSink {
    inner: DealerSendHalf,
}

#[async_trait::async_trait]
impl FrameSink for DealerSink {
    async fn send_frame(&mut self, frame: Bytes) -> Result<(), TransportError> {
        self.inner.send(ZmqMessage::from(frame)).await?;
        Ok(())
    }
}

struct DealerSource {
    inner: DealerRecvHalf,
}

#[async_trait::async_trait]
impl FrameSource for DealerSource {
    async fn recv_frame(&mut self) -> Result<Bytes, TransportError> {
        let message = self.inner.recv().await?;
        let mut frames = message.into_vec().into_iter();
        let frame = frames.next().ok_or(TransportError::EmptyMessage)?;
        let extra = frames.len();
        if extra > 0 {
            tracing::debug!(extra, "Ignoring trailing frames in multipart message");
        }
        Ok(frame)
    }
}
