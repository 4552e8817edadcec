//! Connection manager for the worker's link to the master.
//!
//! Flow:
//! 1. Build a [`MasterClient`] from a [`ClientConfig`] (queues, no I/O)
//! 2. `connect()` opens the transport and spawns the receiver and sender loops
//! 3. The owning process reads `recv_channel()` and writes `send_channel()`
//! 4. `close()` fires the shutdown token and waits for both loops to exit

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::codec::{Codec, MsgpackCodec};
use crate::config::ClientConfig;
use crate::error::{ConnectionError, TransportError};
use crate::message::Message;
use crate::notify::DisconnectNotifier;
use crate::receiver::ReceiverLoop;
use crate::sender::SenderLoop;
use crate::transport::{Connector, TransportPair, ZmqConnector};

/// Loop inputs created up front and handed to the loops on connect.
struct Pending {
    outbound: mpsc::Receiver<Message>,
    inbound: mpsc::Sender<Message>,
    notifier: DisconnectNotifier,
}

enum LinkState {
    Idle(Pending),
    Open {
        receiver: JoinHandle<()>,
        sender: JoinHandle<()>,
    },
    Closed,
}

/// Worker-side link to the master.
pub struct MasterClient {
    config: ClientConfig,
    codec: Arc<dyn Codec>,
    to_master: mpsc::Sender<Message>,
    from_master: Option<mpsc::Receiver<Message>>,
    disconnected: Option<oneshot::Receiver<()>>,
    shutdown: CancellationToken,
    state: LinkState,
}

impl MasterClient {
    pub fn new(config: ClientConfig) -> Self {
        Self::with_codec(config, Arc::new(MsgpackCodec))
    }

    pub fn with_codec(config: ClientConfig, codec: Arc<dyn Codec>) -> Self {
        let (to_master, outbound) = mpsc::channel(config.outbound_capacity.max(1));
        let (inbound, from_master) = mpsc::channel(config.inbound_capacity.max(1));
        let (notifier, disconnected) = DisconnectNotifier::channel();

        Self {
            config,
            codec,
            to_master,
            from_master: Some(from_master),
            disconnected: Some(disconnected),
            shutdown: CancellationToken::new(),
            state: LinkState::Idle(Pending {
                outbound,
                inbound,
                notifier,
            }),
        }
    }

    /// Connects to the configured master over a ZeroMQ DEALER socket.
    pub async fn connect(&mut self) -> Result<(), ConnectionError> {
        self.connect_with(&ZmqConnector).await
    }

    /// Connects through `connector` and starts the receiver and sender loops.
    ///
    /// Failure is fatal for this attempt and is not retried here.
    pub async fn connect_with(&mut self, connector: &dyn Connector) -> Result<(), ConnectionError> {
        let pending = match std::mem::replace(&mut self.state, LinkState::Closed) {
            LinkState::Idle(pending) => pending,
            open @ LinkState::Open { .. } => {
                self.state = open;
                return Err(ConnectionError::AlreadyConnected);
            }
            LinkState::Closed => return Err(ConnectionError::Closed),
        };

        let pair = match self.open_transport(connector).await {
            Ok(pair) => pair,
            Err(e) => {
                // Failed attempts leave the client idle.
                self.state = LinkState::Idle(pending);
                return Err(e);
            }
        };

        let endpoint = self.config.endpoint();
        let receiver = ReceiverLoop {
            source: pair.source,
            codec: Arc::clone(&self.codec),
            identity: self.config.identity.clone(),
            inbound: pending.inbound,
            shutdown: self.shutdown.clone(),
        };
        let sender = SenderLoop {
            sink: pair.sink,
            codec: Arc::clone(&self.codec),
            outbound: pending.outbound,
            retry: self.config.retry,
            notifier: pending.notifier,
            shutdown: self.shutdown.clone(),
        };

        self.state = LinkState::Open {
            receiver: tokio::spawn(receiver.run()),
            sender: tokio::spawn(sender.run()),
        };

        tracing::info!(%endpoint, identity = %self.config.identity, "Connected to master");
        Ok(())
    }

    async fn open_transport(
        &self,
        connector: &dyn Connector,
    ) -> Result<TransportPair, ConnectionError> {
        if self.config.identity.is_empty() {
            return Err(ConnectionError::InvalidIdentity(
                "identity must not be empty".to_string(),
            ));
        }

        let endpoint = self.config.endpoint();
        let timeout = self.config.connect_timeout;
        let connecting = connector.connect(&endpoint, &self.config.identity);
        match tokio::time::timeout(timeout, connecting).await {
            Ok(Ok(pair)) => Ok(pair),
            Ok(Err(source)) => Err(ConnectionError::Transport { endpoint, source }),
            Err(_) => Err(ConnectionError::Transport {
                endpoint,
                source: TransportError::Timeout(timeout),
            }),
        }
    }

    /// Stops both loops and releases the transport.
    ///
    /// Waits at most `close_timeout`; loops still running after that are
    /// aborted. Calling it again is a no-op.
    pub async fn close(&mut self) {
        match std::mem::replace(&mut self.state, LinkState::Closed) {
            LinkState::Open {
                mut receiver,
                mut sender,
            } => {
                self.shutdown.cancel();
                let joined = tokio::time::timeout(self.config.close_timeout, async {
                    let _ = (&mut receiver).await;
                    let _ = (&mut sender).await;
                })
                .await;
                if joined.is_err() {
                    tracing::warn!(
                        timeout = ?self.config.close_timeout,
                        "Link loops did not stop in time, aborting"
                    );
                    receiver.abort();
                    sender.abort();
                }
                tracing::info!(identity = %self.config.identity, "Disconnected from master");
            }
            LinkState::Idle(_) => {
                self.shutdown.cancel();
                tracing::debug!("Closed a link that was never connected");
            }
            LinkState::Closed => {
                tracing::warn!("close() called on an already closed link");
            }
        }
    }

    /// Outbound queue to the master. Sends wait while the queue is full.
    pub fn send_channel(&self) -> mpsc::Sender<Message> {
        self.to_master.clone()
    }

    /// Inbound queue from the master. Handed out once; later calls get `None`.
    pub fn recv_channel(&mut self) -> Option<mpsc::Receiver<Message>> {
        self.from_master.take()
    }

    /// Resolves once a `quit` message has been processed by the sender loop.
    /// Handed out once; later calls get `None`.
    pub fn disconnected_channel(&mut self) -> Option<oneshot::Receiver<()>> {
        self.disconnected.take()
    }

    pub fn identity(&self) -> &str {
        &self.config.identity
    }

    pub fn endpoint(&self) -> String {
        self.config.endpoint()
    }

    /// True while both loops are running.
    pub fn is_open(&self) -> bool {
        matches!(self.state, LinkState::Open { .. }) && !self.shutdown.is_cancelled()
    }
}

impl Drop for MasterClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rmpv::Value;

    use super::*;
    use crate::config::RetryPolicy;
    use crate::message::kind;
    use crate::transport::memory::{self, MasterEnd};

    const WAIT: Duration = Duration::from_secs(1);

    fn config() -> ClientConfig {
        ClientConfig::new("127.0.0.1", 5557, "worker-1").with_retry(RetryPolicy {
            max_retries: 3,
            delay: Duration::from_millis(1),
        })
    }

    async fn connected(config: ClientConfig) -> (MasterClient, MasterEnd) {
        let (connector, master) = memory::channel();
        let mut client = MasterClient::new(config);
        client.connect_with(&connector).await.unwrap();
        (client, master)
    }

    fn frame(msg: &Message) -> bytes::Bytes {
        MsgpackCodec.encode(msg).unwrap()
    }

    async fn next_sent(master: &mut MasterEnd) -> Message {
        let frame = tokio::time::timeout(WAIT, master.next_frame())
            .await
            .expect("timed out waiting for frame")
            .expect("worker sink closed");
        MsgpackCodec.decode(&frame).unwrap()
    }

    #[tokio::test]
    async fn connect_registers_identity_at_endpoint() {
        let (client, master) = connected(config()).await;
        assert!(client.is_open());
        assert_eq!(
            master.connected_as(),
            Some(("tcp://127.0.0.1:5557".to_string(), "worker-1".to_string()))
        );
    }

    #[tokio::test]
    async fn routing_and_quit_scenario() {
        let (mut client, mut master) = connected(config()).await;
        let mut inbound = client.recv_channel().unwrap();
        let disconnected = client.disconnected_channel().unwrap();

        master.push_frame(frame(&Message::new(kind::HEARTBEAT, Value::Nil, "worker-2")));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(inbound.try_recv().is_err());

        master.push_frame(frame(&Message::new(kind::HEARTBEAT, Value::Nil, "worker-1")));
        let msg = tokio::time::timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
        assert_eq!(msg.msg_type(), kind::HEARTBEAT);
        assert_eq!(msg.node_id(), "worker-1");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(inbound.try_recv().is_err());

        client.send_channel().send(Message::quit("worker-1")).await.unwrap();
        assert!(next_sent(&mut master).await.is_quit());
        tokio::time::timeout(WAIT, disconnected).await.unwrap().unwrap();
        assert!(master.try_next_frame().is_none());

        client.close().await;
    }

    #[tokio::test]
    async fn second_quit_does_not_signal_again() {
        let (mut client, mut master) = connected(config()).await;
        let disconnected = client.disconnected_channel().unwrap();
        assert!(client.disconnected_channel().is_none());

        let tx = client.send_channel();
        tx.send(Message::quit("worker-1")).await.unwrap();
        tx.send(Message::quit("worker-1")).await.unwrap();
        next_sent(&mut master).await;
        next_sent(&mut master).await;
        tokio::time::timeout(WAIT, disconnected).await.unwrap().unwrap();

        client.close().await;
    }

    #[tokio::test]
    async fn outbound_order_is_preserved() {
        let (mut client, mut master) = connected(config()).await;
        let tx = client.send_channel();

        for i in 0..50u64 {
            tx.send(Message::new(kind::STATS, Value::from(i), "worker-1"))
                .await
                .unwrap();
        }
        for i in 0..50u64 {
            assert_eq!(next_sent(&mut master).await.data().as_u64(), Some(i));
        }

        client.close().await;
    }

    #[tokio::test]
    async fn concurrent_producers_keep_per_producer_order() {
        const PRODUCERS: u64 = 4;
        const PER_PRODUCER: u64 = 25;

        let (mut client, mut master) = connected(config().with_queue_capacity(100, 8)).await;

        let producers: Vec<_> = (0..PRODUCERS)
            .map(|producer| {
                let tx = client.send_channel();
                tokio::spawn(async move {
                    for seq in 0..PER_PRODUCER {
                        let tag = Value::from(producer * 1000 + seq);
                        tx.send(Message::new(kind::STATS, tag, "worker-1"))
                            .await
                            .unwrap();
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        let mut seen = vec![Vec::new(); PRODUCERS as usize];
        for _ in 0..PRODUCERS * PER_PRODUCER {
            let tag = next_sent(&mut master).await.data().as_u64().unwrap();
            seen[(tag / 1000) as usize].push(tag % 1000);
        }
        for producer in producers {
            producer.await.unwrap();
        }

        let expected: Vec<u64> = (0..PER_PRODUCER).collect();
        for sequence in &seen {
            assert_eq!(sequence, &expected);
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(master.try_next_frame().is_none());

        client.close().await;
    }

    #[tokio::test]
    async fn abandoned_send_is_not_requeued() {
        let (mut client, mut master) = connected(config()).await;
        master.fail_next_sends(4);
        let tx = client.send_channel();

        tx.send(Message::client_ready("worker-1")).await.unwrap();
        tx.send(Message::heartbeat("worker-1", "ready", 1.0)).await.unwrap();

        let msg = next_sent(&mut master).await;
        assert_eq!(msg.msg_type(), kind::HEARTBEAT);
        assert_eq!(master.send_attempts(), 5);
        assert!(master.try_next_frame().is_none());

        client.close().await;
    }

    #[tokio::test]
    async fn full_inbound_queue_applies_backpressure() {
        let (mut client, master) = connected(config().with_queue_capacity(1, 1)).await;
        let mut inbound = client.recv_channel().unwrap();

        for i in 0..3u64 {
            master.push_frame(frame(&Message::new(kind::SPAWN, Value::from(i), "worker-1")));
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        for i in 0..3u64 {
            let msg = tokio::time::timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
            assert_eq!(msg.data().as_u64(), Some(i));
        }

        client.close().await;
    }

    #[tokio::test]
    async fn close_stops_both_loops() {
        let (mut client, _master) = connected(config()).await;
        let mut inbound = client.recv_channel().unwrap();
        let tx = client.send_channel();

        tokio::time::timeout(WAIT, client.close()).await.unwrap();

        assert!(!client.is_open());
        assert!(inbound.recv().await.is_none());
        assert!(tx.send(Message::quit("worker-1")).await.is_err());

        // Second close is a no-op.
        client.close().await;
    }

    #[tokio::test]
    async fn dropping_the_client_releases_the_transport() {
        let (client, mut master) = connected(config()).await;
        let _tx = client.send_channel();

        drop(client);
        let next = tokio::time::timeout(WAIT, master.next_frame()).await.unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn lost_transport_closes_the_link() {
        let (mut client, master) = connected(config()).await;
        let mut inbound = client.recv_channel().unwrap();

        drop(master);
        assert!(tokio::time::timeout(WAIT, inbound.recv()).await.unwrap().is_none());
        assert!(!client.is_open());

        client.close().await;
    }

    #[tokio::test]
    async fn refused_connection_is_fatal() {
        let (connector, master) = memory::channel();
        master.refuse_connections();
        let mut client = MasterClient::new(config());

        let err = client.connect_with(&connector).await.unwrap_err();
        assert!(matches!(
            err,
            ConnectionError::Transport {
                source: TransportError::Refused(_),
                ..
            }
        ));
        assert!(!client.is_open());
    }

    #[tokio::test]
    async fn failed_connect_leaves_client_idle() {
        let (refusing, refusing_master) = memory::channel();
        refusing_master.refuse_connections();
        let mut client = MasterClient::new(config());
        let mut inbound = client.recv_channel().unwrap();

        assert!(client.connect_with(&refusing).await.is_err());
        assert!(!client.is_open());

        let (connector, master) = memory::channel();
        client.connect_with(&connector).await.unwrap();
        assert!(client.is_open());

        master.push_frame(frame(&Message::client_ready("worker-1")));
        let msg = tokio::time::timeout(WAIT, inbound.recv()).await.unwrap().unwrap();
        assert_eq!(msg.msg_type(), kind::CLIENT_READY);

        client.close().await;
    }

    #[tokio::test]
    async fn connect_twice_is_rejected() {
        let (mut client, _master) = connected(config()).await;
        let (other, _other_master) = memory::channel();

        let err = client.connect_with(&other).await.unwrap_err();
        assert!(matches!(err, ConnectionError::AlreadyConnected));

        client.close().await;
        let err = client.connect_with(&other).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Closed));
    }

    #[tokio::test]
    async fn empty_identity_is_rejected() {
        let (connector, _master) = memory::channel();
        let mut client = MasterClient::new(ClientConfig::new("127.0.0.1", 5557, ""));

        let err = client.connect_with(&connector).await.unwrap_err();
        assert!(matches!(err, ConnectionError::InvalidIdentity(_)));
    }

    #[test]
    fn channels_are_handed_out_once() {
        let mut client = MasterClient::new(config());
        assert!(client.recv_channel().is_some());
        assert!(client.recv_channel().is_none());
        assert!(client.disconnected_channel().is_some());
        assert!(client.disconnected_channel().is_none());
        assert_eq!(client.identity(), "worker-1");
        assert_eq!(client.endpoint(), "tcp://127.0.0.1:5557");
    }
}
