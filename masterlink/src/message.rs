//! Messages exchanged between a worker and the master.
//!
//! A message is a type tag, the identity of the worker it concerns, and a
//! payload. On the wire it is a 3-element array `[type, data, node_id]`,
//! which is what a locust-compatible master speaks.
//!
//! The payload is a MessagePack value, so raw `bin` data and non-string map
//! keys sent by the master survive decoding.

use rmpv::Value;
use serde::{Deserialize, Serialize};

/// Well-known message type tags.
pub mod kind {
    /// Worker announces itself to the master after connecting.
    pub const CLIENT_READY: &str = "client_ready";
    pub const CLIENT_STOPPED: &str = "client_stopped";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const STATS: &str = "stats";
    pub const SPAWNING: &str = "spawning";
    pub const SPAWNING_COMPLETE: &str = "spawning_complete";
    pub const SPAWN: &str = "spawn";
    pub const STOP: &str = "stop";
    /// Terminating message: ends the session in either direction.
    pub const QUIT: &str = "quit";
    pub const EXCEPTION: &str = "exception";
    pub const ACK: &str = "ack";
    pub const RECONNECT: &str = "reconnect";
}

/// One unit of exchange with the master.
///
/// Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireMessage", into = "WireMessage")]
pub struct Message {
    msg_type: String,
    data: Value,
    node_id: String,
}

impl Message {
    pub fn new(
        msg_type: impl Into<String>,
        data: Value,
        node_id: impl Into<String>,
    ) -> Self {
        Self {
            msg_type: msg_type.into(),
            data,
            node_id: node_id.into(),
        }
    }

    pub fn client_ready(node_id: impl Into<String>) -> Self {
        Self::new(kind::CLIENT_READY, Value::Nil, node_id)
    }

    /// Heartbeat carrying the worker's runner state and CPU usage.
    pub fn heartbeat(node_id: impl Into<String>, state: &str, cpu_usage: f64) -> Self {
        Self::new(
            kind::HEARTBEAT,
            Value::Map(vec![
                (Value::from("state"), Value::from(state)),
                (Value::from("current_cpu_usage"), Value::from(cpu_usage)),
            ]),
            node_id,
        )
    }

    pub fn quit(node_id: impl Into<String>) -> Self {
        Self::new(kind::QUIT, Value::Nil, node_id)
    }

    pub fn msg_type(&self) -> &str {
        &self.msg_type
    }

    pub fn data(&self) -> &Value {
        &self.data
    }

    /// Looks up a string-keyed entry when the payload is a map.
    pub fn field(&self, key: &str) -> Option<&Value> {
        self.data
            .as_map()?
            .iter()
            .find(|(k, _)| k.as_str() == Some(key))
            .map(|(_, v)| v)
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn is_quit(&self) -> bool {
        self.msg_type == kind::QUIT
    }

    pub fn is_for(&self, identity: &str) -> bool {
        self.node_id == identity
    }
}

/// Positional wire layout. A nil node id (master broadcast without a target)
/// decodes to an empty identity, which never matches a worker.
#[derive(Serialize, Deserialize)]
struct WireMessage(String, Value, Option<String>);

impl From<WireMessage> for Message {
    fn from(WireMessage(msg_type, data, node_id): WireMessage) -> Self {
        Self {
            msg_type,
            data,
            node_id: node_id.unwrap_or_default(),
        }
    }
}

impl From<Message> for WireMessage {
    fn from(msg: Message) -> Self {
        WireMessage(msg.msg_type, msg.data, Some(msg.node_id))
    }
}
