//! Frame codec for master communication.
//!
//! One [`Message`] maps to one opaque transport frame. The default codec is
//! MessagePack, matching what the master expects; the [`Codec`] trait lets the
//! client run over any other encoding.

use bytes::Bytes;

use crate::message::Message;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("msgpack encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("msgpack decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Converts messages to and from single frames. Both directions may fail.
pub trait Codec: Send + Sync + 'static {
    fn encode(&self, message: &Message) -> Result<Bytes, CodecError>;

    fn decode(&self, frame: &[u8]) -> Result<Message, CodecError>;
}

/// MessagePack codec producing `[type, data, node_id]` arrays.
#[derive(Debug, Default, Clone, Copy)]
pub struct MsgpackCodec;

impl Codec for MsgpackCodec {
    fn encode(&self, message: &Message) -> Result<Bytes, CodecError> {
        let buf = rmp_serde::to_vec(message)?;
        tracing::trace!(
            msg_type = message.msg_type(),
            frame_size_bytes = buf.len(),
            "Encoded frame"
        );
        Ok(Bytes::from(buf))
    }

    fn decode(&self, frame: &[u8]) -> Result<Message, CodecError> {
        Ok(rmp_serde::from_slice(frame)?)
    }
}
