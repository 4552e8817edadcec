//! masterlink: worker-side control channel to a load-test master.
//!
//! A [`MasterClient`] owns one transport connection and two tasks: a receiver
//! loop that decodes frames from the master and keeps only those addressed to
//! this worker, and a sender loop that encodes outbound messages and
//! transmits them with bounded retry. Sending a `quit` message resolves the
//! one-shot disconnect channel.

mod client;
mod notify;
mod receiver;
mod sender;

pub mod codec;
pub mod config;
pub mod error;
pub mod message;
pub mod transport;

pub use client::MasterClient;
pub use codec::{Codec, CodecError, MsgpackCodec};
pub use config::{ClientConfig, RetryPolicy, generate_identity};
pub use error::{ConnectionError, TransportError};
pub use message::{Message, kind};
pub use notify::DisconnectNotifier;
pub use sender::{SendOutcome, send_with_retry};
