//! # Transport Abstraction
//!
//! The broadcast publish/subscribe substrate is an external collaborator,
//! not part of this crate's core. The bus only requires two connections from
//! it: one that publishes `(channel, payload)` pairs, and one that delivers
//! every message for the subscribed channel names on a single shared stream.
//! Both connections expose a best-effort error notification stream for
//! connection-level failures.
//!
//! Connection management, retry/reconnect, and authentication belong to the
//! transport implementation. The [`memory`] module provides a process-local
//! implementation used by tests, demos, and single-process deployments.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::broadcast;

pub mod memory;

pub use memory::MemoryTransport;

/// One message delivered by the transport: the channel name it was published
/// on, and the opaque payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportMessage {
    pub channel: String,
    pub payload: Vec<u8>,
}

/// Connection-level transport failures.
///
/// Variants carry stringified causes so the error stays `Clone` and can be
/// fanned out on a broadcast stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("transport connection failed: {message}")]
    Connection { message: String },

    #[error("publish failed on {channel}: {message}")]
    Publish { channel: String, message: String },

    #[error("subscribe failed on {channel}: {message}")]
    Subscribe { channel: String, message: String },

    #[error("unsubscribe failed on {channel}: {message}")]
    Unsubscribe { channel: String, message: String },
}

/// The publishing half of a transport connection pair.
#[async_trait]
pub trait PublishConnection: Send + Sync {
    /// Sends `payload` to every current subscriber of `channel`.
    ///
    /// Delivery is fire-and-forget: a successful return means the transport
    /// accepted the message, not that anyone received it.
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError>;

    /// Connection-level error notifications.
    fn errors(&self) -> broadcast::Receiver<TransportError>;
}

/// The subscribing half of a transport connection pair.
///
/// All subscribed channel names share one delivery stream; consumers filter
/// by [`TransportMessage::channel`].
#[async_trait]
pub trait SubscribeConnection: Send + Sync {
    /// Starts delivery of messages published on `channel`.
    async fn subscribe(&self, channel: &str) -> Result<(), TransportError>;

    /// Stops delivery for one subscription on `channel`.
    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError>;

    /// A receiver onto the shared delivery stream. Each call returns a fresh
    /// receiver observing all messages delivered from that point on.
    fn messages(&self) -> broadcast::Receiver<TransportMessage>;

    /// Connection-level error notifications.
    fn errors(&self) -> broadcast::Receiver<TransportError>;
}
