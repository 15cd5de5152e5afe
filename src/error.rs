//! Error notifications carried on the channel and bus error streams.
//!
//! Every failure in this crate is reported asynchronously: publish, destroy,
//! and channel creation never raise, and one bad message never stops the
//! dispatch of subsequent messages. A caller who does not observe the error
//! streams sees silent message loss instead of a raised failure; that is the
//! intended fire-and-forget trade-off.

use thiserror::Error;

use crate::transport::TransportError;

/// An asynchronous error notification, scoped to the channel that detected it
/// and aggregated upward to its bus.
///
/// Variants stay `Clone` (stringified causes) so they can be fanned out on a
/// broadcast stream.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    /// Connection-level failure forwarded from the transport.
    #[error("transport connection error: {0}")]
    Connection(TransportError),

    /// Subscribe or unsubscribe acknowledgment failure.
    #[error("subscription failed on channel {channel}: {message}")]
    Subscription { channel: String, message: String },

    /// A received payload did not decode into an envelope.
    #[error("failed to decode envelope on channel {channel}: {message}")]
    Decode { channel: String, message: String },

    /// A send to the transport failed.
    #[error("publish failed on channel {channel}: {message}")]
    Publish { channel: String, message: String },

    /// A reply capability was invoked for an event that carried no
    /// correlation ID.
    #[error("reply sent on channel {channel} without a pending correlation id")]
    Misuse { channel: String },
}

impl From<TransportError> for BusError {
    fn from(err: TransportError) -> Self {
        BusError::Connection(err)
    }
}
