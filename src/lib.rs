//! # chanbus: Named Channels over Broadcast Pub/Sub
//!
//! chanbus layers two capabilities on top of a fire-and-forget broadcast
//! publish/subscribe transport:
//!
//! 1. **Channel multiplexing**: many named logical streams share one
//!    publish connection and one subscription stream. Each [`Channel`]
//!    filters the shared stream down to its own name.
//! 2. **Request/acknowledgment correlation**: a publisher may attach a reply
//!    handler to an event; any subscriber that receives the event gets a
//!    [`ReplySender`] capability, and invoking it routes an ack envelope back
//!    to the publisher, which resolves the pending handler exactly once.
//!
//! ## Architecture
//!
//! ```text
//! Bus ──creates──► Channel ("prefix + name")
//!  │                  │ publish / publish_with_reply ──► outgoing queue ──► PublishConnection
//!  │                  │ dispatch task ◄── shared stream ◄── SubscribeConnection
//!  │                  └── listeners (per event name) + ReplySender
//!  ├── CallbackRegistry (correlation id → pending reply handler)
//!  └── error stream (decode / publish / subscription / misuse / connection)
//! ```
//!
//! The transport itself is an external collaborator behind the
//! [`transport`] traits; [`transport::MemoryTransport`] is a process-local
//! implementation suitable for tests and single-process wiring.
//!
//! ## Delivery contract
//!
//! Delivery is best-effort: no retries, no ordering across channels, no
//! persistence. Failures never raise from `publish`, `create_channel`, or
//! `destroy`; they surface asynchronously on the per-channel and per-bus
//! error streams. A consumer that ignores those streams observes silent
//! message loss, by design.
//!
//! ## Example
//!
//! ```rust,no_run
//! use chanbus::{Bus, BusConfig};
//! use chanbus::transport::MemoryTransport;
//! use serde_json::json;
//!
//! # async fn example() {
//! let transport = MemoryTransport::new(1024);
//! let (publisher, subscriber) = transport.connect();
//! let bus = Bus::new(publisher, subscriber, BusConfig::with_prefix("app."));
//!
//! let channel = bus.create_channel("greetings").await;
//! channel.on_message("greet", |args, reply| {
//!     println!("greeted with {args:?}");
//!     reply.send(vec![json!("hello back")]);
//! });
//!
//! channel.publish_with_reply("greet", vec![json!("hi")], |reply_args| {
//!     println!("reply: {reply_args:?}");
//! });
//! # }
//! ```

pub mod bus;
pub mod channel;
pub mod config;
pub mod envelope;
pub mod error;
pub mod registry;
pub mod transport;

// Re-exports
pub use bus::Bus;
pub use channel::{Channel, ListenerId, ReplySender};
pub use config::BusConfig;
pub use envelope::{CodecError, Envelope, EnvelopeKind};
pub use error::BusError;
pub use registry::{CallbackRegistry, CorrelationId};
