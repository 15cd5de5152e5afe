//! # Channel
//!
//! A [`Channel`] is a named logical stream multiplexed over the transport
//! connections shared by every channel of one bus. It owns no transport
//! resources itself: publishing enqueues onto the bus's outgoing write queue,
//! and receiving runs as one dispatch task that examines every message on the
//! shared subscription stream and discards those not addressed to this
//! channel's `full_name`.
//!
//! ## Publishing
//!
//! [`Channel::publish`] is fire-and-forget. [`Channel::publish_with_reply`]
//! additionally registers a reply handler in the bus's callback registry and
//! attaches the allocated correlation ID to the envelope; the subscriber that
//! answers through its [`ReplySender`] causes that handler to be invoked
//! exactly once. Neither operation blocks on the transport and neither
//! reports failure through its return value — send failures surface on the
//! channel's error stream.
//!
//! ## Dispatch
//!
//! Incoming event envelopes are dispatched to the listeners registered for
//! the event name in `data[0]`, in registration order, with the remaining
//! values as arguments. Incoming ack envelopes resolve the pending handler
//! for their correlation ID. A malformed or misrouted message never stops
//! the dispatch of subsequent messages.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::envelope::{Envelope, EnvelopeKind};
use crate::error::BusError;
use crate::registry::{CallbackRegistry, CorrelationId};
use crate::transport::{SubscribeConnection, TransportMessage};

/// Handle for removing a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(u64);

type EventListener = Arc<dyn Fn(&[Value], ReplySender) + Send + Sync>;

/// Listeners keyed by event name, invoked in registration order.
#[derive(Default)]
struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: DashMap<String, Vec<(ListenerId, EventListener)>>,
}

impl ListenerRegistry {
    fn add(&self, event: &str, listener: EventListener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners
            .entry(event.to_string())
            .or_default()
            .push((id, listener));
        id
    }

    fn remove(&self, event: &str, id: ListenerId) -> bool {
        match self.listeners.get_mut(event) {
            Some(mut entries) => {
                let before = entries.len();
                entries.retain(|(entry_id, _)| *entry_id != id);
                before != entries.len()
            }
            None => false,
        }
    }

    /// Clones the listener list out of the map so user callbacks run without
    /// holding the shard lock (a listener may register further listeners).
    fn snapshot(&self, event: &str) -> Vec<EventListener> {
        self.listeners
            .get(event)
            .map(|entries| entries.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default()
    }
}

/// The reply-invocation capability handed to every event listener.
///
/// Calling [`send`](Self::send) encodes an ack envelope referencing the
/// incoming event's correlation ID and publishes it on the same channel name.
/// When the incoming event carried no correlation ID, the publisher is not
/// waiting for a reply; calling `send` then reports a [`BusError::Misuse`]
/// notification and publishes nothing.
#[derive(Clone)]
pub struct ReplySender {
    pub(crate) channel: String,
    pub(crate) id: Option<CorrelationId>,
    pub(crate) outgoing: mpsc::UnboundedSender<TransportMessage>,
    pub(crate) errors: broadcast::Sender<BusError>,
}

impl ReplySender {
    /// The correlation ID of the event being answered, if it expects a reply.
    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.id
    }

    /// Whether the publisher of the incoming event is waiting for a reply.
    pub fn expects_reply(&self) -> bool {
        self.id.is_some()
    }

    /// Publishes an ack carrying `args` back to the original publisher.
    ///
    /// Non-blocking; send failures surface on the channel's error stream.
    pub fn send(&self, args: Vec<Value>) {
        let id = match self.id {
            Some(id) => id,
            None => {
                let _ = self.errors.send(BusError::Misuse {
                    channel: self.channel.clone(),
                });
                return;
            }
        };
        enqueue(&self.channel, &Envelope::ack(id, args), &self.outgoing, &self.errors);
    }
}

impl fmt::Debug for ReplySender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplySender")
            .field("channel", &self.channel)
            .field("id", &self.id)
            .finish()
    }
}

/// A named logical stream over the bus's shared transport connections.
///
/// Created by [`Bus::create_channel`](crate::bus::Bus::create_channel).
pub struct Channel {
    full_name: String,
    listeners: Arc<ListenerRegistry>,
    registry: Arc<CallbackRegistry>,
    outgoing: mpsc::UnboundedSender<TransportMessage>,
    subscriber: Arc<dyn SubscribeConnection>,
    errors: broadcast::Sender<BusError>,
    dispatch: JoinHandle<()>,
}

impl Channel {
    pub(crate) fn new(
        full_name: String,
        registry: Arc<CallbackRegistry>,
        outgoing: mpsc::UnboundedSender<TransportMessage>,
        subscriber: Arc<dyn SubscribeConnection>,
        errors: broadcast::Sender<BusError>,
    ) -> Self {
        let listeners = Arc::new(ListenerRegistry::default());
        let dispatch = tokio::spawn(dispatch_loop(
            full_name.clone(),
            subscriber.messages(),
            Arc::clone(&listeners),
            Arc::clone(&registry),
            outgoing.clone(),
            errors.clone(),
        ));
        Self {
            full_name,
            listeners,
            registry,
            outgoing,
            subscriber,
            errors,
            dispatch,
        }
    }

    /// The prefixed name this channel publishes and receives on.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Publishes `event` with `args`, expecting no reply.
    ///
    /// Fire-and-forget: the call returns once the envelope is enqueued for
    /// the transport. Send failures surface on [`errors`](Self::errors).
    pub fn publish(&self, event: &str, args: Vec<Value>) {
        let envelope = Envelope::event(event_data(event, args));
        enqueue(&self.full_name, &envelope, &self.outgoing, &self.errors);
    }

    /// Publishes `event` with `args` and registers `handler` for the reply.
    ///
    /// Returns the correlation ID attached to the envelope, so the caller may
    /// later cancel with [`remove_callback`](Self::remove_callback). The
    /// handler is invoked at most once, with the arguments of the first ack
    /// that answers this ID. The return value does not indicate delivery
    /// success, only that a correlation ID was assigned.
    pub fn publish_with_reply<F>(&self, event: &str, args: Vec<Value>, handler: F) -> CorrelationId
    where
        F: FnOnce(Vec<Value>) + Send + 'static,
    {
        let id = self.registry.register(handler);
        let envelope = Envelope::event_with_reply(event_data(event, args), id);
        enqueue(&self.full_name, &envelope, &self.outgoing, &self.errors);
        id
    }

    /// Stops waiting for the reply registered under `id`; no-op if absent.
    ///
    /// Does not cancel the already-sent publish. A late ack for the ID is
    /// silently dropped.
    pub fn remove_callback(&self, id: CorrelationId) {
        self.registry.remove(id);
    }

    /// Registers a listener for event envelopes whose name equals `event`.
    ///
    /// The listener receives the event arguments and a [`ReplySender`].
    /// Listeners for one name run in registration order.
    pub fn on_message<F>(&self, event: &str, listener: F) -> ListenerId
    where
        F: Fn(&[Value], ReplySender) + Send + Sync + 'static,
    {
        self.listeners.add(event, Arc::new(listener))
    }

    /// Unregisters a listener. Returns whether it was present.
    pub fn remove_listener(&self, event: &str, id: ListenerId) -> bool {
        self.listeners.remove(event, id)
    }

    /// Error notifications detected by this channel.
    pub fn errors(&self) -> broadcast::Receiver<BusError> {
        self.errors.subscribe()
    }

    /// Stops this channel: unsubscribes its name from the shared transport
    /// and ends dispatch for this instance.
    ///
    /// Other channel instances subscribed to the same name are unaffected.
    /// Unsubscribe failures surface on the error stream, never here.
    pub async fn destroy(&self) {
        debug!(channel = %self.full_name, "destroying channel");
        self.dispatch.abort();
        if let Err(err) = self.subscriber.unsubscribe(&self.full_name).await {
            let _ = self.errors.send(BusError::Subscription {
                channel: self.full_name.clone(),
                message: err.to_string(),
            });
        }
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        // A dropped channel can no longer dispatch; the transport
        // subscription itself is only released by destroy().
        self.dispatch.abort();
    }
}

impl fmt::Debug for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("full_name", &self.full_name)
            .finish()
    }
}

fn event_data(event: &str, args: Vec<Value>) -> Vec<Value> {
    let mut data = Vec::with_capacity(args.len() + 1);
    data.push(Value::String(event.to_string()));
    data.extend(args);
    data
}

/// Encodes and enqueues one envelope for the bus's writer task.
fn enqueue(
    channel: &str,
    envelope: &Envelope,
    outgoing: &mpsc::UnboundedSender<TransportMessage>,
    errors: &broadcast::Sender<BusError>,
) {
    let payload = match envelope.encode() {
        Ok(payload) => payload,
        Err(err) => {
            let _ = errors.send(BusError::Publish {
                channel: channel.to_string(),
                message: err.to_string(),
            });
            return;
        }
    };
    debug!(channel, kind = ?envelope.kind, id = ?envelope.id, "publishing envelope");
    let message = TransportMessage {
        channel: channel.to_string(),
        payload,
    };
    if outgoing.send(message).is_err() {
        let _ = errors.send(BusError::Publish {
            channel: channel.to_string(),
            message: "outgoing queue closed".to_string(),
        });
    }
}

/// One channel's dispatch task over the shared subscription stream.
async fn dispatch_loop(
    full_name: String,
    mut stream: broadcast::Receiver<TransportMessage>,
    listeners: Arc<ListenerRegistry>,
    registry: Arc<CallbackRegistry>,
    outgoing: mpsc::UnboundedSender<TransportMessage>,
    errors: broadcast::Sender<BusError>,
) {
    loop {
        let message = match stream.recv().await {
            Ok(message) => message,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(channel = %full_name, skipped, "dispatch fell behind, skipping messages");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };
        // Multiplexing filter: the stream carries every subscribed name.
        if message.channel != full_name {
            continue;
        }
        let envelope = match Envelope::decode(&message.payload) {
            Ok(envelope) => envelope,
            Err(err) => {
                let _ = errors.send(BusError::Decode {
                    channel: full_name.clone(),
                    message: err.to_string(),
                });
                continue;
            }
        };
        trace!(channel = %full_name, kind = ?envelope.kind, id = ?envelope.id, "received envelope");
        match envelope.kind {
            EnvelopeKind::Event => {
                let mut data = envelope.data.into_iter();
                let event = match data.next() {
                    Some(Value::String(name)) => name,
                    _ => {
                        let _ = errors.send(BusError::Decode {
                            channel: full_name.clone(),
                            message: "event envelope carries no event name".to_string(),
                        });
                        continue;
                    }
                };
                let args: Vec<Value> = data.collect();
                let reply = ReplySender {
                    channel: full_name.clone(),
                    id: envelope.id,
                    outgoing: outgoing.clone(),
                    errors: errors.clone(),
                };
                for listener in listeners.snapshot(&event) {
                    listener(&args, reply.clone());
                }
            }
            EnvelopeKind::Ack => {
                // Envelopes without an ID never touch the registry.
                if let Some(id) = envelope.id {
                    registry.resolve(id, envelope.data);
                }
            }
        }
    }
}
