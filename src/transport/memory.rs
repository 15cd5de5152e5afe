//! Process-local broadcast transport.
//!
//! A [`MemoryTransport`] is a hub: every connection pair created from the
//! same hub shares one broadcast stream, so a message published through any
//! publisher reaches every subscriber connection with a live subscription on
//! that channel name. Publishing with no subscribers is a silent no-op,
//! matching the best-effort delivery contract.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{PublishConnection, SubscribeConnection, TransportError, TransportMessage};

/// An in-process message hub.
pub struct MemoryTransport {
    messages: broadcast::Sender<TransportMessage>,
    capacity: usize,
}

impl MemoryTransport {
    /// Creates a hub whose streams buffer up to `capacity` messages.
    pub fn new(capacity: usize) -> Self {
        let (messages, _) = broadcast::channel(capacity);
        Self { messages, capacity }
    }

    /// Opens one publish connection and one subscribe connection on the hub.
    ///
    /// Must be called within a tokio runtime: the subscribe connection runs a
    /// relay task that filters the hub stream down to subscribed names.
    pub fn connect(&self) -> (Arc<MemoryPublisher>, Arc<MemorySubscriber>) {
        let (errors, _) = broadcast::channel(self.capacity);

        let publisher = Arc::new(MemoryPublisher {
            messages: self.messages.clone(),
            errors: errors.clone(),
        });

        let subscriptions: Arc<DashMap<String, usize>> = Arc::new(DashMap::new());
        let (delivery, _) = broadcast::channel(self.capacity);
        let relay = tokio::spawn(relay_loop(
            self.messages.subscribe(),
            Arc::clone(&subscriptions),
            delivery.clone(),
        ));

        let subscriber = Arc::new(MemorySubscriber {
            subscriptions,
            delivery,
            errors,
            relay,
        });

        (publisher, subscriber)
    }
}

/// Forwards hub messages whose channel has a live subscription.
async fn relay_loop(
    mut hub: broadcast::Receiver<TransportMessage>,
    subscriptions: Arc<DashMap<String, usize>>,
    delivery: broadcast::Sender<TransportMessage>,
) {
    loop {
        match hub.recv().await {
            Ok(message) => {
                if subscriptions.contains_key(&message.channel) {
                    let _ = delivery.send(message);
                }
            }
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Publishing half of a [`MemoryTransport`] connection pair.
pub struct MemoryPublisher {
    messages: broadcast::Sender<TransportMessage>,
    errors: broadcast::Sender<TransportError>,
}

#[async_trait]
impl PublishConnection for MemoryPublisher {
    async fn publish(&self, channel: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        // No receiver on the hub means no subscribers anywhere; dropping the
        // message is correct for broadcast delivery.
        let _ = self.messages.send(TransportMessage {
            channel: channel.to_string(),
            payload,
        });
        Ok(())
    }

    fn errors(&self) -> broadcast::Receiver<TransportError> {
        self.errors.subscribe()
    }
}

/// Subscribing half of a [`MemoryTransport`] connection pair.
///
/// Tracks a subscription count per channel name, so two logical subscriptions
/// on the same name keep delivery alive until both unsubscribe.
pub struct MemorySubscriber {
    subscriptions: Arc<DashMap<String, usize>>,
    delivery: broadcast::Sender<TransportMessage>,
    errors: broadcast::Sender<TransportError>,
    relay: JoinHandle<()>,
}

#[async_trait]
impl SubscribeConnection for MemorySubscriber {
    async fn subscribe(&self, channel: &str) -> Result<(), TransportError> {
        *self.subscriptions.entry(channel.to_string()).or_insert(0) += 1;
        debug!(channel, "subscribed");
        Ok(())
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), TransportError> {
        let last = match self.subscriptions.get_mut(channel) {
            Some(mut count) => {
                if *count <= 1 {
                    true
                } else {
                    *count -= 1;
                    false
                }
            }
            None => false,
        };
        if last {
            self.subscriptions.remove(channel);
        }
        debug!(channel, "unsubscribed");
        Ok(())
    }

    fn messages(&self) -> broadcast::Receiver<TransportMessage> {
        self.delivery.subscribe()
    }

    fn errors(&self) -> broadcast::Receiver<TransportError> {
        self.errors.subscribe()
    }
}

impl Drop for MemorySubscriber {
    fn drop(&mut self) {
        self.relay.abort();
    }
}
