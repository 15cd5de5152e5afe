//! # Bus
//!
//! The bus owns the shared transport connection pair — one publish
//! connection, one subscribe connection — plus the channel namespace prefix,
//! the per-bus callback registry, and the aggregated error stream. It is the
//! factory for [`Channel`]s: every channel created from one bus multiplexes
//! over the same two connections.
//!
//! Outgoing traffic from all channels funnels through one unbounded write
//! queue drained by a single writer task, so `publish` never blocks the
//! caller on transport I/O; a failed send is reported on the error stream.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, instrument, trace};

use crate::channel::Channel;
use crate::config::BusConfig;
use crate::error::BusError;
use crate::registry::CallbackRegistry;
use crate::transport::{PublishConnection, SubscribeConnection, TransportMessage};

/// Owner of the shared transport connections and channel namespace.
pub struct Bus {
    prefix: String,
    buffer_size: usize,
    registry: Arc<CallbackRegistry>,
    subscriber: Arc<dyn SubscribeConnection>,
    outgoing: mpsc::UnboundedSender<TransportMessage>,
    errors: broadcast::Sender<BusError>,
    /// Keeps the error stream open while no consumer is subscribed.
    _internal_errors: broadcast::Receiver<BusError>,
}

impl Bus {
    /// Builds a bus over an already-connected transport pair.
    ///
    /// Spawns the writer task and the forwarders that turn connection-level
    /// transport errors into bus-level error notifications, so this must be
    /// called within a tokio runtime.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// use chanbus::{Bus, BusConfig};
    /// use chanbus::transport::MemoryTransport;
    ///
    /// # async fn example() {
    /// let transport = MemoryTransport::new(1024);
    /// let (publisher, subscriber) = transport.connect();
    /// let bus = Bus::new(publisher, subscriber, BusConfig::with_prefix("app."));
    /// let channel = bus.create_channel("jobs").await;
    /// # }
    /// ```
    pub fn new(
        publisher: Arc<dyn PublishConnection>,
        subscriber: Arc<dyn SubscribeConnection>,
        config: BusConfig,
    ) -> Self {
        let (errors, internal_errors) = broadcast::channel(config.buffer_size);
        let (outgoing, outgoing_rx) = mpsc::unbounded_channel();

        forward_errors(publisher.errors(), errors.clone());
        forward_errors(subscriber.errors(), errors.clone());
        tokio::spawn(write_loop(outgoing_rx, publisher, errors.clone()));

        Self {
            prefix: config.prefix,
            buffer_size: config.buffer_size,
            registry: Arc::new(CallbackRegistry::new()),
            subscriber,
            outgoing,
            errors,
            _internal_errors: internal_errors,
        }
    }

    /// Creates a channel named `prefix + name` and subscribes it on the
    /// shared subscribe connection.
    ///
    /// The channel is returned regardless of the subscription outcome; a
    /// subscription acknowledgment failure surfaces on the error streams.
    /// Names are not checked for collisions — two channels with the same
    /// derived name receive each other's traffic.
    #[instrument(skip(self))]
    pub async fn create_channel(&self, name: &str) -> Channel {
        let full_name = format!("{}{}", self.prefix, name);
        debug!(channel = %full_name, "creating channel");

        let (channel_errors, _) = broadcast::channel(self.buffer_size);
        forward_errors(channel_errors.subscribe(), self.errors.clone());

        let channel = Channel::new(
            full_name.clone(),
            Arc::clone(&self.registry),
            self.outgoing.clone(),
            Arc::clone(&self.subscriber),
            channel_errors.clone(),
        );

        if let Err(err) = self.subscriber.subscribe(&full_name).await {
            let _ = channel_errors.send(BusError::Subscription {
                channel: full_name,
                message: err.to_string(),
            });
        }

        channel
    }

    /// Error notifications aggregated from every channel and from the
    /// transport connections.
    pub fn errors(&self) -> broadcast::Receiver<BusError> {
        self.errors.subscribe()
    }

    /// The namespace prefix applied to every channel this bus creates.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Number of published events still awaiting an ack on this bus.
    pub fn pending_replies(&self) -> usize {
        self.registry.pending()
    }
}

impl std::fmt::Debug for Bus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bus")
            .field("prefix", &self.prefix)
            .field("pending_replies", &self.registry.pending())
            .finish()
    }
}

/// Drains the outgoing queue into the publish connection.
async fn write_loop(
    mut outgoing: mpsc::UnboundedReceiver<TransportMessage>,
    publisher: Arc<dyn PublishConnection>,
    errors: broadcast::Sender<BusError>,
) {
    while let Some(TransportMessage { channel, payload }) = outgoing.recv().await {
        trace!(%channel, bytes = payload.len(), "writing to transport");
        if let Err(err) = publisher.publish(&channel, payload).await {
            let _ = errors.send(BusError::Publish {
                channel,
                message: err.to_string(),
            });
        }
    }
}

/// Forwards one error stream into the bus-level stream until it closes.
fn forward_errors<T>(mut from: broadcast::Receiver<T>, to: broadcast::Sender<BusError>)
where
    T: Into<BusError> + Clone + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            match from.recv().await {
                Ok(err) => {
                    let _ = to.send(err.into());
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, TransportError};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::time::{timeout, Duration};

    struct FailingPublisher {
        errors: broadcast::Sender<TransportError>,
    }

    impl FailingPublisher {
        fn new() -> Self {
            let (errors, _) = broadcast::channel(4);
            Self { errors }
        }
    }

    #[async_trait]
    impl PublishConnection for FailingPublisher {
        async fn publish(&self, channel: &str, _payload: Vec<u8>) -> Result<(), TransportError> {
            Err(TransportError::Publish {
                channel: channel.to_string(),
                message: "wire down".to_string(),
            })
        }

        fn errors(&self) -> broadcast::Receiver<TransportError> {
            self.errors.subscribe()
        }
    }

    struct RefusingSubscriber {
        delivery: broadcast::Sender<TransportMessage>,
        errors: broadcast::Sender<TransportError>,
    }

    impl RefusingSubscriber {
        fn new() -> Self {
            let (delivery, _) = broadcast::channel(4);
            let (errors, _) = broadcast::channel(4);
            Self { delivery, errors }
        }
    }

    #[async_trait]
    impl SubscribeConnection for RefusingSubscriber {
        async fn subscribe(&self, channel: &str) -> Result<(), TransportError> {
            Err(TransportError::Subscribe {
                channel: channel.to_string(),
                message: "refused".to_string(),
            })
        }

        async fn unsubscribe(&self, _channel: &str) -> Result<(), TransportError> {
            Ok(())
        }

        fn messages(&self) -> broadcast::Receiver<TransportMessage> {
            self.delivery.subscribe()
        }

        fn errors(&self) -> broadcast::Receiver<TransportError> {
            self.errors.subscribe()
        }
    }

    #[tokio::test]
    async fn test_channel_name_carries_the_prefix() {
        let transport = MemoryTransport::new(16);
        let (publisher, subscriber) = transport.connect();
        let bus = Bus::new(publisher, subscriber, BusConfig::with_prefix("app."));

        let channel = bus.create_channel("jobs").await;
        assert_eq!(channel.full_name(), "app.jobs");
    }

    #[tokio::test]
    async fn test_publish_failure_surfaces_on_the_error_stream() {
        let transport = MemoryTransport::new(16);
        let (_, subscriber) = transport.connect();
        let bus = Bus::new(
            Arc::new(FailingPublisher::new()),
            subscriber,
            BusConfig::default(),
        );
        let mut errors = bus.errors();

        let channel = bus.create_channel("jobs").await;
        channel.publish("ping", vec![json!(1)]);

        let err = timeout(Duration::from_secs(1), errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            err,
            BusError::Publish {
                channel: "jobs".to_string(),
                message: TransportError::Publish {
                    channel: "jobs".to_string(),
                    message: "wire down".to_string(),
                }
                .to_string(),
            }
        );
    }

    #[tokio::test]
    async fn test_subscription_failure_surfaces_as_a_bus_error() {
        let transport = MemoryTransport::new(16);
        let (publisher, _) = transport.connect();
        let bus = Bus::new(
            publisher,
            Arc::new(RefusingSubscriber::new()),
            BusConfig::default(),
        );
        let mut errors = bus.errors();

        // create_channel still returns a channel; the failure is async.
        let channel = bus.create_channel("jobs").await;
        assert_eq!(channel.full_name(), "jobs");

        let err = timeout(Duration::from_secs(1), errors.recv())
            .await
            .unwrap()
            .unwrap();
        match err {
            BusError::Subscription { channel, .. } => assert_eq!(channel, "jobs"),
            other => panic!("expected subscription error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transport_connection_errors_are_forwarded() {
        let transport = MemoryTransport::new(16);
        let (_, subscriber) = transport.connect();
        let failing = Arc::new(FailingPublisher::new());
        let transport_errors = failing.errors.clone();
        let bus = Bus::new(failing, subscriber, BusConfig::default());
        let mut errors = bus.errors();

        transport_errors
            .send(TransportError::Connection {
                message: "reset by peer".to_string(),
            })
            .unwrap();

        let err = timeout(Duration::from_secs(1), errors.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            err,
            BusError::Connection(TransportError::Connection {
                message: "reset by peer".to_string(),
            })
        );
    }
}
