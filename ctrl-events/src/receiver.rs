//! Event receivers and dequeuers

use crate::broker::{Broker, BrokerEndpoint, Connector, Consumer};
use crate::config::ReceiverConfig;
use crate::error::{EventError, Result};
use crate::event::Event;
use crate::message::Message;
use crate::topic::{Destination, DestinationKind};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Receives events from a topic subscription or, as a dequeuer, from a
/// work queue
pub struct EventReceiver {
    // Held so the connection outlives the consumer
    _broker: Arc<dyn Broker>,
    consumer: Mutex<Box<dyn Consumer>>,
    endpoint: BrokerEndpoint,
    destination: String,
    selector: Option<String>,
    kind: DestinationKind,
}

impl EventReceiver {
    /// Subscribe to a topic, optionally filtered by `selector`
    pub async fn new(
        connector: &dyn Connector,
        endpoint: &BrokerEndpoint,
        destination: &str,
        selector: Option<&str>,
    ) -> Result<Self> {
        Self::connect(
            connector,
            endpoint,
            destination,
            selector,
            DestinationKind::Topic,
        )
        .await
    }

    /// Attach to a work queue, optionally filtered by `selector`
    pub async fn dequeuer(
        connector: &dyn Connector,
        endpoint: &BrokerEndpoint,
        queue: &str,
        selector: Option<&str>,
    ) -> Result<Self> {
        Self::connect(connector, endpoint, queue, selector, DestinationKind::Queue).await
    }

    /// Validate `config`, then connect a receiver of the given kind
    pub async fn from_config(
        connector: &dyn Connector,
        config: &ReceiverConfig,
        kind: DestinationKind,
    ) -> Result<Self> {
        config.validate()?;
        let endpoint = config.broker.endpoint()?;
        Self::connect(
            connector,
            &endpoint,
            &config.topic_name,
            config.selector.as_deref(),
            kind,
        )
        .await
    }

    pub(crate) async fn connect(
        connector: &dyn Connector,
        endpoint: &BrokerEndpoint,
        destination: &str,
        selector: Option<&str>,
        kind: DestinationKind,
    ) -> Result<Self> {
        let parsed = Destination::parse(destination)?;
        if kind == DestinationKind::Queue && parsed.is_wildcard() {
            return Err(EventError::configuration(format!(
                "queue name '{parsed}' cannot be a wildcard"
            )));
        }
        let destination = parsed.subscription_key();
        let selector = selector
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_owned);

        let broker = connector.connect(endpoint).await?;
        let consumer = broker
            .subscribe(&destination, kind, selector.as_deref())
            .await?;

        info!(
            "Created {:?} receiver for {} on {} (selector: {})",
            kind,
            destination,
            endpoint,
            selector.as_deref().unwrap_or("none")
        );
        Ok(Self {
            _broker: broker,
            consumer: Mutex::new(consumer),
            endpoint: endpoint.clone(),
            destination,
            selector,
            kind,
        })
    }

    /// Wait for the next event.
    ///
    /// `None` waits indefinitely; `Some(Duration::ZERO)` polls. Returns
    /// `Ok(None)` when the timeout elapses first.
    pub async fn receive(&self, timeout: Option<Duration>) -> Result<Option<Event>> {
        let payload = {
            let mut consumer = self.consumer.lock().await;
            consumer.receive(timeout).await?
        };
        let Some(payload) = payload else {
            debug!("Receive on {} timed out", self.destination);
            return Ok(None);
        };
        let event = Message::deserialize(&payload)?.into_event()?;
        debug!("Received {} event on {}", event.event_type(), self.destination);
        Ok(Some(event))
    }

    /// The destination this receiver is bound to
    pub fn destination(&self) -> &str {
        &self.destination
    }

    /// The selector in effect, `None` when every message is accepted
    pub fn selector(&self) -> Option<&str> {
        self.selector.as_deref()
    }

    pub fn kind(&self) -> DestinationKind {
        self.kind
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }
}

impl std::fmt::Debug for EventReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventReceiver")
            .field("endpoint", &self.endpoint)
            .field("destination", &self.destination)
            .field("selector", &self.selector)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::broker::EmbeddedConnector;
    use crate::config::BrokerConfig;
    use crate::property::PropertySet;
    use crate::transmitter::EventTransmitter;

    async fn bound() -> (EmbeddedConnector, BrokerEndpoint) {
        let connector = EmbeddedConnector::new();
        let endpoint = BrokerEndpoint::tcp_default("localhost");
        connector.bind(endpoint.clone()).await;
        (connector, endpoint)
    }

    #[tokio::test]
    async fn test_empty_selector_means_none() {
        let (connector, endpoint) = bound().await;
        let receiver = EventReceiver::new(&connector, &endpoint, " t ", Some("  "))
            .await
            .expect("receiver");
        assert_eq!(receiver.selector(), None);
        assert_eq!(receiver.destination(), "t");
    }

    #[tokio::test]
    async fn test_receive_timeout_returns_none() {
        let (connector, endpoint) = bound().await;
        let receiver = EventReceiver::new(&connector, &endpoint, "t", None)
            .await
            .expect("receiver");
        let got = receiver
            .receive(Some(Duration::ZERO))
            .await
            .expect("receive");
        assert!(got.is_none());
    }

    #[tokio::test]
    async fn test_queue_wildcard_rejected() {
        let (connector, endpoint) = bound().await;
        let result = EventReceiver::dequeuer(&connector, &endpoint, "jobs.*", None).await;
        assert!(matches!(result, Err(EventError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_from_config_round_trip() {
        let (connector, _) = bound().await;
        let config = ReceiverConfig::new("t", BrokerConfig::tcp("LOCALHOST", 61616))
            .with_selector("FOO = 1");
        let receiver = EventReceiver::from_config(&connector, &config, DestinationKind::Topic)
            .await
            .expect("receiver");
        assert_eq!(receiver.selector(), Some("FOO = 1"));

        let transmitter = EventTransmitter::from_config(
            &connector,
            &crate::config::TransmitterConfig::new("t", config.broker.clone()),
            DestinationKind::Topic,
        )
        .await
        .expect("transmitter");

        let mut filter = PropertySet::new();
        filter.set("FOO", 1);
        let event = Event::with_filter(PropertySet::new(), filter).expect("event");
        transmitter.publish(&event).await.expect("publish");

        let got = receiver
            .receive(Some(Duration::from_millis(100)))
            .await
            .expect("receive")
            .expect("event");
        assert_eq!(got.topic(), "t");
        assert_eq!(got.properties().get_int("FOO").expect("foo"), 1);
    }
}
