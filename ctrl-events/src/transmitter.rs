//! Event transmitters and enqueuers

use crate::broker::{Broker, BrokerEndpoint, Connector};
use crate::config::TransmitterConfig;
use crate::error::Result;
use crate::event::Event;
use crate::message::Message;
use crate::names;
use crate::topic::{Destination, DestinationKind};
use std::sync::Arc;
use tracing::{debug, info};

/// Publishes events to a topic (or a comma-joined list of topics) or,
/// as an enqueuer, to a work queue
pub struct EventTransmitter {
    broker: Arc<dyn Broker>,
    endpoint: BrokerEndpoint,
    destination: Destination,
    targets: Vec<String>,
    kind: DestinationKind,
}

impl EventTransmitter {
    /// Connect a topic transmitter
    pub async fn new(
        connector: &dyn Connector,
        endpoint: &BrokerEndpoint,
        destination: &str,
    ) -> Result<Self> {
        Self::connect(connector, endpoint, destination, DestinationKind::Topic).await
    }

    /// Connect a queue enqueuer
    pub async fn enqueuer(
        connector: &dyn Connector,
        endpoint: &BrokerEndpoint,
        queue: &str,
    ) -> Result<Self> {
        Self::connect(connector, endpoint, queue, DestinationKind::Queue).await
    }

    /// Validate `config`, then connect a transmitter of the given kind
    pub async fn from_config(
        connector: &dyn Connector,
        config: &TransmitterConfig,
        kind: DestinationKind,
    ) -> Result<Self> {
        config.validate()?;
        let endpoint = config.broker.endpoint()?;
        Self::connect(connector, &endpoint, &config.topic_name, kind).await
    }

    pub(crate) async fn connect(
        connector: &dyn Connector,
        endpoint: &BrokerEndpoint,
        destination: &str,
        kind: DestinationKind,
    ) -> Result<Self> {
        let destination = Destination::parse(destination)?;
        let targets = destination.publish_targets()?;
        let broker = connector.connect(endpoint).await?;

        info!(
            "Created {:?} transmitter for {} on {}",
            kind, destination, endpoint
        );
        Ok(Self {
            broker,
            endpoint: endpoint.clone(),
            destination,
            targets,
            kind,
        })
    }

    /// Publish a copy of `event` to every target destination.
    ///
    /// Each copy gets TOPIC set to its concrete destination and PUBTIME
    /// stamped last; the caller's event is left untouched.
    pub async fn publish(&self, event: &Event) -> Result<()> {
        let mut payloads = Vec::with_capacity(self.targets.len());
        for target in &self.targets {
            let mut copy = event.clone();
            copy.stamp_publication(target);
            let mut message = Message::from_event(&copy, target, self.kind);
            if self.kind == DestinationKind::Queue {
                message.headers.set(names::QUEUE, target.as_str());
            }
            payloads.push((target, message.serialize()?));
        }

        for (target, payload) in payloads {
            self.broker.publish(target, self.kind, payload).await?;
            debug!("Published {} event to {}", event.event_type(), target);
        }
        Ok(())
    }

    /// The destination string this transmitter was created for
    pub fn destination(&self) -> String {
        self.destination.to_string()
    }

    /// Concrete destinations each publish reaches
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    pub fn kind(&self) -> DestinationKind {
        self.kind
    }

    pub fn endpoint(&self) -> &BrokerEndpoint {
        &self.endpoint
    }
}

impl std::fmt::Debug for EventTransmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventTransmitter")
            .field("endpoint", &self.endpoint)
            .field("destination", &self.destination)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}
