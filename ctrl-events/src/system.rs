//! Registry of transmitters and receivers keyed by destination name
//!
//! An [`EventSystem`] is an ordinary value; share it behind an `Arc` where a
//! process-wide registry is wanted. Transmitters and enqueuers share one
//! table, receivers and dequeuers another. Creating a binding for a
//! destination that already has one returns the existing binding; a
//! receiver requested with a different selector is rejected.

use crate::broker::{BrokerEndpoint, Connector};
use crate::config::{ReceiverConfig, TransmitterConfig};
use crate::error::{EventError, Result};
use crate::event::{CommandEvent, Event, StatusEvent};
use crate::names;
use crate::receiver::EventReceiver;
use crate::topic::{Destination, DestinationKind};
use crate::transmitter::EventTransmitter;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// Destination-keyed registry of event bindings
pub struct EventSystem {
    connector: Arc<dyn Connector>,
    /// Endpoint used when publishing to a destination with no transmitter
    default_endpoint: Option<BrokerEndpoint>,
    transmitters: RwLock<HashMap<String, Arc<EventTransmitter>>>,
    receivers: RwLock<HashMap<String, Arc<EventReceiver>>>,
}

fn registry_key(destination: &str) -> Result<String> {
    Ok(Destination::parse(destination)?.subscription_key())
}

fn tcp_endpoint(host: &str, port: Option<u16>) -> Result<BrokerEndpoint> {
    let host = host.trim();
    if host.is_empty() {
        return Err(EventError::configuration("broker host is empty"));
    }
    Ok(BrokerEndpoint::tcp(
        host,
        port.unwrap_or(names::DEFAULT_BROKER_PORT),
    ))
}

impl EventSystem {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self {
            connector,
            default_endpoint: None,
            transmitters: RwLock::new(HashMap::new()),
            receivers: RwLock::new(HashMap::new()),
        }
    }

    /// Publish to unregistered destinations through transmitters created on
    /// `endpoint`
    pub fn with_default_endpoint(mut self, endpoint: BrokerEndpoint) -> Self {
        self.default_endpoint = Some(endpoint);
        self
    }

    /// Create (or return the existing) topic transmitter for `destination`.
    ///
    /// `port` defaults to 61616.
    pub async fn create_transmitter(
        &self,
        host: &str,
        destination: &str,
        port: Option<u16>,
    ) -> Result<Arc<EventTransmitter>> {
        let endpoint = tcp_endpoint(host, port)?;
        self.bind_transmitter(&endpoint, destination, DestinationKind::Topic)
            .await
    }

    /// Create (or return the existing) enqueuer for `queue`
    pub async fn create_enqueuer(
        &self,
        host: &str,
        queue: &str,
        port: Option<u16>,
    ) -> Result<Arc<EventTransmitter>> {
        let endpoint = tcp_endpoint(host, port)?;
        self.bind_transmitter(&endpoint, queue, DestinationKind::Queue)
            .await
    }

    /// Create a transmitter from configuration
    pub async fn create_transmitter_from_config(
        &self,
        config: &TransmitterConfig,
        kind: DestinationKind,
    ) -> Result<Arc<EventTransmitter>> {
        config.validate()?;
        let endpoint = config.broker.endpoint()?;
        self.bind_transmitter(&endpoint, &config.topic_name, kind)
            .await
    }

    /// Create (or return the existing) receiver for `destination`.
    ///
    /// An empty selector is treated as no selector. Asking again with a
    /// different selector is a configuration error.
    pub async fn create_receiver(
        &self,
        host: &str,
        destination: &str,
        selector: Option<&str>,
        port: Option<u16>,
    ) -> Result<Arc<EventReceiver>> {
        let endpoint = tcp_endpoint(host, port)?;
        self.bind_receiver(&endpoint, destination, selector, DestinationKind::Topic)
            .await
    }

    /// Create (or return the existing) dequeuer for `queue`
    pub async fn create_dequeuer(
        &self,
        host: &str,
        queue: &str,
        selector: Option<&str>,
        port: Option<u16>,
    ) -> Result<Arc<EventReceiver>> {
        let endpoint = tcp_endpoint(host, port)?;
        self.bind_receiver(&endpoint, queue, selector, DestinationKind::Queue)
            .await
    }

    /// Create a receiver from configuration
    pub async fn create_receiver_from_config(
        &self,
        config: &ReceiverConfig,
        kind: DestinationKind,
    ) -> Result<Arc<EventReceiver>> {
        config.validate()?;
        let endpoint = config.broker.endpoint()?;
        self.bind_receiver(
            &endpoint,
            &config.topic_name,
            config.selector.as_deref(),
            kind,
        )
        .await
    }

    async fn bind_transmitter(
        &self,
        endpoint: &BrokerEndpoint,
        destination: &str,
        kind: DestinationKind,
    ) -> Result<Arc<EventTransmitter>> {
        let key = registry_key(destination)?;
        if let Some(existing) = self.transmitters.read().await.get(&key) {
            return Self::reuse(existing, &key, kind, existing.kind());
        }

        // Connect without holding the table lock; a concurrent creator wins
        let created =
            Arc::new(EventTransmitter::connect(&*self.connector, endpoint, &key, kind).await?);
        let mut transmitters = self.transmitters.write().await;
        if let Some(existing) = transmitters.get(&key) {
            return Self::reuse(existing, &key, kind, existing.kind());
        }
        transmitters.insert(key.clone(), Arc::clone(&created));
        info!("Registered {:?} transmitter for {}", kind, key);
        Ok(created)
    }

    async fn bind_receiver(
        &self,
        endpoint: &BrokerEndpoint,
        destination: &str,
        selector: Option<&str>,
        kind: DestinationKind,
    ) -> Result<Arc<EventReceiver>> {
        let key = registry_key(destination)?;
        if let Some(existing) = self.receivers.read().await.get(&key) {
            let existing = Self::reuse(existing, &key, kind, existing.kind())?;
            Self::ensure_same_selector(&existing, selector)?;
            return Ok(existing);
        }

        let created = Arc::new(
            EventReceiver::connect(&*self.connector, endpoint, &key, selector, kind).await?,
        );
        let mut receivers = self.receivers.write().await;
        if let Some(existing) = receivers.get(&key) {
            let existing = Self::reuse(existing, &key, kind, existing.kind())?;
            Self::ensure_same_selector(&existing, selector)?;
            return Ok(existing);
        }
        receivers.insert(key.clone(), Arc::clone(&created));
        info!("Registered {:?} receiver for {}", kind, key);
        Ok(created)
    }

    fn reuse<T>(
        existing: &Arc<T>,
        key: &str,
        requested: DestinationKind,
        bound: DestinationKind,
    ) -> Result<Arc<T>> {
        if requested != bound {
            return Err(EventError::configuration(format!(
                "destination '{key}' is already bound as {bound:?}, not {requested:?}"
            )));
        }
        debug!("Reusing existing binding for {}", key);
        Ok(Arc::clone(existing))
    }

    fn ensure_same_selector(existing: &EventReceiver, selector: Option<&str>) -> Result<()> {
        let requested = selector.map(str::trim).filter(|s| !s.is_empty());
        if existing.selector() != requested {
            return Err(EventError::configuration(format!(
                "receiver for '{}' already exists with selector {:?}, not {:?}",
                existing.destination(),
                existing.selector(),
                requested
            )));
        }
        Ok(())
    }

    /// Publish `event` through the transmitter registered for `destination`.
    ///
    /// With a default endpoint configured, a missing transmitter is created
    /// on first use; otherwise the destination must have been registered.
    pub async fn publish_event(&self, destination: &str, event: &Event) -> Result<()> {
        let key = registry_key(destination)?;
        let existing = self.transmitters.read().await.get(&key).cloned();
        let transmitter = match (existing, &self.default_endpoint) {
            (Some(transmitter), _) => transmitter,
            (None, Some(endpoint)) => {
                self.bind_transmitter(endpoint, &key, DestinationKind::Topic)
                    .await?
            }
            (None, None) => return Err(EventError::not_registered(key)),
        };
        transmitter.publish(event).await
    }

    /// Receive from the receiver registered for `destination`.
    ///
    /// `Ok(None)` means the timeout elapsed.
    pub async fn receive_event(
        &self,
        destination: &str,
        timeout: Option<Duration>,
    ) -> Result<Option<Event>> {
        let receiver = self.receiver(destination).await?;
        receiver.receive(timeout).await
    }

    /// Registered transmitter for `destination`
    pub async fn transmitter(&self, destination: &str) -> Result<Arc<EventTransmitter>> {
        let key = registry_key(destination)?;
        self.transmitters
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| EventError::not_registered(key))
    }

    /// Registered receiver for `destination`
    pub async fn receiver(&self, destination: &str) -> Result<Arc<EventReceiver>> {
        let key = registry_key(destination)?;
        self.receivers
            .read()
            .await
            .get(&key)
            .cloned()
            .ok_or_else(|| EventError::not_registered(key))
    }

    pub async fn has_transmitter(&self, destination: &str) -> bool {
        match registry_key(destination) {
            Ok(key) => self.transmitters.read().await.contains_key(&key),
            Err(_) => false,
        }
    }

    pub async fn has_receiver(&self, destination: &str) -> bool {
        match registry_key(destination) {
            Ok(key) => self.receivers.read().await.contains_key(&key),
            Err(_) => false,
        }
    }

    /// Drop the transmitter for `destination`; returns whether one existed
    pub async fn remove_transmitter(&self, destination: &str) -> bool {
        let Ok(key) = registry_key(destination) else {
            return false;
        };
        let removed = self.transmitters.write().await.remove(&key).is_some();
        if removed {
            info!("Removed transmitter for {}", key);
        }
        removed
    }

    /// Drop the receiver for `destination`; returns whether one existed
    pub async fn remove_receiver(&self, destination: &str) -> bool {
        let Ok(key) = registry_key(destination) else {
            return false;
        };
        let removed = self.receivers.write().await.remove(&key).is_some();
        if removed {
            info!("Removed receiver for {}", key);
        }
        removed
    }

    /// Checked narrowing to a status event
    pub fn cast_to_status_event(event: &Event) -> Result<StatusEvent<'_>> {
        event.as_status()
    }

    /// Checked narrowing to a command event
    pub fn cast_to_command_event(event: &Event) -> Result<CommandEvent<'_>> {
        event.as_command()
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::broker::EmbeddedConnector;
    use crate::location::LocationId;
    use crate::property::PropertySet;
    use tracing_test::traced_test;

    async fn system() -> EventSystem {
        let connector = EmbeddedConnector::new();
        connector
            .bind(BrokerEndpoint::tcp_default("localhost"))
            .await;
        EventSystem::new(Arc::new(connector))
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let system = system().await;
        let first = system
            .create_transmitter("localhost", "t", None)
            .await
            .expect("transmitter");
        let second = system
            .create_transmitter("LOCALHOST", " t ", Some(61616))
            .await
            .expect("transmitter");
        assert!(Arc::ptr_eq(&first, &second));

        let r1 = system
            .create_receiver("localhost", "t", Some(""), None)
            .await
            .expect("receiver");
        let r2 = system
            .create_receiver("localhost", "t", None, None)
            .await
            .expect("receiver");
        assert!(Arc::ptr_eq(&r1, &r2));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_registration_is_logged() {
        let system = system().await;
        system
            .create_enqueuer("localhost", "jobs", None)
            .await
            .expect("enqueuer");
        assert!(logs_contain("Registered Queue transmitter for jobs"));
    }

    #[tokio::test]
    async fn test_kind_conflict_rejected() {
        let system = system().await;
        system
            .create_enqueuer("localhost", "jobs", None)
            .await
            .expect("enqueuer");
        let result = system.create_transmitter("localhost", "jobs", None).await;
        assert!(matches!(result, Err(EventError::Configuration(_))));
    }

    #[tokio::test]
    async fn test_unregistered_destination() {
        let system = system().await;
        let event = Event::new(PropertySet::new()).expect("event");
        assert!(matches!(
            system.publish_event("nowhere", &event).await,
            Err(EventError::NotRegistered { .. })
        ));
        assert!(matches!(
            system.receive_event("nowhere", Some(Duration::ZERO)).await,
            Err(EventError::NotRegistered { .. })
        ));
    }

    #[tokio::test]
    async fn test_default_endpoint_creates_transmitter() {
        let system = system()
            .await
            .with_default_endpoint(BrokerEndpoint::tcp_default("localhost"));
        system
            .create_receiver("localhost", "lazy", None, None)
            .await
            .expect("receiver");

        let event = Event::new(PropertySet::new()).expect("event");
        system.publish_event("lazy", &event).await.expect("publish");
        assert!(system.has_transmitter("lazy").await);

        let got = system
            .receive_event("lazy", Some(Duration::from_millis(100)))
            .await
            .expect("receive");
        assert_eq!(got.expect("event").topic(), "lazy");
    }

    #[tokio::test]
    async fn test_unreachable_host() {
        let system = system().await;
        let result = system.create_transmitter("elsewhere", "t", None).await;
        assert!(matches!(result, Err(EventError::Connection(_))));
        assert!(!system.has_transmitter("t").await);
    }

    #[tokio::test]
    async fn test_remove_bindings() {
        let system = system().await;
        system
            .create_receiver("localhost", "t", None, None)
            .await
            .expect("receiver");
        assert!(system.has_receiver("t").await);
        assert!(system.remove_receiver("t").await);
        assert!(!system.remove_receiver("t").await);
        assert!(!system.has_receiver("t").await);
    }

    #[test]
    fn test_casts() {
        let orig = LocationId::from_parts("h", 1, 2, 0);
        let status = Event::builder(PropertySet::new())
            .build_status(orig)
            .expect("status");
        assert!(EventSystem::cast_to_status_event(&status).is_ok());
        assert!(matches!(
            EventSystem::cast_to_command_event(&status),
            Err(EventError::WrongVariant { .. })
        ));
    }
}
