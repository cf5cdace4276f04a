//! Broker collaborator interface and the embedded in-process broker
//!
//! Transmitters and receivers talk to a broker only through [`Broker`] and
//! [`Consumer`]; [`Connector`] resolves an endpoint to a connected broker.
//! [`EmbeddedBroker`] implements the interface in-process with topic
//! wildcards, selector evaluation and durable work queues.

use crate::error::{EventError, Result};
use crate::message::{MAX_MESSAGE_SIZE, Message};
use crate::names;
use crate::property::PropertySet;
use crate::queue_manager::{QueueManager, QueueStats};
use crate::selector::SelectorExpr;
use crate::topic::{DestinationKind, TopicMatcher};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Where a broker listens
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BrokerEndpoint {
    Tcp { host: String, port: u16 },
    LocalSocket,
}

impl BrokerEndpoint {
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        BrokerEndpoint::Tcp {
            host: host.into().to_ascii_lowercase(),
            port,
        }
    }

    /// TCP endpoint on the default broker port
    pub fn tcp_default(host: impl Into<String>) -> Self {
        Self::tcp(host, names::DEFAULT_BROKER_PORT)
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrokerEndpoint::Tcp { host, port } => write!(f, "tcp://{host}:{port}"),
            BrokerEndpoint::LocalSocket => f.write_str("local socket"),
        }
    }
}

/// A message as held by a broker awaiting delivery
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Broker-wide publish sequence number
    pub sequence: u64,
    /// Filterable headers used for selector evaluation
    pub headers: PropertySet,
    /// Encoded [`Message`]
    pub payload: Vec<u8>,
}

/// Publish/subscribe capability of a connected broker
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publish an encoded message to one concrete destination
    async fn publish(&self, destination: &str, kind: DestinationKind, payload: Vec<u8>)
    -> Result<()>;

    /// Bind a consumer to `destination`, filtered by an optional selector
    async fn subscribe(
        &self,
        destination: &str,
        kind: DestinationKind,
        selector: Option<&str>,
    ) -> Result<Box<dyn Consumer>>;
}

/// Consumer handle returned by [`Broker::subscribe`]
#[async_trait]
pub trait Consumer: Send {
    /// Wait for the next message; `Ok(None)` when the timeout elapses
    async fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>>;
}

/// Resolves endpoints to connected brokers
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Arc<dyn Broker>>;
}

/// Statistics about broker operation
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct BrokerStatistics {
    /// Total messages published
    pub messages_published: u64,
    /// Total topic deliveries (one per matching subscriber)
    pub messages_delivered: u64,
    /// Topic deliveries withheld by a selector
    pub messages_filtered: u64,
    /// Active topic subscribers
    pub active_subscribers: usize,
    /// Queues that have been used
    pub active_queues: usize,
    /// Broker uptime in seconds
    pub uptime_seconds: u64,
}

struct TopicSubscriber {
    sender: mpsc::UnboundedSender<Delivery>,
    selector: Option<SelectorExpr>,
}

fn parse_selector(selector: Option<&str>) -> Result<Option<SelectorExpr>> {
    match selector.map(str::trim) {
        None | Some("") => Ok(None),
        Some(text) => SelectorExpr::parse(text).map(Some),
    }
}

/// In-process broker that manages topics, queues and subscriptions
pub struct EmbeddedBroker {
    /// Topic matcher for routing messages
    topic_matcher: Arc<RwLock<TopicMatcher>>,
    /// Subscriber senders for message delivery
    subscribers: Arc<Mutex<HashMap<Uuid, TopicSubscriber>>>,
    /// Work queues
    queues: QueueManager,
    /// Message sequence counter
    sequence: Arc<Mutex<u64>>,
    /// Statistics
    stats: Arc<Mutex<BrokerStatistics>>,
    /// Broker start time
    start_time: Instant,
    shut_down: AtomicBool,
}

impl EmbeddedBroker {
    pub fn new() -> Self {
        Self::with_queue_capacity(10_000)
    }

    /// Create a broker whose queues hold at most `max_queue_size` messages
    pub fn with_queue_capacity(max_queue_size: usize) -> Self {
        Self {
            topic_matcher: Arc::new(RwLock::new(TopicMatcher::new())),
            subscribers: Arc::new(Mutex::new(HashMap::new())),
            queues: QueueManager::new(max_queue_size),
            sequence: Arc::new(Mutex::new(0)),
            stats: Arc::new(Mutex::new(BrokerStatistics::default())),
            start_time: Instant::now(),
            shut_down: AtomicBool::new(false),
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if self.shut_down.load(Ordering::SeqCst) {
            return Err(EventError::connection("broker has been shut down"));
        }
        Ok(())
    }

    async fn next_sequence(&self) -> u64 {
        let mut seq_guard = self.sequence.lock().await;
        let sequence = *seq_guard;
        *seq_guard += 1;
        sequence
    }

    async fn publish_topic(&self, topic: &str, delivery: Delivery) -> Result<()> {
        let subscriber_ids = {
            let topic_matcher = self.topic_matcher.read().await;
            topic_matcher.find_subscribers(topic)
        };

        let mut delivered = 0u64;
        let mut filtered = 0u64;
        let mut failed = Vec::new();
        {
            let subscribers = self.subscribers.lock().await;
            for id in &subscriber_ids {
                let Some(subscriber) = subscribers.get(id) else {
                    continue;
                };
                let accepted = subscriber
                    .selector
                    .as_ref()
                    .is_none_or(|expr| expr.matches(&delivery.headers));
                if !accepted {
                    filtered += 1;
                } else if subscriber.sender.send(delivery.clone()).is_err() {
                    failed.push(*id);
                } else {
                    delivered += 1;
                }
            }
        }

        // Consumers that were dropped leave a closed channel behind
        if !failed.is_empty() {
            let mut subscribers = self.subscribers.lock().await;
            let mut topic_matcher = self.topic_matcher.write().await;
            for id in failed {
                subscribers.remove(&id);
                topic_matcher.unsubscribe(id);
                debug!("Removed closed subscriber: {}", id);
            }
        }

        let mut stats = self.stats.lock().await;
        stats.messages_delivered += delivered;
        stats.messages_filtered += filtered;
        debug!(
            "Published message {} to {} subscribers on topic: {}",
            delivery.sequence, delivered, topic
        );
        Ok(())
    }

    /// Current statistics
    pub async fn statistics(&self) -> BrokerStatistics {
        let mut stats = self.stats.lock().await.clone();
        stats.active_subscribers = self.topic_matcher.read().await.subscriber_count();
        stats.active_queues = self.queues.queue_count().await;
        stats.uptime_seconds = self.start_time.elapsed().as_secs();
        stats
    }

    /// Statistics of one queue
    pub async fn queue_statistics(&self, queue: &str) -> Option<QueueStats> {
        self.queues.get_stats(queue).await
    }

    /// Stop accepting publishes and close every topic consumer
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut subscribers = self.subscribers.lock().await;
        let mut topic_matcher = self.topic_matcher.write().await;
        for id in subscribers.keys() {
            topic_matcher.unsubscribe(*id);
        }
        let closed = subscribers.len();
        subscribers.clear();
        info!("Embedded broker shut down, closed {} subscribers", closed);
    }
}

impl Default for EmbeddedBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for EmbeddedBroker {
    async fn publish(
        &self,
        destination: &str,
        kind: DestinationKind,
        payload: Vec<u8>,
    ) -> Result<()> {
        self.ensure_running()?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(EventError::broker("Message exceeds 1MB limit"));
        }

        let message = Message::deserialize(&payload)?;
        let delivery = Delivery {
            sequence: self.next_sequence().await,
            headers: message.headers,
            payload,
        };

        {
            let mut stats = self.stats.lock().await;
            stats.messages_published += 1;
        }

        match kind {
            DestinationKind::Topic => self.publish_topic(destination, delivery).await,
            DestinationKind::Queue => self.queues.enqueue(destination, delivery).await,
        }
    }

    async fn subscribe(
        &self,
        destination: &str,
        kind: DestinationKind,
        selector: Option<&str>,
    ) -> Result<Box<dyn Consumer>> {
        self.ensure_running()?;
        let selector = parse_selector(selector)?;

        match kind {
            DestinationKind::Topic => {
                let id = Uuid::new_v4();
                let (sender, receiver) = mpsc::unbounded_channel();
                self.subscribers
                    .lock()
                    .await
                    .insert(id, TopicSubscriber { sender, selector });
                self.topic_matcher.write().await.subscribe(destination, id);
                debug!("Subscribed {} to topic pattern: {}", id, destination);
                Ok(Box::new(TopicConsumer { receiver }))
            }
            DestinationKind::Queue => {
                debug!("Attached dequeuer to queue: {}", destination);
                Ok(Box::new(QueueConsumer {
                    queues: self.queues.clone(),
                    queue: destination.to_owned(),
                    selector,
                }))
            }
        }
    }
}

/// Consumer of a topic subscription
struct TopicConsumer {
    receiver: mpsc::UnboundedReceiver<Delivery>,
}

#[async_trait]
impl Consumer for TopicConsumer {
    async fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>> {
        let next = match timeout {
            None => self.receiver.recv().await,
            Some(timeout) => match tokio::time::timeout(timeout, self.receiver.recv()).await {
                Ok(next) => next,
                Err(_) => return Ok(None),
            },
        };
        next.map(|delivery| Some(delivery.payload))
            .ok_or_else(|| EventError::broker("subscription closed by broker"))
    }
}

/// Consumer of a work queue
struct QueueConsumer {
    queues: QueueManager,
    queue: String,
    selector: Option<SelectorExpr>,
}

#[async_trait]
impl Consumer for QueueConsumer {
    async fn receive(&mut self, timeout: Option<Duration>) -> Result<Option<Vec<u8>>> {
        let delivery = self
            .queues
            .dequeue(&self.queue, self.selector.as_ref(), timeout)
            .await?;
        Ok(delivery.map(|d| d.payload))
    }
}

/// Connector for embedded brokers bound to endpoints in this process
#[derive(Clone, Default)]
pub struct EmbeddedConnector {
    brokers: Arc<RwLock<HashMap<BrokerEndpoint, Arc<EmbeddedBroker>>>>,
}

impl EmbeddedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start (or return the already running) broker at `endpoint`
    pub async fn bind(&self, endpoint: BrokerEndpoint) -> Arc<EmbeddedBroker> {
        let mut brokers = self.brokers.write().await;
        if let Some(existing) = brokers.get(&endpoint) {
            return Arc::clone(existing);
        }
        info!("Embedded broker listening on {}", endpoint);
        let broker = Arc::new(EmbeddedBroker::new());
        brokers.insert(endpoint, Arc::clone(&broker));
        broker
    }

    /// Stop the broker at `endpoint`
    pub async fn unbind(&self, endpoint: &BrokerEndpoint) -> bool {
        let broker = self.brokers.write().await.remove(endpoint);
        match broker {
            Some(broker) => {
                broker.shutdown().await;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl Connector for EmbeddedConnector {
    async fn connect(&self, endpoint: &BrokerEndpoint) -> Result<Arc<dyn Broker>> {
        let brokers = self.brokers.read().await;
        match brokers.get(endpoint) {
            Some(broker) => {
                debug!("Connected to embedded broker at {}", endpoint);
                let broker: Arc<dyn Broker> = Arc::clone(broker) as Arc<dyn Broker>;
                Ok(broker)
            }
            None => {
                warn!("No broker at {}", endpoint);
                Err(EventError::connection(format!(
                    "Failed to connect to broker at {endpoint} (is broker running?)"
                )))
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::event::Event;

    fn encoded(topic: &str, run_id: &str, foo: i64) -> Vec<u8> {
        let mut filter = PropertySet::new();
        filter.set("FOO", foo);
        let mut event = Event::builder(PropertySet::new())
            .run_id(run_id)
            .filter(filter)
            .build()
            .expect("event");
        event.stamp_publication(topic);
        Message::from_event(&event, topic, DestinationKind::Topic)
            .serialize()
            .expect("serialize")
    }

    fn decode(payload: &[u8]) -> Event {
        Message::deserialize(payload)
            .expect("message")
            .into_event()
            .expect("event")
    }

    #[tokio::test]
    async fn test_topic_fan_out() {
        let broker = EmbeddedBroker::new();
        let mut a = broker
            .subscribe("prefix.A", DestinationKind::Topic, None)
            .await
            .expect("subscribe");
        let mut all = broker
            .subscribe("prefix.*", DestinationKind::Topic, None)
            .await
            .expect("subscribe");

        broker
            .publish("prefix.A", DestinationKind::Topic, encoded("prefix.A", "r", 1))
            .await
            .expect("publish");
        broker
            .publish("prefix.B", DestinationKind::Topic, encoded("prefix.B", "r", 2))
            .await
            .expect("publish");

        let got = a.receive(Some(Duration::from_millis(50))).await.expect("receive");
        assert_eq!(decode(&got.expect("event")).topic(), "prefix.A");
        assert!(
            a.receive(Some(Duration::from_millis(10)))
                .await
                .expect("receive")
                .is_none()
        );

        for expected in ["prefix.A", "prefix.B"] {
            let got = all.receive(Some(Duration::from_millis(50))).await.expect("receive");
            assert_eq!(decode(&got.expect("event")).topic(), expected);
        }

        let stats = broker.statistics().await;
        assert_eq!(stats.messages_published, 2);
        assert_eq!(stats.messages_delivered, 3);
        assert_eq!(stats.active_subscribers, 2);
    }

    #[tokio::test]
    async fn test_selector_filters_delivery() {
        let broker = EmbeddedBroker::new();
        let mut consumer = broker
            .subscribe("t", DestinationKind::Topic, Some("RUNID = 'X'"))
            .await
            .expect("subscribe");

        broker
            .publish("t", DestinationKind::Topic, encoded("t", "Y", 1))
            .await
            .expect("publish");
        assert!(
            consumer
                .receive(Some(Duration::from_millis(20)))
                .await
                .expect("receive")
                .is_none()
        );

        broker
            .publish("t", DestinationKind::Topic, encoded("t", "X", 2))
            .await
            .expect("publish");
        let got = consumer
            .receive(Some(Duration::from_millis(50)))
            .await
            .expect("receive")
            .expect("event");
        assert_eq!(decode(&got).run_id(), Some("X"));
        assert_eq!(broker.statistics().await.messages_filtered, 1);
    }

    #[tokio::test]
    async fn test_bad_selector_rejected() {
        let broker = EmbeddedBroker::new();
        let result = broker
            .subscribe("t", DestinationKind::Topic, Some("RUNID = "))
            .await;
        assert!(matches!(result, Err(EventError::Validation(_))));
    }

    #[tokio::test]
    async fn test_queue_delivers_once() {
        let broker = EmbeddedBroker::new();
        broker
            .publish("q", DestinationKind::Queue, encoded("q", "r", 300))
            .await
            .expect("publish");

        let mut first = broker
            .subscribe("q", DestinationKind::Queue, Some(""))
            .await
            .expect("subscribe");
        let mut second = broker
            .subscribe("q", DestinationKind::Queue, None)
            .await
            .expect("subscribe");

        let got = first
            .receive(Some(Duration::from_millis(50)))
            .await
            .expect("receive");
        assert!(got.is_some());
        assert!(
            second
                .receive(Some(Duration::from_millis(10)))
                .await
                .expect("receive")
                .is_none()
        );
        let stats = broker.queue_statistics("q").await.expect("queue stats");
        assert_eq!(stats.messages_dequeued, 1);
    }

    #[tokio::test]
    async fn test_dropped_consumer_is_pruned() {
        let broker = EmbeddedBroker::new();
        let consumer = broker
            .subscribe("t", DestinationKind::Topic, None)
            .await
            .expect("subscribe");
        drop(consumer);

        broker
            .publish("t", DestinationKind::Topic, encoded("t", "r", 1))
            .await
            .expect("publish");
        assert_eq!(broker.statistics().await.active_subscribers, 0);
    }

    #[tokio::test]
    async fn test_shutdown_closes_consumers() {
        let broker = EmbeddedBroker::new();
        let mut consumer = broker
            .subscribe("t", DestinationKind::Topic, None)
            .await
            .expect("subscribe");
        broker.shutdown().await;

        assert!(matches!(
            consumer.receive(None).await,
            Err(EventError::Broker(_))
        ));
        let result = broker
            .publish("t", DestinationKind::Topic, encoded("t", "r", 1))
            .await;
        assert!(matches!(result, Err(EventError::Connection(_))));
    }

    #[tokio::test]
    async fn test_connector_resolves_bound_endpoints() {
        let connector = EmbeddedConnector::new();
        let endpoint = BrokerEndpoint::tcp_default("LocalHost");
        assert!(matches!(
            connector.connect(&endpoint).await,
            Err(EventError::Connection(_))
        ));

        let bound = connector.bind(endpoint.clone()).await;
        let again = connector.bind(BrokerEndpoint::tcp("localhost", 61616)).await;
        assert!(Arc::ptr_eq(&bound, &again));
        assert!(connector.connect(&endpoint).await.is_ok());

        assert!(connector.unbind(&endpoint).await);
        assert!(!connector.unbind(&endpoint).await);
        assert!(connector.connect(&endpoint).await.is_err());
        assert_eq!(endpoint.to_string(), "tcp://localhost:61616");
    }
}
