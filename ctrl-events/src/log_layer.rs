//! Tracing integration: forwards tracing records as log events
//!
//! [`EventLogLayer`] turns each tracing event into a [`LogRecord`] and hands
//! it to a background task that publishes it as a log event. Records emitted
//! by this crate itself are not forwarded, so publishing never feeds back
//! into the layer.

use crate::config::{Config, TransmitterConfig};
use crate::error::{EventError, Result};
use crate::event::{Event, LogRecord, SourceLocation};
use crate::location::LocationId;
use crate::property::PropertySet;
use crate::system::EventSystem;
use crate::topic::DestinationKind;
use crate::transmitter::EventTransmitter;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::field::{Field, Visit};
use tracing::{Level, Subscriber, warn};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

const CRATE_TARGET: &str = "ctrl_events";

/// Environment variable overriding the configured log filter
pub const LOG_ENV: &str = "CTRL_EVENTS_LOG";

/// Numeric level carried in the LEVEL field of log events
pub fn level_value(level: Level) -> i32 {
    match level {
        Level::TRACE => 5000,
        Level::DEBUG => 10000,
        Level::INFO => 20000,
        Level::WARN => 30000,
        _ => 40000,
    }
}

/// Layer publishing tracing events through an [`EventTransmitter`]
pub struct EventLogLayer {
    sender: mpsc::UnboundedSender<LogRecord>,
}

impl EventLogLayer {
    /// Start the forwarding task on the current tokio runtime.
    ///
    /// All forwarded records share one originator id. The task ends once
    /// the layer is dropped.
    pub fn spawn(transmitter: Arc<EventTransmitter>) -> Result<(Self, JoinHandle<()>)> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            EventError::configuration(format!("log forwarding needs a runtime: {e}"))
        })?;
        let originator = LocationId::new()?;
        let (sender, mut receiver) = mpsc::unbounded_channel::<LogRecord>();

        let handle = runtime.spawn(async move {
            while let Some(record) = receiver.recv().await {
                let event = match Event::builder(PropertySet::new())
                    .build_log(originator.clone(), &record)
                {
                    Ok(event) => event,
                    Err(e) => {
                        warn!("Unable to build log event: {}", e);
                        continue;
                    }
                };
                if let Err(e) = transmitter.publish(&event).await {
                    warn!("Unable to forward log event: {}", e);
                }
            }
        });
        Ok((Self { sender }, handle))
    }
}

impl<S: Subscriber> Layer<S> for EventLogLayer {
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target().starts_with(CRATE_TARGET) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        let location = SourceLocation {
            filename: metadata.file().unwrap_or_default().to_owned(),
            line: metadata.line().unwrap_or(0),
            method: metadata.module_path().unwrap_or_default().to_owned(),
            class: String::new(),
        };
        let record = LogRecord::new(
            metadata.target(),
            level_value(*metadata.level()),
            visitor.finish(),
        )
        .with_location(location);

        // A closed channel means forwarding has stopped
        let _ = self.sender.send(record);
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            return self.message;
        }
        let fields = self.fields.join(" ");
        if self.message.is_empty() {
            fields
        } else {
            format!("{} {}", self.message, fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            value.clone_into(&mut self.message);
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

/// Install the global tracing subscriber.
///
/// The filter comes from `CTRL_EVENTS_LOG`, falling back to the configured
/// level. With `logging.forward_events` set, records are also published to
/// `logging.topic` on the configured broker; the returned handle is the
/// forwarding task.
pub async fn init_tracing(
    system: &EventSystem,
    config: &Config,
) -> Result<Option<JoinHandle<()>>> {
    let (layer, handle) = if config.logging.forward_events {
        let transmitter = system
            .create_transmitter_from_config(
                &TransmitterConfig::new(config.logging.topic.as_str(), config.broker.clone()),
                DestinationKind::Topic,
            )
            .await?;
        let (layer, handle) = EventLogLayer::spawn(transmitter)?;
        (Some(layer), Some(handle))
    } else {
        (None, None)
    };

    let filter = tracing_subscriber::EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(layer)
        .try_init()
        .map_err(|e| EventError::configuration(format!("tracing already initialized: {e}")))?;
    Ok(handle)
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::broker::{BrokerEndpoint, EmbeddedConnector};
    use crate::names;
    use crate::receiver::EventReceiver;
    use std::time::Duration;
    use tracing::info;

    async fn forwarding() -> (EventLogLayer, EventReceiver) {
        let connector = EmbeddedConnector::new();
        let endpoint = BrokerEndpoint::tcp_default("localhost");
        connector.bind(endpoint.clone()).await;

        let receiver = EventReceiver::new(&connector, &endpoint, names::LOGGING_TOPIC, None)
            .await
            .expect("receiver");
        let transmitter = EventTransmitter::new(&connector, &endpoint, names::LOGGING_TOPIC)
            .await
            .expect("transmitter");
        let (layer, _handle) = EventLogLayer::spawn(Arc::new(transmitter)).expect("layer");
        (layer, receiver)
    }

    #[test]
    fn test_level_values() {
        assert_eq!(level_value(Level::TRACE), 5000);
        assert_eq!(level_value(Level::INFO), 20000);
        assert_eq!(level_value(Level::ERROR), 40000);
    }

    #[tokio::test]
    async fn test_records_become_log_events() {
        let (layer, receiver) = forwarding().await;
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            info!(target: "pipeline::stage1", attempt = 3, "stage started");
        });

        let event = receiver
            .receive(Some(Duration::from_secs(1)))
            .await
            .expect("receive")
            .expect("log event");
        let log = event.as_log().expect("log");
        assert_eq!(log.logger().expect("logger"), "pipeline::stage1");
        assert_eq!(log.level().expect("level"), 20000);
        assert_eq!(log.message().expect("message"), "stage started attempt=3");
        assert!(
            event
                .filterable_property_names()
                .contains(&names::LOGGER.to_owned())
        );
        assert_eq!(event.topic(), names::LOGGING_TOPIC);
    }

    #[tokio::test]
    async fn test_own_records_not_forwarded() {
        let (layer, receiver) = forwarding().await;
        let subscriber = tracing_subscriber::registry().with(layer);
        tracing::subscriber::with_default(subscriber, || {
            info!(target: "ctrl_events::broker", "internal");
        });

        let got = receiver
            .receive(Some(Duration::from_millis(50)))
            .await
            .expect("receive");
        assert!(got.is_none());
    }
}
