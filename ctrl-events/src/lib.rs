//! # ctrl-events
//!
//! Client-side event addressing and filtering over a publish/subscribe broker.
//! Events are typed property sets stamped with system fields; filterable
//! fields travel as message headers so receivers can subscribe with SQL-like
//! selectors.
//!
//! ## Features
//!
//! - **Events**: plain, status, command and log variants with checked narrowing
//! - **Addressing**: process-unique location ids and selector builders
//! - **Destinations**: single topics, comma-joined fan-out and `prefix.*` wildcards
//! - **Queues**: durable FIFO work queues with exactly-once hand-off
//! - **Registry**: destination-keyed transmitters and receivers with receive timeouts
//!
//! ## Basic Usage
//!
//! ```rust,no_run
//! use ctrl_events::{BrokerEndpoint, EmbeddedConnector, Event, EventSystem, PropertySet};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connector = EmbeddedConnector::new();
//!     connector.bind(BrokerEndpoint::tcp_default("localhost")).await;
//!     let system = EventSystem::new(Arc::new(connector));
//!
//!     system.create_receiver("localhost", "pipeline", Some("RUNID = 'run42'"), None).await?;
//!     system.create_transmitter("localhost", "pipeline", None).await?;
//!
//!     let mut ps = PropertySet::new();
//!     ps.set("exposure", 15.0);
//!     let event = Event::with_run_id("run42", ps)?;
//!     system.publish_event("pipeline", &event).await?;
//!
//!     if let Some(received) = system
//!         .receive_event("pipeline", Some(Duration::from_secs(1)))
//!         .await?
//!     {
//!         println!("{} at {}", received.topic(), received.pub_time());
//!     }
//!     Ok(())
//! }
//! ```

pub mod broker;
pub mod config;
pub mod error;
pub mod event;
pub mod location;
pub mod log_layer;
pub mod message;
pub mod names;
pub mod property;
pub mod queue_manager;
pub mod receiver;
pub mod selector;
pub mod system;
pub mod topic;
pub mod transmitter;

// Re-export main types for convenience
pub use broker::{
    Broker, BrokerEndpoint, BrokerStatistics, Connector, Consumer, Delivery, EmbeddedBroker,
    EmbeddedConnector,
};
pub use config::{
    BrokerConfig, Config, ConfigError, ConfigLoader, LoggingConfig, ReceiverConfig,
    TransmitterConfig,
};
pub use error::{EventError, Result};
pub use event::{
    CommandEvent, Event, EventBuilder, EventKind, EventType, LogEvent, LogRecord, SourceLocation,
    StatusEvent,
};
pub use location::{LocationId, LocationIdGenerator, Role};
pub use log_layer::{EventLogLayer, init_tracing};
pub use message::Message;
pub use property::{PropertySet, Value};
pub use receiver::EventReceiver;
pub use selector::{Selector, SelectorExpr};
pub use system::EventSystem;
pub use topic::{Destination, DestinationKind, TopicMatcher, TopicPattern};
pub use transmitter::EventTransmitter;
