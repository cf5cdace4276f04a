//! Wire envelope for events
//!
//! Filterable properties travel as message headers so the broker can
//! evaluate selectors without touching the body; custom properties travel in
//! the body.

use crate::error::{EventError, Result};
use crate::event::{Event, EventKind, EventType};
use crate::location::{LocationId, Role};
use crate::names;
use crate::property::PropertySet;
use crate::topic::DestinationKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum encoded message size accepted by brokers
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// An event as it is sent to a broker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique message identifier
    pub id: Uuid,
    /// Concrete destination name
    pub destination: String,
    pub kind: DestinationKind,
    /// Filterable fields, visible to selectors
    pub headers: PropertySet,
    /// Custom fields
    pub body: PropertySet,
}

impl Message {
    /// Wrap an already stamped event for `destination`
    pub fn from_event(event: &Event, destination: &str, kind: DestinationKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            destination: destination.to_owned(),
            kind,
            headers: event.filterable_properties(),
            body: event.custom_properties(),
        }
    }

    /// Rebuild the event variant named by the TYPE header
    pub fn into_event(self) -> Result<Event> {
        let tag = self
            .headers
            .get_string(names::TYPE)
            .map_err(|e| EventError::serialization(format!("message without event type: {e}")))?;
        let event_type = EventType::from_tag(tag)
            .ok_or_else(|| EventError::serialization(format!("unknown event type '{tag}'")))?;

        let originator = || {
            LocationId::read_properties(Role::Originator, &self.headers)
                .map_err(|e| EventError::serialization(format!("bad originator: {e}")))
        };
        let kind = match event_type {
            EventType::Event => EventKind::Plain,
            EventType::Status => EventKind::Status {
                originator: originator()?,
            },
            EventType::Log => EventKind::Log {
                originator: originator()?,
            },
            EventType::Command => EventKind::Command {
                originator: originator()?,
                destination: LocationId::read_properties(Role::Destination, &self.headers)
                    .map_err(|e| EventError::serialization(format!("bad destination: {e}")))?,
            },
        };

        let filterable = self.headers.names();
        let mut properties = self.headers;
        properties.merge(&self.body);
        Ok(Event::from_wire(properties, filterable, kind))
    }

    /// Serialize message to bytes
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let data = bincode::serde::encode_to_vec(self, bincode::config::standard())
            .map_err(|e| EventError::serialization(e.to_string()))?;
        if data.len() > MAX_MESSAGE_SIZE {
            return Err(EventError::serialization(format!(
                "message of {} bytes exceeds the {} byte limit",
                data.len(),
                MAX_MESSAGE_SIZE
            )));
        }
        Ok(data)
    }

    /// Deserialize message from bytes
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        bincode::serde::decode_from_slice(data, bincode::config::standard())
            .map(|(message, _)| message)
            .map_err(|e| EventError::serialization(e.to_string()))
    }
}
