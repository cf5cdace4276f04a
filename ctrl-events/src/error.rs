//! Error types for event construction, addressing and delivery

use thiserror::Error;

/// Result type alias for event operations
pub type Result<T> = std::result::Result<T, EventError>;

/// Errors that can occur while building, publishing or receiving events.
///
/// A receive that times out is not an error; it is reported as `Ok(None)`.
#[derive(Error, Debug)]
pub enum EventError {
    /// Broker unreachable or host unresolvable
    #[error("Connection error: {0}")]
    Connection(String),

    /// Missing or malformed configuration, including destination syntax
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Invalid filter property name or selector expression
    #[error("Validation error: {0}")]
    Validation(String),

    /// Property lookup on an absent key
    #[error("Property not found: {name}")]
    KeyNotFound { name: String },

    /// Typed property lookup on a value of another type
    #[error("Property {name} is not of type {expected}")]
    TypeMismatch { name: String, expected: &'static str },

    /// Checked narrowing applied to the wrong event variant
    #[error("Wrong event variant: expected {expected}, found {actual}")]
    WrongVariant {
        expected: &'static str,
        actual: &'static str,
    },

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Registry lookup of a destination with no binding
    #[error("Destination not registered: {destination}")]
    NotRegistered { destination: String },

    /// Broker lifecycle errors
    #[error("Broker error: {0}")]
    Broker(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EventError {
    /// Create a connection error
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Create a configuration error
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a key-not-found error
    pub fn key_not_found(name: impl Into<String>) -> Self {
        Self::KeyNotFound { name: name.into() }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(name: impl Into<String>, expected: &'static str) -> Self {
        Self::TypeMismatch {
            name: name.into(),
            expected,
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a not-registered error
    pub fn not_registered(destination: impl Into<String>) -> Self {
        Self::NotRegistered {
            destination: destination.into(),
        }
    }

    /// Create a broker error
    pub fn broker(msg: impl Into<String>) -> Self {
        Self::Broker(msg.into())
    }

    /// True for errors raised before any broker interaction
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::Validation(_) | Self::WrongVariant { .. }
        )
    }
}

impl From<crate::config::ConfigError> for EventError {
    fn from(err: crate::config::ConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EventError::key_not_found("RUNID");
        assert_eq!(err.to_string(), "Property not found: RUNID");

        let err = EventError::WrongVariant {
            expected: "COMMAND",
            actual: "STATUS",
        };
        assert_eq!(
            err.to_string(),
            "Wrong event variant: expected COMMAND, found STATUS"
        );
    }

    #[test]
    fn test_construction_errors() {
        assert!(EventError::validation("dotted name").is_construction_error());
        assert!(EventError::configuration("no host").is_construction_error());
        assert!(!EventError::connection("refused").is_construction_error());
        assert!(!EventError::not_registered("topic").is_construction_error());
    }
}
