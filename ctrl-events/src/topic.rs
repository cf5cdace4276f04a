//! Destination naming and topic pattern matching
//!
//! A destination string is one of:
//! - a bare name, `pipeline.stage1`
//! - a comma-joined list, `alerts,audit`, which publishes one message to
//!   every listed topic; subscribing binds the exact string with no fan-out
//! - a wildcard prefix, `pipeline.*`, which subscribes to every topic below
//!   the prefix

use crate::error::{EventError, Result};
use std::collections::HashMap;
use uuid::Uuid;

/// Whether a destination is broadcast (topic) or work-queue (queue)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum DestinationKind {
    Topic,
    Queue,
}

/// A parsed destination string
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Single(String),
    Combined(Vec<String>),
    Wildcard(String),
}

impl Destination {
    /// Parse and validate a destination string
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(EventError::configuration("destination name is empty"));
        }

        if input.contains(',') {
            let names = input
                .split(',')
                .map(|part| validate_bare_name(part.trim()).map(str::to_owned))
                .collect::<Result<Vec<_>>>()?;
            return Ok(Destination::Combined(names));
        }

        if let Some(prefix) = input.strip_suffix(".*") {
            let pattern = TopicPattern::new(input);
            if !pattern.is_wildcard() || prefix.split('.').any(str::is_empty) {
                return Err(EventError::configuration(format!(
                    "invalid wildcard destination '{input}'"
                )));
            }
            for segment in prefix.split('.').filter(|segment| *segment != "*") {
                validate_bare_name(segment)?;
            }
            return Ok(Destination::Wildcard(input.to_owned()));
        }

        validate_bare_name(input)?;
        Ok(Destination::Single(input.to_owned()))
    }

    /// Names a publish to this destination is delivered to
    pub fn publish_targets(&self) -> Result<Vec<String>> {
        match self {
            Destination::Single(name) => Ok(vec![name.clone()]),
            Destination::Combined(names) => Ok(names.clone()),
            Destination::Wildcard(pattern) => Err(EventError::configuration(format!(
                "cannot publish to wildcard destination '{pattern}'"
            ))),
        }
    }

    /// The exact string a subscription binds to
    pub fn subscription_key(&self) -> String {
        match self {
            Destination::Single(name) | Destination::Wildcard(name) => name.clone(),
            Destination::Combined(names) => names.join(","),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, Destination::Wildcard(_))
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.subscription_key())
    }
}

fn validate_bare_name(name: &str) -> Result<&str> {
    if name.is_empty() {
        return Err(EventError::configuration("empty name in destination"));
    }
    if name.contains('*') || name.chars().any(char::is_whitespace) {
        return Err(EventError::configuration(format!(
            "invalid destination name '{name}'"
        )));
    }
    if name.split('.').any(str::is_empty) {
        return Err(EventError::configuration(format!(
            "empty segment in destination name '{name}'"
        )));
    }
    Ok(name)
}

/// A topic pattern for subscription matching
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TopicPattern {
    pattern: String,
    is_wildcard: bool,
}

impl TopicPattern {
    pub fn new(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        let is_wildcard = pattern.split('.').any(|part| part == "*");
        Self {
            pattern,
            is_wildcard,
        }
    }

    pub fn pattern(&self) -> &str {
        &self.pattern
    }

    pub fn is_wildcard(&self) -> bool {
        self.is_wildcard
    }

    /// Check if this pattern matches a concrete topic name
    pub fn matches(&self, topic: &str) -> bool {
        if !self.is_wildcard {
            return self.pattern == topic;
        }

        let pattern_parts: Vec<&str> = self.pattern.split('.').collect();
        let topic_parts: Vec<&str> = topic.split('.').collect();

        // A trailing '*' needs at least one segment to stand in for
        if pattern_parts.len() > topic_parts.len() {
            return false;
        }

        for (pattern_part, topic_part) in pattern_parts.iter().zip(&topic_parts) {
            if *pattern_part != "*" && pattern_part != topic_part {
                return false;
            }
        }

        // Extra topic segments are only swallowed by a trailing '*'
        pattern_parts.len() == topic_parts.len() || pattern_parts.last() == Some(&"*")
    }
}

/// Routes concrete topic names to the subscriptions whose patterns match
#[derive(Debug, Default)]
pub struct TopicMatcher {
    subscriptions: HashMap<Uuid, TopicPattern>,
    order: Vec<Uuid>,
}

impl TopicMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, pattern: &str, subscriber_id: Uuid) {
        if self
            .subscriptions
            .insert(subscriber_id, TopicPattern::new(pattern))
            .is_none()
        {
            self.order.push(subscriber_id);
        }
    }

    pub fn unsubscribe(&mut self, subscriber_id: Uuid) -> bool {
        self.order.retain(|id| *id != subscriber_id);
        self.subscriptions.remove(&subscriber_id).is_some()
    }

    /// Subscribers matching `topic`, in subscription order
    pub fn find_subscribers(&self, topic: &str) -> Vec<Uuid> {
        self.order
            .iter()
            .filter(|id| {
                self.subscriptions
                    .get(id)
                    .is_some_and(|pattern| pattern.matches(topic))
            })
            .copied()
            .collect()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscriptions.len()
    }

    /// Distinct patterns currently subscribed
    pub fn pattern_count(&self) -> usize {
        let mut patterns: Vec<&str> = self
            .subscriptions
            .values()
            .map(TopicPattern::pattern)
            .collect();
        patterns.sort_unstable();
        patterns.dedup();
        patterns.len()
    }
}
