//! Event variants and property partitioning
//!
//! Every [`Event`] wraps a [`PropertySet`] whose keys fall into three groups:
//! the system fields every event carries, the filterable fields a broker can
//! evaluate in a selector (system fields plus any extra filter set and the
//! variant's own fields), and custom fields, which are everything else.
//!
//! The variants form a closed union, [`EventKind`]. Variant-specific data is
//! reached through checked narrowing ([`Event::as_status`],
//! [`Event::as_command`], [`Event::as_log`]), which fails with
//! [`EventError::WrongVariant`] on the wrong kind.

use crate::error::{EventError, Result};
use crate::location::{LocationId, Role};
use crate::names;
use crate::property::{PropertySet, Value};
use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

static LAST_TIMESTAMP: AtomicI64 = AtomicI64::new(0);

/// Current time in nanoseconds since the epoch, strictly increasing within
/// the process
pub fn now_nanos() -> i64 {
    let wall = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
    let previous = LAST_TIMESTAMP
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
            Some(wall.max(last.saturating_add(1)))
        })
        .unwrap_or_else(|last| last);
    wall.max(previous.saturating_add(1))
}

/// Tag identifying an event variant on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Event,
    Status,
    Command,
    Log,
}

impl EventType {
    /// Wire value stored in the TYPE field
    pub fn as_tag(self) -> &'static str {
        match self {
            EventType::Event => "_E",
            EventType::Status => "_S",
            EventType::Command => "_C",
            EventType::Log => "_L",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "_E" => Some(EventType::Event),
            "_S" => Some(EventType::Status),
            "_C" => Some(EventType::Command),
            "_L" => Some(EventType::Log),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            EventType::Event => "EVENT",
            EventType::Status => "STATUS",
            EventType::Command => "COMMAND",
            EventType::Log => "LOG",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Variant payload of an event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Plain,
    Status {
        originator: LocationId,
    },
    Command {
        originator: LocationId,
        destination: LocationId,
    },
    Log {
        originator: LocationId,
    },
}

impl EventKind {
    pub fn event_type(&self) -> EventType {
        match self {
            EventKind::Plain => EventType::Event,
            EventKind::Status { .. } => EventType::Status,
            EventKind::Command { .. } => EventType::Command,
            EventKind::Log { .. } => EventType::Log,
        }
    }

    fn write_properties(&self, ps: &mut PropertySet, filterable: &mut BTreeSet<String>) {
        let mut add = |id: &LocationId, role: Role| {
            id.write_properties(role, ps);
            filterable.extend(role.property_names().iter().map(|n| (*n).to_owned()));
        };
        match self {
            EventKind::Plain => {}
            EventKind::Status { originator } | EventKind::Log { originator } => {
                add(originator, Role::Originator);
            }
            EventKind::Command {
                originator,
                destination,
            } => {
                add(originator, Role::Originator);
                add(destination, Role::Destination);
            }
        }
    }
}

/// Result of validating an extra filter property
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NameCheck {
    Valid,
    Invalid(String),
}

impl NameCheck {
    pub fn is_valid(&self) -> bool {
        matches!(self, NameCheck::Valid)
    }
}

/// Check that `name` can be used as an extra filterable property.
///
/// Filterable names become broker header names, so they must be bare
/// (no dotted hierarchy), must not shadow a system field and must hold a
/// scalar value.
pub fn check_filter_name(name: &str, value: &Value) -> NameCheck {
    if name.is_empty() {
        return NameCheck::Invalid("filter property name is empty".to_owned());
    }
    if name.contains('.') {
        return NameCheck::Invalid(format!(
            "filter property name '{name}' must not contain '.'"
        ));
    }
    if names::is_system_name(name) {
        return NameCheck::Invalid(format!(
            "filter property name '{name}' is a reserved system field"
        ));
    }
    if !value.is_scalar() {
        return NameCheck::Invalid(format!(
            "filter property '{name}' holds a {} value, not a scalar",
            value.type_name()
        ));
    }
    NameCheck::Valid
}

/// Source location of a log record
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLocation {
    pub filename: String,
    pub line: u32,
    pub method: String,
    pub class: String,
}

impl SourceLocation {
    fn to_properties(&self) -> PropertySet {
        let mut ps = PropertySet::new();
        ps.set(names::FILENAME, self.filename.as_str());
        ps.set(names::CLASSNAME, self.class.as_str());
        ps.set(names::METHODNAME, self.method.as_str());
        ps.set(names::LINENUMBER, self.line);
        ps
    }
}

/// Log record carried by a log event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    pub logger: String,
    pub level: i32,
    pub message: String,
    pub location: SourceLocation,
    pub thread_name: String,
    /// Record time in nanoseconds since the epoch
    pub timestamp: i64,
}

impl LogRecord {
    pub fn new(logger: impl Into<String>, level: i32, message: impl Into<String>) -> Self {
        Self {
            logger: logger.into(),
            level,
            message: message.into(),
            location: SourceLocation::default(),
            thread_name: std::thread::current().name().unwrap_or("unnamed").to_owned(),
            timestamp: now_nanos(),
        }
    }

    pub fn with_location(mut self, location: SourceLocation) -> Self {
        self.location = location;
        self
    }

    fn write_properties(&self, ps: &mut PropertySet, filterable: &mut BTreeSet<String>) {
        ps.set(names::LOGGER, self.logger.as_str());
        ps.set(names::LEVEL, self.level);
        ps.set(names::MESSAGE, self.message.as_str());
        ps.set(names::LOCATION, self.location.to_properties());
        ps.set(names::TIMESTAMP, self.timestamp);
        ps.set(names::THREADNAME, self.thread_name.as_str());
        for name in [names::LOGGER, names::LEVEL, names::MESSAGE, names::LOCATION] {
            filterable.insert(name.to_owned());
        }
    }
}

/// Builder for all event variants
#[derive(Debug, Clone)]
pub struct EventBuilder {
    properties: PropertySet,
    run_id: Option<String>,
    filter: Option<PropertySet>,
}

impl EventBuilder {
    /// Attach a run id; without one the event has no RUNID field
    pub fn run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Extra properties that become filterable
    pub fn filter(mut self, filter: PropertySet) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn build(self) -> Result<Event> {
        self.finish(EventKind::Plain, None)
    }

    pub fn build_status(self, originator: LocationId) -> Result<Event> {
        self.finish(EventKind::Status { originator }, None)
    }

    pub fn build_command(self, originator: LocationId, destination: LocationId) -> Result<Event> {
        self.finish(
            EventKind::Command {
                originator,
                destination,
            },
            None,
        )
    }

    pub fn build_log(self, originator: LocationId, record: &LogRecord) -> Result<Event> {
        self.finish(EventKind::Log { originator }, Some(record))
    }

    fn finish(self, kind: EventKind, record: Option<&LogRecord>) -> Result<Event> {
        if let Some(filter) = &self.filter {
            for (name, value) in filter.iter() {
                if let NameCheck::Invalid(reason) = check_filter_name(name, value) {
                    return Err(EventError::validation(reason));
                }
            }
        }

        let mut properties = self.properties;
        let status = match properties.remove(names::STATUS) {
            None => names::UNKNOWN_STATUS.to_owned(),
            Some(Value::String(status)) => status,
            Some(other) => {
                return Err(EventError::validation(format!(
                    "STATUS must be a string, found a {} value",
                    other.type_name()
                )));
            }
        };
        properties.set(names::STATUS, status);

        properties.remove(names::RUNID);
        if let Some(run_id) = self.run_id {
            properties.set(names::RUNID, run_id);
        }
        properties.set(names::EVENTTIME, now_nanos());
        properties.set(names::TYPE, kind.event_type().as_tag());
        properties.set(names::TOPIC, names::UNINITIALIZED);
        properties.set(names::PUBTIME, 0i64);

        let mut filterable: BTreeSet<String> =
            names::SYSTEM_NAMES.iter().map(|n| (*n).to_owned()).collect();
        if let Some(filter) = &self.filter {
            properties.merge(filter);
            filterable.extend(filter.names());
        }
        kind.write_properties(&mut properties, &mut filterable);
        if let Some(record) = record {
            record.write_properties(&mut properties, &mut filterable);
        }

        Ok(Event {
            properties,
            filterable,
            kind,
        })
    }
}

/// An event: a property set with system fields stamped and partitioned
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    properties: PropertySet,
    filterable: BTreeSet<String>,
    kind: EventKind,
}

impl Event {
    /// Start building an event around `properties`
    pub fn builder(properties: PropertySet) -> EventBuilder {
        EventBuilder {
            properties,
            run_id: None,
            filter: None,
        }
    }

    /// Plain event without a run id
    pub fn new(properties: PropertySet) -> Result<Self> {
        Self::builder(properties).build()
    }

    /// Plain event with a run id
    pub fn with_run_id(run_id: impl Into<String>, properties: PropertySet) -> Result<Self> {
        Self::builder(properties).run_id(run_id).build()
    }

    /// Plain event with extra filterable properties
    pub fn with_filter(properties: PropertySet, filter: PropertySet) -> Result<Self> {
        Self::builder(properties).filter(filter).build()
    }

    /// Reassemble a received event; `filterable` lists its header names
    pub(crate) fn from_wire(
        properties: PropertySet,
        filterable: impl IntoIterator<Item = String>,
        kind: EventKind,
    ) -> Self {
        let mut names: BTreeSet<String> =
            names::SYSTEM_NAMES.iter().map(|n| (*n).to_owned()).collect();
        names.extend(filterable);
        Self {
            properties,
            filterable: names,
            kind,
        }
    }

    pub fn properties(&self) -> &PropertySet {
        &self.properties
    }

    /// Copy of the properties that are not filterable
    pub fn custom_properties(&self) -> PropertySet {
        self.properties
            .iter()
            .filter(|(name, _)| !self.filterable.contains(*name))
            .map(|(name, value)| (name, value.clone()))
            .collect()
    }

    /// Copy of the filterable properties present on this event
    pub fn filterable_properties(&self) -> PropertySet {
        self.properties
            .iter()
            .filter(|(name, _)| self.filterable.contains(*name))
            .map(|(name, value)| (name, value.clone()))
            .collect()
    }

    /// Filterable names in sorted order
    pub fn filterable_property_names(&self) -> Vec<String> {
        self.filterable.iter().cloned().collect()
    }

    /// Custom names in insertion order
    pub fn custom_property_names(&self) -> Vec<String> {
        self.properties
            .iter()
            .map(|(name, _)| name)
            .filter(|name| !self.filterable.contains(*name))
            .map(str::to_owned)
            .collect()
    }

    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    pub fn event_type(&self) -> EventType {
        self.kind.event_type()
    }

    pub fn event_time(&self) -> i64 {
        self.properties.get_int(names::EVENTTIME).unwrap_or_default()
    }

    /// Force EVENTTIME, e.g. to 0 for deterministic comparisons
    pub fn set_event_time(&mut self, nanos: i64) {
        self.properties.set(names::EVENTTIME, nanos);
    }

    /// Re-stamp EVENTTIME with the current time
    pub fn update_event_time(&mut self) {
        self.properties.set(names::EVENTTIME, now_nanos());
    }

    /// Publication time in nanoseconds; 0 before publish
    pub fn pub_time(&self) -> i64 {
        self.properties.get_int(names::PUBTIME).unwrap_or_default()
    }

    pub fn event_date(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_nanos(self.event_time())
    }

    /// Publication date, `None` until published
    pub fn pub_date(&self) -> Option<DateTime<Utc>> {
        match self.pub_time() {
            0 => None,
            nanos => Some(DateTime::from_timestamp_nanos(nanos)),
        }
    }

    pub fn run_id(&self) -> Option<&str> {
        self.properties.get_string(names::RUNID).ok()
    }

    pub fn status(&self) -> &str {
        self.properties
            .get_string(names::STATUS)
            .unwrap_or(names::UNKNOWN_STATUS)
    }

    pub fn set_status(&mut self, status: impl Into<String>) {
        self.properties.set(names::STATUS, status.into());
    }

    /// Destination the event was published to, or "uninitialized"
    pub fn topic(&self) -> &str {
        self.properties
            .get_string(names::TOPIC)
            .unwrap_or(names::UNINITIALIZED)
    }

    /// Stamp TOPIC and then PUBTIME as the last step before sending
    pub(crate) fn stamp_publication(&mut self, topic: &str) {
        self.properties.set(names::TOPIC, topic);
        let pub_time = now_nanos().max(self.event_time());
        self.properties.set(names::PUBTIME, pub_time);
    }

    /// Narrow to a status view; log events qualify as they carry an originator
    pub fn as_status(&self) -> Result<StatusEvent<'_>> {
        match &self.kind {
            EventKind::Status { originator } | EventKind::Log { originator } => Ok(StatusEvent {
                event: self,
                originator,
            }),
            other => Err(Self::wrong_variant(EventType::Status, other)),
        }
    }

    pub fn as_command(&self) -> Result<CommandEvent<'_>> {
        match &self.kind {
            EventKind::Command {
                originator,
                destination,
            } => Ok(CommandEvent {
                event: self,
                originator,
                destination,
            }),
            other => Err(Self::wrong_variant(EventType::Command, other)),
        }
    }

    pub fn as_log(&self) -> Result<LogEvent<'_>> {
        match &self.kind {
            EventKind::Log { originator } => Ok(LogEvent {
                event: self,
                originator,
            }),
            other => Err(Self::wrong_variant(EventType::Log, other)),
        }
    }

    fn wrong_variant(expected: EventType, actual: &EventKind) -> EventError {
        EventError::WrongVariant {
            expected: expected.name(),
            actual: actual.event_type().name(),
        }
    }
}

/// Status view of an event
#[derive(Debug, Clone, Copy)]
pub struct StatusEvent<'a> {
    event: &'a Event,
    originator: &'a LocationId,
}

impl<'a> StatusEvent<'a> {
    pub fn event(&self) -> &'a Event {
        self.event
    }

    pub fn originator(&self) -> &'a LocationId {
        self.originator
    }
}

/// Command view of an event
#[derive(Debug, Clone, Copy)]
pub struct CommandEvent<'a> {
    event: &'a Event,
    originator: &'a LocationId,
    destination: &'a LocationId,
}

impl<'a> CommandEvent<'a> {
    pub fn event(&self) -> &'a Event {
        self.event
    }

    pub fn originator(&self) -> &'a LocationId {
        self.originator
    }

    pub fn destination(&self) -> &'a LocationId {
        self.destination
    }
}

/// Log view of an event
#[derive(Debug, Clone, Copy)]
pub struct LogEvent<'a> {
    event: &'a Event,
    originator: &'a LocationId,
}

impl<'a> LogEvent<'a> {
    pub fn event(&self) -> &'a Event {
        self.event
    }

    pub fn originator(&self) -> &'a LocationId {
        self.originator
    }

    pub fn logger(&self) -> Result<&'a str> {
        self.event.properties.get_string(names::LOGGER)
    }

    pub fn level(&self) -> Result<i64> {
        self.event.properties.get_int(names::LEVEL)
    }

    pub fn message(&self) -> Result<&'a str> {
        self.event.properties.get_string(names::MESSAGE)
    }

    pub fn location(&self) -> Result<&'a PropertySet> {
        self.event.properties.get_property_set(names::LOCATION)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    fn sorted(names: &[&str]) -> Vec<String> {
        let mut names: Vec<String> = names.iter().map(|n| (*n).to_owned()).collect();
        names.sort();
        names
    }

    #[test]
    fn test_empty_event_names() {
        let event = Event::new(PropertySet::new()).expect("event");
        assert_eq!(event.properties().name_count(), 5);
        assert_eq!(event.status(), "unknown");
        assert_eq!(event.topic(), "uninitialized");
        assert_eq!(event.pub_time(), 0);
        assert!(event.pub_date().is_none());
        assert!(event.run_id().is_none());
        assert!(event.custom_property_names().is_empty());
        assert_eq!(event.event_type(), EventType::Event);
        assert_eq!(
            event.properties().get_string(names::TYPE).expect("type"),
            "_E"
        );
    }

    #[test]
    fn test_caller_status_is_kept_and_runid_absent() {
        let mut ps = PropertySet::new();
        ps.set("myname", "myname");
        ps.set("STATUS", "my special status");
        let event = Event::new(ps).expect("event");

        assert_eq!(event.properties().name_count(), 6);
        assert!(!event.properties().exists("RUNID"));
        assert_eq!(event.status(), "my special status");
        assert_eq!(event.custom_property_names(), vec!["myname"]);
    }

    #[test]
    fn test_system_fields_overwrite_caller_values() {
        let mut ps = PropertySet::new();
        ps.set("TOPIC", "t");
        ps.set("PUBTIME", 99);
        ps.set("TYPE", "bogus");
        ps.set("RUNID", "stale");
        ps.set("value", 12);
        let event = Event::with_run_id("r1", ps).expect("event");

        assert_eq!(event.topic(), "uninitialized");
        assert_eq!(event.pub_time(), 0);
        assert_eq!(event.event_type(), EventType::Event);
        assert_eq!(event.run_id(), Some("r1"));
        assert_eq!(event.custom_property_names(), vec!["value"]);
    }

    #[test]
    fn test_filterable_names_with_extra_filter() {
        let mut filter = PropertySet::new();
        filter.set("FOO", "bar");
        filter.set("XYZZY", 3);
        let event = Event::builder(PropertySet::new())
            .run_id("run")
            .filter(filter)
            .build()
            .expect("event");

        assert_eq!(
            event.filterable_property_names(),
            sorted(&[
                "EVENTTIME", "PUBTIME", "RUNID", "STATUS", "TOPIC", "TYPE", "FOO", "XYZZY"
            ])
        );
        assert_eq!(event.properties().get_int("XYZZY").expect("filter value"), 3);
    }

    #[test]
    fn test_dotted_filter_name_fails_fast() {
        let mut filter = PropertySet::new();
        filter.set("a.b", 1);
        let err = Event::with_filter(PropertySet::new(), filter).expect_err("dotted name");
        assert!(matches!(err, EventError::Validation(_)));
    }

    #[test]
    fn test_check_filter_name() {
        assert!(check_filter_name("FOO", &Value::from(1)).is_valid());
        assert!(!check_filter_name("", &Value::from(1)).is_valid());
        assert!(!check_filter_name("RUNID", &Value::from("x")).is_valid());
        assert!(!check_filter_name("LIST", &Value::from(vec![1, 2])).is_valid());
        match check_filter_name("pipeline.stage", &Value::from(1)) {
            NameCheck::Invalid(reason) => assert!(reason.contains("pipeline.stage")),
            NameCheck::Valid => panic!("dotted name accepted"),
        }
    }

    #[test]
    fn test_non_string_status_rejected() {
        let mut ps = PropertySet::new();
        ps.set("STATUS", 5);
        assert!(matches!(Event::new(ps), Err(EventError::Validation(_))));
    }

    #[test]
    fn test_event_time_updates() {
        let mut event = Event::new(PropertySet::new()).expect("event");
        let first = event.event_time();
        assert!(first > 0);
        event.update_event_time();
        assert!(event.event_time() > first);
        event.set_event_time(0);
        assert_eq!(event.event_time(), 0);
        assert_eq!(event.event_date().timestamp(), 0);
    }

    #[test]
    fn test_clock_is_strictly_increasing() {
        let mut last = now_nanos();
        for _ in 0..1000 {
            let next = now_nanos();
            assert!(next > last);
            last = next;
        }
    }

    #[test]
    fn test_stamp_publication() {
        let mut event = Event::with_run_id("r", PropertySet::new()).expect("event");
        event.stamp_publication("alerts");
        assert_eq!(event.topic(), "alerts");
        assert!(event.pub_time() >= event.event_time());
        assert!(event.pub_date().is_some());
    }

    #[test]
    fn test_command_event() {
        let orig = LocationId::from_parts("h1", 1, 100, 0);
        let dest = LocationId::from_parts("h2", 2, 200, 1);
        let mut filter = PropertySet::new();
        filter.set("FOO", "bar");
        filter.set("BAR", 1);
        let event = Event::builder(PropertySet::new())
            .run_id("cmd")
            .filter(filter)
            .build_command(orig.clone(), dest.clone())
            .expect("command");

        let command = event.as_command().expect("narrow");
        assert_eq!(command.originator(), &orig);
        assert_eq!(command.destination(), &dest);
        assert_eq!(
            event.properties().get_int(names::DEST_LOCALID).expect("dest"),
            1
        );
        assert_eq!(
            event.filterable_property_names(),
            sorted(&[
                "BAR",
                "DEST_HOSTNAME",
                "DEST_IPID",
                "DEST_LOCALID",
                "DEST_PROCESSID",
                "EVENTTIME",
                "FOO",
                "ORIG_HOSTNAME",
                "ORIG_IPID",
                "ORIG_LOCALID",
                "ORIG_PROCESSID",
                "PUBTIME",
                "RUNID",
                "STATUS",
                "TOPIC",
                "TYPE",
            ])
        );
        assert!(event.custom_property_names().is_empty());
    }

    #[test]
    fn test_wrong_variant() {
        let event = Event::new(PropertySet::new()).expect("event");
        let err = event.as_command().expect_err("plain is not a command");
        assert!(matches!(
            err,
            EventError::WrongVariant {
                expected: "COMMAND",
                actual: "EVENT"
            }
        ));

        let status = Event::builder(PropertySet::new())
            .build_status(LocationId::from_parts("h", 0, 1, 2))
            .expect("status");
        assert!(status.as_status().is_ok());
        assert!(status.as_command().is_err());
        assert!(status.as_log().is_err());
    }

    #[test]
    fn test_log_event() {
        let record = LogRecord::new("pipeline.stage", 20000, "stage started").with_location(
            SourceLocation {
                filename: "stage.rs".to_owned(),
                line: 42,
                method: "run".to_owned(),
                class: String::new(),
            },
        );
        let event = Event::builder(PropertySet::new())
            .build_log(LocationId::from_parts("h", 0, 1, 2), &record)
            .expect("log");

        let log = event.as_log().expect("narrow");
        assert_eq!(log.logger().expect("logger"), "pipeline.stage");
        assert_eq!(log.level().expect("level"), 20000);
        assert_eq!(log.message().expect("message"), "stage started");
        assert_eq!(
            log.location()
                .expect("location")
                .get_string(names::FILENAME)
                .expect("filename"),
            "stage.rs"
        );
        assert!(event.as_status().is_ok());
        assert_eq!(
            event.custom_property_names(),
            vec!["TIMESTAMP", "THREADNAME"]
        );
    }

    #[test]
    fn test_type_tags() {
        for ty in [
            EventType::Event,
            EventType::Status,
            EventType::Command,
            EventType::Log,
        ] {
            assert_eq!(EventType::from_tag(ty.as_tag()), Some(ty));
        }
        assert_eq!(EventType::from_tag("EVENT"), None);
        assert_eq!(EventType::Command.to_string(), "COMMAND");
    }
}
