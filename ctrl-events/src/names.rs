//! Reserved property names and well-known constants shared on the wire

/// Event variant tag
pub const TYPE: &str = "TYPE";
/// Creation time in nanoseconds since the Unix epoch
pub const EVENTTIME: &str = "EVENTTIME";
/// Publication time in nanoseconds; 0 until published
pub const PUBTIME: &str = "PUBTIME";
/// Optional run correlation id
pub const RUNID: &str = "RUNID";
pub const STATUS: &str = "STATUS";
/// Destination name stamped by the transmitter
pub const TOPIC: &str = "TOPIC";
/// Destination name header set on queue deliveries
pub const QUEUE: &str = "QUEUE";

/// System fields present on every event, in sorted order
pub const SYSTEM_NAMES: [&str; 6] = [EVENTTIME, PUBTIME, RUNID, STATUS, TOPIC, TYPE];

pub const ORIG_HOSTNAME: &str = "ORIG_HOSTNAME";
pub const ORIG_IPID: &str = "ORIG_IPID";
pub const ORIG_PROCESSID: &str = "ORIG_PROCESSID";
pub const ORIG_LOCALID: &str = "ORIG_LOCALID";

pub const DEST_HOSTNAME: &str = "DEST_HOSTNAME";
pub const DEST_IPID: &str = "DEST_IPID";
pub const DEST_PROCESSID: &str = "DEST_PROCESSID";
pub const DEST_LOCALID: &str = "DEST_LOCALID";

pub const LOGGER: &str = "LOGGER";
pub const LEVEL: &str = "LEVEL";
pub const MESSAGE: &str = "MESSAGE";
pub const LOCATION: &str = "LOCATION";
pub const TIMESTAMP: &str = "TIMESTAMP";
pub const THREADNAME: &str = "THREADNAME";

// Fields of the nested LOCATION set
pub const FILENAME: &str = "FILENAME";
pub const LINENUMBER: &str = "LINENUMBER";
pub const METHODNAME: &str = "METHODNAME";
pub const CLASSNAME: &str = "CLASSNAME";

/// Value of TOPIC before an event has been published
pub const UNINITIALIZED: &str = "uninitialized";
/// Default value of STATUS
pub const UNKNOWN_STATUS: &str = "unknown";

/// Well-known destination for log events
pub const LOGGING_TOPIC: &str = "logging";

/// Default broker port
pub const DEFAULT_BROKER_PORT: u16 = 61616;

/// Whether `name` is one of the fields every event carries
pub fn is_system_name(name: &str) -> bool {
    SYSTEM_NAMES.contains(&name)
}
