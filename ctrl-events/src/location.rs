//! Process-unique location identifiers
//!
//! A [`LocationId`] names an event originator or destination by host, process
//! and a per-process sequence number. The sequence starts at 0 for the first
//! id created in a process. Ids from different processes may share a
//! `local_id` and are told apart by host and process id only.

use crate::error::{EventError, Result};
use crate::names;
use crate::property::PropertySet;
use crate::selector::Selector;
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs};
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

/// Identity of the local host, resolved once per process
#[derive(Debug, Clone, PartialEq, Eq)]
struct HostIdentity {
    hostname: String,
    ip_address: u32,
}

static HOST_IDENTITY: OnceLock<std::result::Result<HostIdentity, String>> = OnceLock::new();
static PROCESS_GENERATOR: LocationIdGenerator = LocationIdGenerator::new();

fn resolve_host_identity() -> std::result::Result<HostIdentity, String> {
    let hostname = sysinfo::System::host_name()
        .filter(|name| !name.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok().filter(|name| !name.is_empty()))
        .ok_or_else(|| "unable to determine local host name".to_owned())?;

    let ip_address = match (hostname.as_str(), 0).to_socket_addrs() {
        Ok(addrs) => addrs
            .filter_map(|addr| match addr.ip() {
                IpAddr::V4(v4) => Some(v4),
                IpAddr::V6(_) => None,
            })
            .next(),
        Err(e) => {
            warn!("Failed to resolve address of host {}: {}", hostname, e);
            None
        }
    };
    let ip_address = ip_address.unwrap_or_else(|| {
        warn!("No IPv4 address for host {}, using loopback", hostname);
        Ipv4Addr::LOCALHOST
    });

    debug!("Resolved local host identity: {} ({})", hostname, ip_address);
    Ok(HostIdentity {
        hostname,
        ip_address: u32::from(ip_address),
    })
}

fn host_identity() -> Result<&'static HostIdentity> {
    HOST_IDENTITY
        .get_or_init(resolve_host_identity)
        .as_ref()
        .map_err(|msg| EventError::configuration(msg.clone()))
}

/// Which side of an exchange a location id describes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Originator,
    Destination,
}

impl Role {
    fn hostname_key(self) -> &'static str {
        match self {
            Role::Originator => names::ORIG_HOSTNAME,
            Role::Destination => names::DEST_HOSTNAME,
        }
    }

    fn ip_key(self) -> &'static str {
        match self {
            Role::Originator => names::ORIG_IPID,
            Role::Destination => names::DEST_IPID,
        }
    }

    fn process_key(self) -> &'static str {
        match self {
            Role::Originator => names::ORIG_PROCESSID,
            Role::Destination => names::DEST_PROCESSID,
        }
    }

    fn local_key(self) -> &'static str {
        match self {
            Role::Originator => names::ORIG_LOCALID,
            Role::Destination => names::DEST_LOCALID,
        }
    }

    /// Property names written for this role, all of them filterable
    pub fn property_names(self) -> [&'static str; 4] {
        [
            self.hostname_key(),
            self.ip_key(),
            self.process_key(),
            self.local_key(),
        ]
    }
}

/// Host, process and sequence identifier of an event endpoint
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LocationId {
    hostname: String,
    ip_address: u32,
    process_id: u32,
    local_id: u32,
}

impl LocationId {
    /// Create the next location id of this process
    pub fn new() -> Result<Self> {
        PROCESS_GENERATOR.next()
    }

    /// Rebuild an id received from elsewhere; does not advance any counter
    pub fn from_parts(
        hostname: impl Into<String>,
        ip_address: u32,
        process_id: u32,
        local_id: u32,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            ip_address,
            process_id,
            local_id,
        }
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn ip_address(&self) -> u32 {
        self.ip_address
    }

    pub fn ip_addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ip_address)
    }

    pub fn process_id(&self) -> u32 {
        self.process_id
    }

    pub fn local_id(&self) -> u32 {
        self.local_id
    }

    /// Write this id into `ps` under the names for `role`
    pub fn write_properties(&self, role: Role, ps: &mut PropertySet) {
        ps.set(role.hostname_key(), self.hostname.as_str());
        ps.set(role.ip_key(), self.ip_address);
        ps.set(role.process_key(), self.process_id);
        ps.set(role.local_key(), self.local_id);
    }

    /// Read an id written by [`LocationId::write_properties`]
    pub fn read_properties(role: Role, ps: &PropertySet) -> Result<Self> {
        let number = |key: &str| -> Result<u32> {
            let raw = ps.get_int(key)?;
            u32::try_from(raw).map_err(|_| EventError::type_mismatch(key, "u32"))
        };
        // The IP id is optional on the wire
        let ip_address = if ps.exists(role.ip_key()) {
            number(role.ip_key())?
        } else {
            0
        };
        Ok(Self {
            hostname: ps.get_string(role.hostname_key())?.to_owned(),
            ip_address,
            process_id: number(role.process_key())?,
            local_id: number(role.local_key())?,
        })
    }

    /// Selector matching events addressed from (or to) exactly this id
    pub fn selector(&self, role: Role) -> Selector {
        Selector::new()
            .eq_str(role.hostname_key(), &self.hostname)
            .eq_int(role.process_key(), i64::from(self.process_id))
            .eq_int(role.local_key(), i64::from(self.local_id))
    }
}

impl std::fmt::Display for LocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.hostname, self.process_id, self.local_id
        )
    }
}

/// Source of sequential location ids sharing one atomic counter
#[derive(Debug)]
pub struct LocationIdGenerator {
    next_local_id: AtomicU32,
}

impl LocationIdGenerator {
    /// Create a generator whose first id has `local_id == 0`
    pub const fn new() -> Self {
        Self {
            next_local_id: AtomicU32::new(0),
        }
    }

    /// Allocate the next id
    pub fn next(&self) -> Result<LocationId> {
        let host = host_identity()?;
        let local_id = self.next_local_id.fetch_add(1, Ordering::SeqCst);
        Ok(LocationId {
            hostname: host.hostname.clone(),
            ip_address: host.ip_address,
            process_id: std::process::id(),
            local_id,
        })
    }
}

impl Default for LocationIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}
