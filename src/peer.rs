//! Peer identity and bookkeeping records
//!
//! A peer is a remote endpoint identified by an opaque `NodeAddress`
//! (onion hostname or ip, plus port). `PeerRecord` is the unit of
//! bookkeeping shared between the reported set, the persisted set and
//! the live set: address, announced capability set, last-seen timestamp
//! and a failed-connection counter.
//!
//! Records referring to the same peer can disagree on capabilities and
//! timestamps (gossip is stale, direct observation is fresh), so
//! equality and hashing are **address-only**.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

/// Opaque network endpoint: onion hostname or IP, plus port.
///
/// Displayed and parsed as `host:port`. The host part is never
/// interpreted by this crate; the transport layer resolves it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl FromStr for NodeAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("invalid peer address (missing port): {}", s))?;
        if host.is_empty() {
            return Err(format!("invalid peer address (empty host): {}", s));
        }
        let port = port
            .parse::<u16>()
            .map_err(|_| format!("invalid peer address (bad port): {}", s))?;
        Ok(Self::new(host, port))
    }
}

/// Protocol feature announced by a peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    /// Understands reported-peer exchange messages
    PeerExchange,
    /// Relays flood-broadcast payloads for others
    MessageRelay,
    /// Keeps historical payloads past the live window
    Archival,
    /// Supports bloom-filtered payload requests
    BloomFilter,
}

/// Ordered set of capabilities with upgrade-only merge semantics.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities(BTreeSet<Capability>);

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_iter(caps: impl IntoIterator<Item = Capability>) -> Self {
        Self(caps.into_iter().collect())
    }

    pub fn contains(&self, cap: Capability) -> bool {
        self.0.contains(&cap)
    }

    pub fn insert(&mut self, cap: Capability) {
        self.0.insert(cap);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Merge announced capabilities into this set.
    ///
    /// Capability knowledge only ever widens: a peer announcing fewer
    /// features than we previously recorded does not shrink the record.
    pub fn merge_from(&mut self, other: &Capabilities) {
        for cap in &other.0 {
            self.0.insert(*cap);
        }
    }
}

/// One known peer: address, capability set, activity bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub address: NodeAddress,
    pub capabilities: Capabilities,
    /// Unix timestamp (seconds) of the last confirmed activity
    pub last_seen: u64,
    /// Consecutive failed connection attempts since the last success
    pub failed_attempts: u32,
}

impl PeerRecord {
    pub fn new(address: NodeAddress, now: u64) -> Self {
        Self {
            address,
            capabilities: Capabilities::new(),
            last_seen: now,
            failed_attempts: 0,
        }
    }

    pub fn with_capabilities(mut self, capabilities: Capabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// True if the record's last activity is further back than `max_age_secs`.
    pub fn is_older_than(&self, max_age_secs: u64, now: u64) -> bool {
        now.saturating_sub(self.last_seen) > max_age_secs
    }

    /// Record a failed connection attempt against this peer.
    pub fn record_failure(&mut self) {
        self.failed_attempts = self.failed_attempts.saturating_add(1);
    }

    /// Record a confirmed connection: refresh last_seen, forgive failures.
    pub fn record_success(&mut self, now: u64) {
        self.last_seen = now;
        self.failed_attempts = 0;
    }
}

// Identity is the address alone. Two records for the same address from
// different sources (gossip vs. direct connection) are the same peer.
impl PartialEq for PeerRecord {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for PeerRecord {}

impl Hash for PeerRecord {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address.hash(state);
    }
}

/// Current unix time in seconds.
pub(crate) fn unix_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

/// Current unix time in milliseconds.
pub(crate) fn unix_millis() -> u64 {
    chrono::Utc::now().timestamp_millis().max(0) as u64
}
