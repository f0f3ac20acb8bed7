//! Transport collaborator interfaces
//!
//! The connection/transport layer itself (socket plumbing, onion routing,
//! handshakes) lives outside this crate. What the maintenance layer needs
//! from it is small: snapshot queries over current connections, an async
//! send primitive with an explicit failure path, a disconnect primitive,
//! and serialized delivery of connect/disconnect events. Those contracts
//! are captured here as traits, with `Connection` as the shared per-link
//! bookkeeping object both sides read.
//!
//! Event delivery contract: the transport delivers `ConnectionListener`
//! callbacks one at a time, never concurrently, so listener state can be
//! mutated without further coordination.

use futures_util::future::BoxFuture;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::peer::{unix_millis, Capabilities, NodeAddress};

/// Rule violations tolerated on one connection before the transport is
/// expected to close it.
pub const RULE_VIOLATION_LIMIT: u32 = 3;

/// Classification of the remote end of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PeerKind {
    /// Plain gossip peer, cheapest to evict
    Peer,
    /// Well-known bootstrap node, exempt from normal eviction tiers
    SeedNode,
    /// Connection still performing its initial data exchange
    InitialDataExchange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Why a connection was (or is being) closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    /// Tiered eviction: too many connections open
    TooManyConnections,
    /// Peer broke a protocol rule
    RuleViolation,
    /// Peer is on the ban list
    PeerBanned,
    /// Inbound connection never resolved a peer address
    AnonymousTimeout,
    /// Remote side went away or the socket died
    TransportFailure,
    /// Local process teardown
    Shutdown,
}

impl CloseReason {
    /// Reasons that indicate misbehavior rather than plain churn.
    pub fn is_disciplinary(self) -> bool {
        matches!(self, CloseReason::RuleViolation | CloseReason::PeerBanned)
    }
}

/// Send failure surfaced by the transport. Consumed inside the broadcast
/// accounting; never propagated past the broadcaster boundary.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("connection to {0} is gone")]
    ConnectionGone(NodeAddress),
    #[error("send to {peer} failed: {detail}")]
    Io { peer: NodeAddress, detail: String },
    #[error("peer address not yet resolved")]
    Unresolved,
}

/// Shared per-link bookkeeping object.
///
/// Owned by the transport; the maintenance layer reads snapshots and
/// updates activity/violation counters. A very young inbound connection
/// may not have a resolved peer address yet ("anonymous"); housekeeping
/// force-closes those after a grace period.
pub struct Connection {
    id: u64,
    direction: Direction,
    created_at_millis: u64,
    peer_address: RwLock<Option<NodeAddress>>,
    kind: RwLock<PeerKind>,
    capabilities: RwLock<Capabilities>,
    last_activity_millis: AtomicU64,
    /// Separate clock for the initial-data-exchange eviction tier
    last_initial_data_millis: AtomicU64,
    rule_violations: AtomicU32,
}

impl Connection {
    pub fn new(id: u64, direction: Direction, peer_address: Option<NodeAddress>) -> Self {
        let now = unix_millis();
        Self {
            id,
            direction,
            created_at_millis: now,
            peer_address: RwLock::new(peer_address),
            kind: RwLock::new(PeerKind::Peer),
            capabilities: RwLock::new(Capabilities::new()),
            last_activity_millis: AtomicU64::new(now),
            last_initial_data_millis: AtomicU64::new(0),
            rule_violations: AtomicU32::new(0),
        }
    }

    #[cfg(test)]
    pub fn new_with_created_at(
        id: u64,
        direction: Direction,
        peer_address: Option<NodeAddress>,
        created_at_millis: u64,
    ) -> Self {
        let mut conn = Self::new(id, direction, peer_address);
        conn.created_at_millis = created_at_millis;
        conn
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn created_at_millis(&self) -> u64 {
        self.created_at_millis
    }

    /// None while an inbound connection has not completed address exchange.
    pub fn peer_address(&self) -> Option<NodeAddress> {
        self.peer_address.read().clone()
    }

    pub fn set_peer_address(&self, address: NodeAddress) {
        *self.peer_address.write() = Some(address);
    }

    pub fn kind(&self) -> PeerKind {
        *self.kind.read()
    }

    pub fn set_kind(&self, kind: PeerKind) {
        *self.kind.write() = kind;
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities.read().clone()
    }

    pub fn set_capabilities(&self, capabilities: Capabilities) {
        *self.capabilities.write() = capabilities;
    }

    pub fn last_activity_millis(&self) -> u64 {
        self.last_activity_millis.load(Ordering::Relaxed)
    }

    pub fn touch_activity(&self) {
        self.last_activity_millis
            .store(unix_millis(), Ordering::Relaxed);
    }

    #[cfg(test)]
    pub fn set_last_activity_millis(&self, millis: u64) {
        self.last_activity_millis.store(millis, Ordering::Relaxed);
    }

    pub fn last_initial_data_millis(&self) -> u64 {
        self.last_initial_data_millis.load(Ordering::Relaxed)
    }

    pub fn touch_initial_data(&self) {
        self.last_initial_data_millis
            .store(unix_millis(), Ordering::Relaxed);
    }

    #[cfg(test)]
    pub fn set_last_initial_data_millis(&self, millis: u64) {
        self.last_initial_data_millis
            .store(millis, Ordering::Relaxed);
    }

    /// Record a protocol rule violation by the remote peer.
    ///
    /// Returns true once the violation count crosses the limit, at which
    /// point the transport is expected to escalate to a disciplinary
    /// disconnect. The maintenance layer never throws for this.
    pub fn report_rule_violation(&self) -> bool {
        let count = self.rule_violations.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::warn!(
            conn_id = self.id,
            violations = count,
            "[TRANSPORT] Rule violation reported on connection"
        );
        count >= RULE_VIOLATION_LIMIT
    }

    pub fn rule_violations(&self) -> u32 {
        self.rule_violations.load(Ordering::Relaxed)
    }
}

/// Snapshot/send/disconnect primitives provided by the transport layer.
pub trait Transport: Send + Sync + 'static {
    /// Every open connection, including ones without a resolved address.
    fn all_connections(&self) -> Vec<Arc<Connection>>;

    /// Connections with a known peer address. Contract: every returned
    /// connection has `peer_address() == Some(..)`.
    fn confirmed_connections(&self) -> Vec<Arc<Connection>>;

    /// Fire-and-account send of one broadcast payload. The returned future
    /// resolves when the transport knows the send succeeded or failed.
    fn send(
        &self,
        connection: Arc<Connection>,
        message: crate::broadcast::BroadcastMessage,
    ) -> BoxFuture<'static, Result<(), SendError>>;

    /// Ask the transport to close a connection with the given reason.
    /// The matching `on_disconnect` event arrives via the listener path.
    fn disconnect(&self, connection: &Connection, reason: CloseReason);
}

/// Connection lifecycle events, delivered serially by the transport.
pub trait ConnectionListener: Send + Sync {
    fn on_connection(&self, connection: &Arc<Connection>);
    fn on_disconnect(&self, reason: CloseReason, connection: &Arc<Connection>);
}
