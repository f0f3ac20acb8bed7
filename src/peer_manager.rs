//! Peer lifecycle coordinator: bookkeeping, housekeeping, tiered eviction
//!
//! Tracks three overlapping views of the network:
//! - **reported** peers: learned from other peers' gossip, least trusted,
//!   capped at [`MAX_REPORTED_PEERS`] with random purge on overflow
//! - **persisted** peers: mirror of the durable store, capped at
//!   [`MAX_PERSISTED_PEERS`], age-pruned before random purge
//! - **live** peers: confirmed connected within the last 30 minutes,
//!   smoothed across brief disconnects
//!
//! Housekeeping runs at most once per debounce window after a connection
//! event: anonymous inbound connections past their grace period are
//! force-closed, aged records pruned, and the tiered connection-count
//! policy enforced. Eviction escalates through four candidate tiers so it
//! never stalls, but only touches more valuable connections (seeds,
//! handshaking peers) once the cheaper tiers are exhausted *and* the next
//! threshold is crossed.

use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use rand::seq::IteratorRandom;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::ban::BanRegistry;
use crate::config::{ConnectionLimits, NetworkConfig};
use crate::peer::{unix_millis, unix_secs, Capabilities, NodeAddress, PeerRecord};
use crate::peer_store::PeerStore;
use crate::transport::{
    CloseReason, Connection, ConnectionListener, Direction, PeerKind, Transport,
};

/// Cap on gossip-learned peers held in memory.
pub const MAX_REPORTED_PEERS: usize = 1000;

/// Cap on peers mirrored to durable storage.
pub const MAX_PERSISTED_PEERS: usize = 500;

/// Records older than this are pruned (reported and persisted sets).
pub const MAX_AGE_SECS: u64 = 14 * 24 * 60 * 60;

/// Window within which a peer counts as "live".
pub const MAX_AGE_LIVE_PEERS_SECS: u64 = 30 * 60;

/// Failed connection attempts tolerated before a persisted peer is dropped.
pub const MAX_FAILED_CONNECTION_ATTEMPTS: u32 = 5;

/// Delay between a connection event and the housekeeping pass it triggers.
/// Further events inside the window piggyback on the outstanding timer.
pub const HOUSEKEEPING_DEBOUNCE: Duration = Duration::from_secs(10);

/// Grace period before an inbound connection with no resolved peer
/// address is treated as dead and force-closed.
pub const ANONYMOUS_PEER_GRACE: Duration = Duration::from_secs(240);

/// Delay before re-checking connection counts after an eviction, letting
/// the disconnect settle before deciding whether another one is needed.
pub const EVICTION_RECHECK_DELAY: Duration = Duration::from_millis(100);

/// Tick interval of the standby detector.
pub const STANDBY_TICK: Duration = Duration::from_secs(10);

/// Wall-clock gap over one tick that indicates the host was suspended.
pub const STANDBY_GAP: Duration = Duration::from_secs(30);

/// Notifications about network-wide connectivity transitions.
///
/// Implementations are swappable strategies registered at runtime; every
/// method has a no-op default so listeners override only what they need.
pub trait PeerManagerListener: Send + Sync {
    fn on_all_connections_lost(&self) {}
    fn on_new_connection_after_all_connections_lost(&self) {}
    fn on_awake_from_standby(&self) {}
}

/// Lightweight snapshot of connection and bookkeeping counts.
#[derive(Debug, Clone, Default)]
pub struct ConnectionStats {
    pub total: usize,
    pub inbound: usize,
    pub outbound: usize,
    pub seed_nodes: usize,
    pub initial_data_exchange: usize,
    pub reported_peers: usize,
    pub persisted_peers: usize,
}

pub struct PeerManager {
    transport: Arc<dyn Transport>,
    store: Arc<PeerStore>,
    bans: Arc<BanRegistry>,
    limits: ConnectionLimits,

    own_address: RwLock<Option<NodeAddress>>,
    seed_addresses: RwLock<HashSet<NodeAddress>>,
    reported: RwLock<HashSet<PeerRecord>>,
    persisted: RwLock<HashSet<PeerRecord>>,
    live: RwLock<HashSet<PeerRecord>>,

    stopped: AtomicBool,
    lost_all_connections: AtomicBool,
    num_all_connections_lost: AtomicU32,
    housekeeping_pending: AtomicBool,

    listeners: RwLock<Vec<Arc<dyn PeerManagerListener>>>,
    self_ref: OnceCell<Weak<PeerManager>>,
}

impl PeerManager {
    pub fn new(
        transport: Arc<dyn Transport>,
        store: Arc<PeerStore>,
        bans: Arc<BanRegistry>,
        config: &NetworkConfig,
    ) -> Arc<Self> {
        let now = unix_secs();
        let persisted: HashSet<PeerRecord> = store
            .load_all()
            .into_iter()
            .filter(|p| !p.is_older_than(MAX_AGE_SECS, now))
            .collect();

        let seed_addresses: HashSet<NodeAddress> = config.seed_addresses().into_iter().collect();

        info!(
            "[PEER MANAGER] Initialized: {} persisted peers, {} seed nodes, limits {:?}",
            persisted.len(),
            seed_addresses.len(),
            config.limits()
        );

        let manager = Arc::new(Self {
            transport,
            store,
            bans,
            limits: config.limits(),
            own_address: RwLock::new(None),
            seed_addresses: RwLock::new(seed_addresses),
            reported: RwLock::new(HashSet::new()),
            persisted: RwLock::new(persisted),
            live: RwLock::new(HashSet::new()),
            stopped: AtomicBool::new(false),
            lost_all_connections: AtomicBool::new(false),
            num_all_connections_lost: AtomicU32::new(0),
            housekeeping_pending: AtomicBool::new(false),
            listeners: RwLock::new(Vec::new()),
            self_ref: OnceCell::new(),
        });
        let _ = manager.self_ref.set(Arc::downgrade(&manager));
        manager
    }

    /// Our own advertised address, used to filter self out of gossip.
    pub fn set_own_address(&self, address: NodeAddress) {
        *self.own_address.write() = Some(address);
    }

    pub fn add_listener(&self, listener: Arc<dyn PeerManagerListener>) {
        self.listeners.write().push(listener);
    }

    pub fn limits(&self) -> ConnectionLimits {
        self.limits
    }

    pub fn is_seed_node(&self, address: &NodeAddress) -> bool {
        self.seed_addresses.read().contains(address)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Relaxed)
    }

    /// Times the node transitioned from "some connections" to "none".
    pub fn num_all_connections_lost(&self) -> u32 {
        self.num_all_connections_lost.load(Ordering::Relaxed)
    }

    fn arc(&self) -> Option<Arc<Self>> {
        self.self_ref.get().and_then(Weak::upgrade)
    }

    fn notify_listeners(&self, f: impl Fn(&dyn PeerManagerListener)) {
        let listeners: Vec<_> = self.listeners.read().clone();
        for listener in listeners {
            f(listener.as_ref());
        }
    }

    // ------------------------------------------------------------------
    // Connection lifecycle (delivered serially by the transport)
    // ------------------------------------------------------------------

    /// Hook for a new connection: mark seed nodes, refresh bookkeeping,
    /// schedule debounced housekeeping, and fire the recovered-from-zero
    /// notification when this is the first connection after losing all.
    pub fn on_connection_event(&self, connection: &Arc<Connection>) {
        if let Some(address) = connection.peer_address() {
            if self.is_seed_node(&address) {
                connection.set_kind(PeerKind::SeedNode);
                debug!("[PEER MANAGER] Connection to seed node {}", address);
            }
            self.record_connect_success(&address);
        }

        self.stopped.store(false, Ordering::Relaxed);

        if self.lost_all_connections.swap(false, Ordering::Relaxed) {
            info!("[PEER MANAGER] First connection after losing all connections");
            self.notify_listeners(|l| l.on_new_connection_after_all_connections_lost());
        }

        self.schedule_housekeeping();
    }

    /// Hook for a closed connection: record the fault, purge banned peers,
    /// and detect the all-connections-lost transition exactly once.
    pub fn on_disconnect_event(&self, reason: CloseReason, connection: &Arc<Connection>) {
        debug!(
            conn_id = connection.id(),
            ?reason,
            "[PEER MANAGER] Connection closed"
        );

        if let Some(address) = connection.peer_address() {
            self.handle_connection_fault(&address, reason);

            if reason == CloseReason::PeerBanned {
                self.purge_banned_peer(&address);
            }
        }

        if self.transport.all_connections().is_empty()
            && !self.lost_all_connections.swap(true, Ordering::Relaxed)
        {
            self.stopped.store(true, Ordering::Relaxed);
            self.num_all_connections_lost.fetch_add(1, Ordering::Relaxed);
            warn!("[PEER MANAGER] All connections lost");
            self.notify_listeners(|l| l.on_all_connections_lost());
        }
    }

    /// Refresh bookkeeping for a peer we just confirmed a connection to.
    fn record_connect_success(&self, address: &NodeAddress) {
        let now = unix_secs();
        let probe = PeerRecord::new(address.clone(), 0);

        {
            let mut reported = self.reported.write();
            if let Some(mut record) = reported.take(&probe) {
                record.record_success(now);
                reported.insert(record);
            }
        }

        let touched = {
            let mut persisted = self.persisted.write();
            match persisted.take(&probe) {
                Some(mut record) => {
                    record.record_success(now);
                    persisted.insert(record);
                    true
                }
                None => false,
            }
        };
        if touched {
            self.request_persistence();
        }
    }

    /// Record a connection fault against a peer address.
    ///
    /// Reported data is least trusted, so the peer is dropped from the
    /// reported set outright. A persisted peer accumulates a failure; it
    /// is permanently removed once it crosses
    /// [`MAX_FAILED_CONNECTION_ATTEMPTS`] or when the close was
    /// disciplinary. Otherwise aged persisted entries are pruned lazily.
    pub fn handle_connection_fault(&self, address: &NodeAddress, reason: CloseReason) {
        let probe = PeerRecord::new(address.clone(), 0);
        self.reported.write().remove(&probe);

        let mut changed = false;
        {
            let mut persisted = self.persisted.write();
            if let Some(mut record) = persisted.take(&probe) {
                record.record_failure();
                let too_many_failures = record.failed_attempts >= MAX_FAILED_CONNECTION_ATTEMPTS;

                if too_many_failures || reason == CloseReason::RuleViolation {
                    info!(
                        "[PEER MANAGER] Dropping persisted peer {} (failures={}, reason={:?})",
                        address, record.failed_attempts, reason
                    );
                    changed = true;
                } else {
                    persisted.insert(record);
                    changed = true;
                    let now = unix_secs();
                    let before = persisted.len();
                    persisted.retain(|p| !p.is_older_than(MAX_AGE_SECS, now));
                    if persisted.len() != before {
                        debug!(
                            "[PEER MANAGER] Lazily pruned {} aged persisted peers",
                            before - persisted.len()
                        );
                    }
                }
            }
        }
        if changed {
            self.request_persistence();
        }
    }

    /// Remove a banned peer from every place we might reconnect from.
    fn purge_banned_peer(&self, address: &NodeAddress) {
        let probe = PeerRecord::new(address.clone(), 0);
        self.seed_addresses.write().remove(address);
        self.reported.write().remove(&probe);
        if self.persisted.write().remove(&probe) {
            self.request_persistence();
        }
        info!("[PEER MANAGER] Purged banned peer {}", address);
    }

    // ------------------------------------------------------------------
    // Housekeeping
    // ------------------------------------------------------------------

    /// Arm the debounced housekeeping timer. Only the first call within a
    /// window spawns a timer; later calls are absorbed by it.
    fn schedule_housekeeping(&self) {
        if self.housekeeping_pending.swap(true, Ordering::Relaxed) {
            return;
        }
        let Some(manager) = self.arc() else { return };
        tokio::spawn(async move {
            tokio::time::sleep(HOUSEKEEPING_DEBOUNCE).await;
            manager.housekeeping_pending.store(false, Ordering::Relaxed);
            manager.run_housekeeping();
        });
    }

    /// One housekeeping pass: close anonymous stragglers, prune aged
    /// records, enforce connection-count tiers.
    pub fn run_housekeeping(&self) {
        self.remove_anonymous_peers();
        self.prune_reported_peers();
        self.prune_persisted_peers();
        self.check_max_connections();
    }

    /// Inbound connections that never resolved a peer address within the
    /// grace period are treated as dead and force-closed.
    fn remove_anonymous_peers(&self) {
        let now = unix_millis();
        for connection in self.transport.all_connections() {
            if connection.direction() == Direction::Inbound
                && connection.peer_address().is_none()
                && now.saturating_sub(connection.created_at_millis())
                    > ANONYMOUS_PEER_GRACE.as_millis() as u64
            {
                info!(
                    conn_id = connection.id(),
                    "[PEER MANAGER] Closing anonymous inbound connection past grace period"
                );
                self.transport
                    .disconnect(&connection, CloseReason::AnonymousTimeout);
            }
        }
    }

    fn prune_reported_peers(&self) {
        let now = unix_secs();
        let mut reported = self.reported.write();
        let before = reported.len();
        reported.retain(|p| !p.is_older_than(MAX_AGE_SECS, now));
        if reported.len() != before {
            debug!(
                "[PEER MANAGER] Pruned {} aged reported peers",
                before - reported.len()
            );
        }
    }

    fn prune_persisted_peers(&self) {
        let now = unix_secs();
        let changed = {
            let mut persisted = self.persisted.write();
            let before = persisted.len();
            persisted.retain(|p| !p.is_older_than(MAX_AGE_SECS, now));
            before != persisted.len()
        };
        if changed {
            self.request_persistence();
        }
    }

    // ------------------------------------------------------------------
    // Tiered eviction
    // ------------------------------------------------------------------

    /// Enforce the connection-count policy. Evicts at most one connection
    /// per pass (the oldest-idle candidate of the first non-empty tier),
    /// then re-checks after a short delay since one eviction may not be
    /// enough. Returns whether an eviction occurred.
    pub fn check_max_connections(&self) -> bool {
        let all = self.transport.all_connections();
        let size = all.len();

        if size <= self.limits.max_connections {
            debug!(
                size,
                max = self.limits.max_connections,
                "[PEER MANAGER] Connection count within limit, nothing to do"
            );
            return false;
        }

        let Some(victim) = self.select_eviction_candidate(&all) else {
            return false;
        };

        info!(
            conn_id = victim.id(),
            peer = %victim
                .peer_address()
                .map(|a| a.to_string())
                .unwrap_or_else(|| "<unresolved>".to_string()),
            size,
            "[PEER MANAGER] Too many connections open, evicting oldest-idle candidate"
        );
        self.transport
            .disconnect(&victim, CloseReason::TooManyConnections);
        self.schedule_eviction_recheck();
        true
    }

    /// Staged candidate selection. Each tier only fires once the *next*
    /// threshold is exceeded; the final tier considers every connection,
    /// so a candidate always exists when the absolute cap is breached.
    fn select_eviction_candidate(&self, all: &[Arc<Connection>]) -> Option<Arc<Connection>> {
        let size = all.len();

        // Tier 1: inbound plain peers, cheapest to lose.
        let candidates: Vec<_> = all
            .iter()
            .filter(|c| c.direction() == Direction::Inbound && c.kind() == PeerKind::Peer)
            .cloned()
            .collect();
        if let Some(victim) = oldest_by_activity(candidates) {
            return Some(victim);
        }
        if size <= self.limits.outbound_peer_trigger {
            return None;
        }

        // Tier 2: any plain peer, inbound or outbound.
        let candidates: Vec<_> = all
            .iter()
            .filter(|c| c.kind() == PeerKind::Peer)
            .cloned()
            .collect();
        if let Some(victim) = oldest_by_activity(candidates) {
            return Some(victim);
        }
        if size <= self.limits.initial_data_exchange_trigger {
            return None;
        }

        // Tier 3: handshaking connections, ranked by their own message
        // clock rather than the general activity timestamp.
        let victim = all
            .iter()
            .filter(|c| c.kind() == PeerKind::InitialDataExchange)
            .min_by_key(|c| c.last_initial_data_millis())
            .cloned();
        if victim.is_some() {
            return victim;
        }
        if size <= self.limits.max_connections_absolute {
            return None;
        }

        // Tier 4: last resort, any connection at all.
        oldest_by_activity(all.to_vec())
    }

    /// Closing a connection may or may not be enough; re-check shortly
    /// after the disconnect has settled.
    fn schedule_eviction_recheck(&self) {
        let Some(manager) = self.arc() else { return };
        tokio::spawn(async move {
            tokio::time::sleep(EVICTION_RECHECK_DELAY).await;
            if !manager.is_stopped() {
                manager.check_max_connections();
            }
        });
    }

    // ------------------------------------------------------------------
    // Reported-peer ingestion (gossip)
    // ------------------------------------------------------------------

    /// Ingest a reported-peers batch received from `sender`.
    ///
    /// The sender's announced capabilities are merged (upgrade-only) into
    /// its existing records first. A batch larger than any legitimate
    /// node could need to send is a protocol-rule violation: the whole
    /// batch is discarded and the violation reported to the connection.
    /// Returns whether the batch was accepted.
    pub fn add_to_reported_peers(
        &self,
        batch: Vec<PeerRecord>,
        sender: &Arc<Connection>,
    ) -> bool {
        if let Some(sender_address) = sender.peer_address() {
            self.merge_announced_capabilities(&sender_address, &sender.capabilities());
        }

        let own = self.own_address.read().clone();
        let batch_size = batch.len();

        let max_batch = MAX_REPORTED_PEERS + self.limits.max_connections_absolute + 10;
        if batch_size > max_batch {
            warn!(
                batch_size,
                max_batch, "[PEER MANAGER] Oversized reported-peers batch, discarding whole batch"
            );
            if sender.report_rule_violation() {
                self.transport
                    .disconnect(sender, CloseReason::RuleViolation);
            }
            return false;
        }

        let accepted: Vec<PeerRecord> = batch
            .into_iter()
            .filter(|p| own.as_ref() != Some(&p.address))
            .filter(|p| !self.bans.is_banned(&p.address))
            .collect();

        {
            let mut reported = self.reported.write();
            for record in &accepted {
                reported.insert(record.clone());
            }
            purge_random_excess(&mut reported, MAX_REPORTED_PEERS, "reported");
        }

        {
            let mut persisted = self.persisted.write();
            for record in &accepted {
                persisted.insert(record.clone());
            }
            if persisted.len() > MAX_PERSISTED_PEERS {
                // Age out stale entries before resorting to random eviction.
                let now = unix_secs();
                persisted.retain(|p| !p.is_older_than(MAX_AGE_SECS, now));
                purge_random_excess(&mut persisted, MAX_PERSISTED_PEERS, "persisted");
            }
        }
        self.request_persistence();

        debug!(
            accepted = accepted.len(),
            batch_size, "[PEER MANAGER] Ingested reported peers"
        );
        true
    }

    /// Merge a live connection's capability announcement into our records
    /// for its address. Capability knowledge only ever widens.
    fn merge_announced_capabilities(&self, address: &NodeAddress, announced: &Capabilities) {
        if announced.is_empty() {
            return;
        }
        let probe = PeerRecord::new(address.clone(), 0);

        let mut reported = self.reported.write();
        if let Some(mut record) = reported.take(&probe) {
            record.capabilities.merge_from(announced);
            reported.insert(record);
        }
        drop(reported);

        let mut persisted = self.persisted.write();
        if let Some(mut record) = persisted.take(&probe) {
            record.capabilities.merge_from(announced);
            persisted.insert(record);
        }
    }

    // ------------------------------------------------------------------
    // Live peers and capability lookup
    // ------------------------------------------------------------------

    /// Peers confirmed active within the live window, merged with the
    /// previous snapshot so a momentary full-network disconnect does not
    /// wipe the list. Seed nodes and `exclude` (a requesting peer should
    /// not get its own address back) are left out.
    pub fn get_live_peers(&self, exclude: Option<&NodeAddress>) -> Vec<PeerRecord> {
        let now = unix_secs();

        let mut merged: HashSet<PeerRecord> = HashSet::new();
        for connection in self.transport.confirmed_connections() {
            let Some(address) = connection.peer_address() else {
                // Contract breach: confirmed connections must carry an address.
                debug_assert!(false, "confirmed connection without peer address");
                tracing::error!(
                    conn_id = connection.id(),
                    "[PEER MANAGER] Confirmed connection without peer address"
                );
                continue;
            };
            if connection.kind() == PeerKind::SeedNode {
                continue;
            }
            if Some(&address) == exclude {
                continue;
            }
            let record = PeerRecord {
                address,
                capabilities: connection.capabilities(),
                last_seen: connection.last_activity_millis() / 1000,
                failed_attempts: 0,
            };
            merged.insert(record);
        }

        // Previous snapshot fills in peers that briefly dropped off.
        for record in self.live.read().iter() {
            if Some(&record.address) != exclude {
                merged.insert(record.clone());
            }
        }

        merged.retain(|p| !p.is_older_than(MAX_AGE_LIVE_PEERS_SECS, now));

        *self.live.write() = merged.clone();
        merged.into_iter().collect()
    }

    /// Capabilities for a peer address: a live connection's self-reported
    /// set is first-party and wins; gossip-derived records are the stale,
    /// less trustworthy fallback and self-correct once we connect.
    pub fn find_peers_capabilities(&self, address: &NodeAddress) -> Option<Capabilities> {
        for connection in self.transport.confirmed_connections() {
            if connection.peer_address().as_ref() == Some(address) {
                let caps = connection.capabilities();
                if !caps.is_empty() {
                    return Some(caps);
                }
            }
        }

        let probe = PeerRecord::new(address.clone(), 0);
        if let Some(record) = self.reported.read().get(&probe) {
            if !record.capabilities.is_empty() {
                return Some(record.capabilities.clone());
            }
        }
        self.persisted
            .read()
            .get(&probe)
            .map(|r| r.capabilities.clone())
            .filter(|c| !c.is_empty())
    }

    // ------------------------------------------------------------------
    // Stats, persistence, background workers
    // ------------------------------------------------------------------

    pub fn connection_stats(&self) -> ConnectionStats {
        let all = self.transport.all_connections();
        let mut stats = ConnectionStats {
            total: all.len(),
            reported_peers: self.reported.read().len(),
            persisted_peers: self.persisted.read().len(),
            ..Default::default()
        };
        for connection in &all {
            match connection.direction() {
                Direction::Inbound => stats.inbound += 1,
                Direction::Outbound => stats.outbound += 1,
            }
            match connection.kind() {
                PeerKind::SeedNode => stats.seed_nodes += 1,
                PeerKind::InitialDataExchange => stats.initial_data_exchange += 1,
                PeerKind::Peer => {}
            }
        }
        stats
    }

    fn request_persistence(&self) {
        let snapshot: Vec<PeerRecord> = self.persisted.read().iter().cloned().collect();
        self.store.request_flush(snapshot);
    }

    /// Flush pending peer state and stop initiating new maintenance.
    pub fn shut_down(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        self.request_persistence();
        if let Err(e) = self.store.flush_now() {
            warn!("[PEER MANAGER] Final peer store flush failed: {}", e);
        }
    }

    /// Detect host standby: if one tick of wall-clock time stretches far
    /// past the sleep interval, the machine was suspended and listeners
    /// get a chance to re-validate their connections.
    pub fn spawn_standby_detector(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let before = std::time::Instant::now();
                tokio::time::sleep(STANDBY_TICK).await;
                if standby_gap_exceeded(STANDBY_TICK, before.elapsed()) {
                    info!(
                        slept_for = ?before.elapsed(),
                        "[PEER MANAGER] Awake from standby"
                    );
                    manager.notify_listeners(|l| l.on_awake_from_standby());
                }
            }
        })
    }

    // Test-only accessors for the internal sets.
    #[cfg(test)]
    pub(crate) fn reported_snapshot(&self) -> HashSet<PeerRecord> {
        self.reported.read().clone()
    }

    #[cfg(test)]
    pub(crate) fn persisted_snapshot(&self) -> HashSet<PeerRecord> {
        self.persisted.read().clone()
    }

    #[cfg(test)]
    pub(crate) fn insert_reported(&self, record: PeerRecord) {
        self.reported.write().insert(record);
    }

    #[cfg(test)]
    pub(crate) fn insert_persisted(&self, record: PeerRecord) {
        self.persisted.write().insert(record);
    }

    #[cfg(test)]
    pub(crate) fn insert_live(&self, record: PeerRecord) {
        self.live.write().insert(record);
    }
}

impl ConnectionListener for PeerManager {
    fn on_connection(&self, connection: &Arc<Connection>) {
        self.on_connection_event(connection);
    }

    fn on_disconnect(&self, reason: CloseReason, connection: &Arc<Connection>) {
        self.on_disconnect_event(reason, connection);
    }
}

/// True when actual elapsed wall time for one tick indicates suspension.
fn standby_gap_exceeded(expected: Duration, actual: Duration) -> bool {
    actual > expected + STANDBY_GAP
}

/// Oldest-idle candidate: minimum last-activity timestamp.
fn oldest_by_activity(candidates: Vec<Arc<Connection>>) -> Option<Arc<Connection>> {
    candidates
        .into_iter()
        .min_by_key(|c| c.last_activity_millis())
}

/// Randomly drop entries until the set fits its cap. Random (rather than
/// age-ordered) eviction denies attackers a predictable eviction order.
fn purge_random_excess(set: &mut HashSet<PeerRecord>, cap: usize, label: &str) {
    if set.len() <= cap {
        return;
    }
    let excess = set.len() - cap;
    let mut rng = rand::thread_rng();
    let victims: Vec<PeerRecord> = set.iter().cloned().choose_multiple(&mut rng, excess);
    for victim in &victims {
        set.remove(victim);
    }
    warn!(
        "[PEER MANAGER] Purged {} random {} peers over cap {}",
        excess, label, cap
    );
}
