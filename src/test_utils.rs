//! Shared unit-test fixtures: scripted transport, canned environment

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::ban::BanRegistry;
use crate::broadcast::BroadcastMessage;
use crate::config::NetworkConfig;
use crate::peer::{NodeAddress, PeerRecord};
use crate::peer_manager::PeerManager;
use crate::peer_store::PeerStore;
use crate::transport::{CloseReason, Connection, Direction, SendError, Transport};

/// How the mock transport resolves send futures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendMode {
    Succeed,
    Fail,
    /// Never resolves; exercises timeout paths.
    Stall,
}

/// In-memory transport with scripted send behavior.
#[derive(Default)]
pub struct MockTransport {
    connections: Mutex<Vec<Arc<Connection>>>,
    disconnects: Mutex<Vec<(u64, CloseReason)>>,
    sent: Mutex<Vec<(u64, String)>>,
    default_mode: Mutex<Option<SendMode>>,
    mode_per_host: Mutex<HashMap<String, SendMode>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add(&self, connection: Arc<Connection>) {
        self.connections.lock().push(connection);
    }

    pub fn remove(&self, id: u64) {
        self.connections.lock().retain(|c| c.id() != id);
    }

    pub fn get(&self, id: u64) -> Arc<Connection> {
        self.connections
            .lock()
            .iter()
            .find(|c| c.id() == id)
            .cloned()
            .unwrap_or_else(|| panic!("no mock connection with id {}", id))
    }

    /// Disconnects requested by the code under test, in order.
    pub fn disconnects(&self) -> Vec<(u64, CloseReason)> {
        self.disconnects.lock().clone()
    }

    /// Successful sends as (connection id, message id) pairs.
    pub fn sent(&self) -> Vec<(u64, String)> {
        self.sent.lock().clone()
    }

    pub fn set_send_mode(&self, mode: SendMode) {
        *self.default_mode.lock() = Some(mode);
    }

    pub fn set_send_mode_for(&self, host: &str, mode: SendMode) {
        self.mode_per_host.lock().insert(host.to_string(), mode);
    }

    fn mode_for(&self, connection: &Connection) -> SendMode {
        if let Some(address) = connection.peer_address() {
            if let Some(mode) = self.mode_per_host.lock().get(&address.host) {
                return *mode;
            }
        }
        self.default_mode.lock().unwrap_or(SendMode::Succeed)
    }
}

impl Transport for MockTransport {
    fn all_connections(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().clone()
    }

    fn confirmed_connections(&self) -> Vec<Arc<Connection>> {
        self.connections
            .lock()
            .iter()
            .filter(|c| c.peer_address().is_some())
            .cloned()
            .collect()
    }

    fn send(
        &self,
        connection: Arc<Connection>,
        message: BroadcastMessage,
    ) -> BoxFuture<'static, Result<(), SendError>> {
        match self.mode_for(&connection) {
            SendMode::Succeed => {
                self.sent.lock().push((connection.id(), message.id.clone()));
                Box::pin(futures_util::future::ready(Ok(())))
            }
            SendMode::Fail => {
                let peer = connection
                    .peer_address()
                    .unwrap_or_else(|| NodeAddress::new("unknown", 0));
                Box::pin(futures_util::future::ready(Err(SendError::Io {
                    peer,
                    detail: "scripted failure".to_string(),
                })))
            }
            SendMode::Stall => Box::pin(futures_util::future::pending()),
        }
    }

    fn disconnect(&self, connection: &Connection, reason: CloseReason) {
        self.disconnects.lock().push((connection.id(), reason));
        self.remove(connection.id());
    }
}

/// Canned environment: mock transport, throwaway store, live manager.
pub struct TestEnv {
    pub transport: Arc<MockTransport>,
    pub manager: Arc<PeerManager>,
    pub bans: Arc<BanRegistry>,
    _db: sled::Db,
}

impl TestEnv {
    pub fn new(max_connections: usize) -> Self {
        Self::with_config(max_connections, "", "")
    }

    pub fn with_config(max_connections: usize, seed_nodes: &str, banned_peers: &str) -> Self {
        let config = NetworkConfig {
            max_connections,
            banned_peers: banned_peers.to_string(),
            seed_nodes: seed_nodes.to_string(),
        };
        config.validate().expect("test config must validate");

        let db = sled::Config::new()
            .temporary(true)
            .open()
            .expect("open temporary sled db");
        let store = Arc::new(PeerStore::open(&db).expect("open peer store"));
        let transport = MockTransport::new();
        let bans = Arc::new(BanRegistry::from_csv(banned_peers));
        let manager = PeerManager::new(transport.clone(), store, bans.clone(), &config);

        Self {
            transport,
            manager,
            bans,
            _db: db,
        }
    }
}

/// Outbound connection with a resolved `host:8000` address.
pub fn conn(id: u64, host: &str) -> Arc<Connection> {
    Arc::new(Connection::new(
        id,
        Direction::Outbound,
        Some(NodeAddress::new(host, 8000)),
    ))
}

/// Inbound connection with a resolved `host:8000` address.
pub fn inbound_conn(id: u64, host: &str) -> Arc<Connection> {
    Arc::new(Connection::new(
        id,
        Direction::Inbound,
        Some(NodeAddress::new(host, 8000)),
    ))
}

/// Record for `host:8000` last seen at the given unix second.
pub fn record_at(host: &str, last_seen: u64) -> PeerRecord {
    PeerRecord::new(NodeAddress::new(host, 8000), last_seen)
}
