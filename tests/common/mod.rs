//! In-memory transport for exercising the crate through its public API.
#![allow(dead_code)] // not every test binary uses every helper

use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;
use onionmesh::transport::SendError;
use onionmesh::{BroadcastMessage, CloseReason, Connection, Direction, NodeAddress, Transport};

/// Install the log capture once per test binary. Honors `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Records every send and disconnect; all sends succeed.
#[derive(Default)]
pub struct MemoryNet {
    connections: Mutex<Vec<Arc<Connection>>>,
    sent: Mutex<Vec<(u64, String)>>,
    disconnects: Mutex<Vec<(u64, CloseReason)>>,
}

impl MemoryNet {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connect_outbound(&self, id: u64, host: &str) -> Arc<Connection> {
        let conn = Arc::new(Connection::new(
            id,
            Direction::Outbound,
            Some(NodeAddress::new(host, 8000)),
        ));
        self.connections.lock().unwrap().push(conn.clone());
        conn
    }

    pub fn connect_inbound(&self, id: u64, host: &str) -> Arc<Connection> {
        let conn = Arc::new(Connection::new(
            id,
            Direction::Inbound,
            Some(NodeAddress::new(host, 8000)),
        ));
        self.connections.lock().unwrap().push(conn.clone());
        conn
    }

    pub fn drop_connection(&self, id: u64) {
        self.connections.lock().unwrap().retain(|c| c.id() != id);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.lock().unwrap().len()
    }

    pub fn sent(&self) -> Vec<(u64, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn disconnects(&self) -> Vec<(u64, CloseReason)> {
        self.disconnects.lock().unwrap().clone()
    }
}

impl Transport for MemoryNet {
    fn all_connections(&self) -> Vec<Arc<Connection>> {
        self.connections.lock().unwrap().clone()
    }

    fn confirmed_connections(&self) -> Vec<Arc<Connection>> {
        self.connections
            .lock()
            .unwrap()
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
        self.sent
            .lock()
            .unwrap()
            .push((connection.id(), message.id.clone()));
        Box::pin(futures_util::future::ready(Ok(())))
    }

    fn disconnect(&self, connection: &Connection, reason: CloseReason) {
        self.disconnects
            .lock()
            .unwrap()
            .push((connection.id(), reason));
        self.drop_connection(connection.id());
    }
}
