//! Durable peer collection surviving restarts
//!
//! Backed by a sled tree of bincode-encoded `PeerRecord`s keyed by peer
//! address. The in-memory persisted set owned by `PeerManager` is the
//! source of truth; this store is its mirror on disk. Mutations request a
//! flush instead of writing synchronously: the flush worker coalesces
//! bursts of changes and writes the whole snapshot once the debounce
//! window passes. `flush_now` exists for orderly shutdown.

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::peer::PeerRecord;

/// Debounce window between a mutation and the disk write.
pub const FLUSH_DEBOUNCE: Duration = Duration::from_secs(1);

const TREE_NAME: &str = "peer_records";

pub struct PeerStore {
    tree: sled::Tree,
    pending: Mutex<Option<Vec<PeerRecord>>>,
    dirty: Notify,
}

impl PeerStore {
    /// Open (or create) the peer records tree inside an existing sled db.
    pub fn open(db: &sled::Db) -> Result<Self> {
        let tree = db.open_tree(TREE_NAME)?;
        info!(
            "[PEER BOOK] Opened peer record store ({} entries)",
            tree.len()
        );
        Ok(Self {
            tree,
            pending: Mutex::new(None),
            dirty: Notify::new(),
        })
    }

    /// Load every persisted record. Entries that fail to decode (written
    /// by an older build) are skipped, not fatal.
    pub fn load_all(&self) -> Vec<PeerRecord> {
        let mut records = Vec::new();
        for entry in self.tree.iter() {
            let (key, value) = match entry {
                Ok(kv) => kv,
                Err(e) => {
                    warn!("[PEER BOOK] Iteration error while loading: {}", e);
                    break;
                }
            };
            match bincode::deserialize::<PeerRecord>(&value) {
                Ok(record) => records.push(record),
                Err(e) => {
                    debug!(
                        "[PEER BOOK] Skipping undecodable record {}: {}",
                        String::from_utf8_lossy(&key),
                        e
                    );
                }
            }
        }
        if !records.is_empty() {
            info!("[PEER BOOK] Loaded {} persisted peers", records.len());
        }
        records
    }

    /// Queue a snapshot for the debounced flush worker. The latest
    /// snapshot wins; intermediate ones are dropped unwritten.
    pub fn request_flush(&self, snapshot: Vec<PeerRecord>) {
        *self.pending.lock() = Some(snapshot);
        self.dirty.notify_one();
    }

    /// Write the most recent pending snapshot (or nothing) immediately.
    /// Used at shutdown so the debounce window cannot eat the final state.
    pub fn flush_now(&self) -> Result<usize> {
        let snapshot = self.pending.lock().take();
        match snapshot {
            Some(records) => self.write_all(&records),
            None => Ok(0),
        }
    }

    fn write_all(&self, records: &[PeerRecord]) -> Result<usize> {
        self.tree.clear()?;
        for record in records {
            let key = record.address.to_string();
            let value = bincode::serialize(record)?;
            self.tree.insert(key.as_bytes(), value)?;
        }
        self.tree.flush()?;
        debug!("[PEER BOOK] Flushed {} peer records to disk", records.len());
        Ok(records.len())
    }

    /// Spawn the background flush worker. Persistence is best-effort: a
    /// failed write is logged and the in-memory state stays authoritative.
    pub fn spawn_flush_worker(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                store.dirty.notified().await;
                tokio::time::sleep(FLUSH_DEBOUNCE).await;
                let snapshot = store.pending.lock().take();
                if let Some(records) = snapshot {
                    if let Err(e) = store.write_all(&records) {
                        warn!("[PEER BOOK] Flush failed: {}", e);
                    }
                }
            }
        })
    }
}
