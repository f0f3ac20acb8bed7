//! Flood broadcast: fan a payload out to connected peers
//!
//! [`Broadcaster`] is the entry point: each call to [`Broadcaster::broadcast`]
//! spins up one [`BroadcastHandler`] that owns the attempt end to end
//! (candidate selection, staggered sends, timeout, result accounting).
//! The broadcaster only tracks outstanding handlers so shutdown can
//! cancel them; handlers detach themselves the moment they reach a
//! terminal state.

mod handler;

pub use handler::{
    BroadcastError, BroadcastHandler, BASE_TIMEOUT, OWNER_SEND_DELAY, RELAY_FANOUT_CAP,
    RELAY_SEND_DELAY,
};

use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

use crate::peer::NodeAddress;
use crate::peer_manager::PeerManager;
use crate::transport::Transport;

/// One gossip payload addressed to the whole network.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BroadcastMessage {
    /// Network-wide deduplication id chosen by the originator.
    pub id: String,
    pub payload: Vec<u8>,
}

impl BroadcastMessage {
    pub fn new(id: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            id: id.into(),
            payload,
        }
    }
}

/// Progress callbacks for one broadcast attempt. All methods have no-op
/// defaults; implement what you care about.
pub trait BroadcastListener: Send + Sync {
    /// A send was confirmed; `num_completed` peers have received the
    /// message so far.
    fn on_broadcasted(&self, num_completed: usize) {
        let _ = num_completed;
    }
    /// The first send was confirmed; the message is in the network.
    fn on_broadcasted_to_first_peer(&self) {}
    fn on_broadcast_completed(&self, num_succeeded: usize, num_failed: usize) {
        let _ = (num_succeeded, num_failed);
    }
    fn on_broadcast_failed(&self, error: &BroadcastError) {
        let _ = error;
    }
}

pub struct Broadcaster {
    transport: Arc<dyn Transport>,
    peer_manager: Arc<PeerManager>,
    next_handler_id: AtomicU64,
    handlers: Mutex<HashMap<u64, Arc<BroadcastHandler>>>,
    shut_down_requested: AtomicBool,
    self_ref: OnceCell<Weak<Broadcaster>>,
}

impl Broadcaster {
    pub fn new(transport: Arc<dyn Transport>, peer_manager: Arc<PeerManager>) -> Arc<Self> {
        let broadcaster = Arc::new(Self {
            transport,
            peer_manager,
            next_handler_id: AtomicU64::new(0),
            handlers: Mutex::new(HashMap::new()),
            shut_down_requested: AtomicBool::new(false),
            self_ref: OnceCell::new(),
        });
        let _ = broadcaster.self_ref.set(Arc::downgrade(&broadcaster));
        broadcaster
    }

    /// Start one broadcast attempt.
    ///
    /// `exclude` is the peer the message arrived from (never sent back).
    /// `is_owner` selects the flood profile: originators use full fan-out
    /// with a short stagger, relays a capped fan-out with a longer one.
    pub fn broadcast(
        &self,
        message: BroadcastMessage,
        exclude: Option<NodeAddress>,
        is_owner: bool,
        listener: Option<Arc<dyn BroadcastListener>>,
    ) {
        if self.shut_down_requested.load(Ordering::Relaxed) {
            warn!(
                message_id = %message.id,
                "[BROADCAST] Shutdown in progress, dropping broadcast request"
            );
            return;
        }

        let handler_id = self.next_handler_id.fetch_add(1, Ordering::Relaxed);
        let weak = self.self_ref.get().cloned().unwrap_or_else(Weak::new);
        let on_terminal: Box<dyn FnOnce() + Send> = Box::new(move || {
            if let Some(broadcaster) = weak.upgrade() {
                broadcaster.handlers.lock().remove(&handler_id);
            }
        });

        let handler = Arc::new(BroadcastHandler::new(
            Arc::clone(&self.transport),
            Arc::clone(&self.peer_manager),
            message,
            exclude,
            is_owner,
            listener,
            on_terminal,
        ));

        self.handlers
            .lock()
            .insert(handler_id, Arc::clone(&handler));
        debug!(handler_id, "[BROADCAST] Starting broadcast handler");
        handler.start();
    }

    /// Handlers still waiting for a terminal state.
    pub fn num_outstanding(&self) -> usize {
        self.handlers.lock().len()
    }

    /// Cancel every outstanding attempt and refuse new ones.
    pub fn shut_down(&self) {
        self.shut_down_requested.store(true, Ordering::Relaxed);
        let outstanding: Vec<Arc<BroadcastHandler>> =
            self.handlers.lock().values().cloned().collect();
        info!(
            outstanding = outstanding.len(),
            "[BROADCAST] Shutting down, cancelling outstanding broadcasts"
        );
        for handler in outstanding {
            handler.cancel();
        }
        self.handlers.lock().clear();
    }
}
