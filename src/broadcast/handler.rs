//! One flood-broadcast attempt: staggered sends, timeout, terminal state
//!
//! A handler owns the accounting for a single message: the fan-out it
//! chose, how many sends succeeded or failed, and a single terminal
//! state reached exactly once (completed, timed out, cancelled, or
//! failed outright). The timeout timer is armed *before* any send is
//! scheduled so a stalled transport can never leave the handler open
//! forever. Whoever wins the terminal transition reports the result;
//! everyone else backs off.

use rand::seq::SliceRandom;
use rand::Rng;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::peer::NodeAddress;
use crate::peer_manager::PeerManager;
use crate::transport::{CloseReason, Connection, Transport};

use super::{BroadcastListener, BroadcastMessage};

/// Per-peer stagger base when we originated the message. Owners flood
/// aggressively: full fan-out, short stagger.
pub const OWNER_SEND_DELAY: Duration = Duration::from_millis(50);

/// Per-peer stagger base when relaying someone else's message.
pub const RELAY_SEND_DELAY: Duration = Duration::from_millis(100);

/// Fan-out cap when relaying. Owners send to every candidate.
pub const RELAY_FANOUT_CAP: usize = 7;

/// Fixed component of the completion timeout; the variable component
/// scales with stagger and fan-out.
pub const BASE_TIMEOUT: Duration = Duration::from_secs(60);

/// Why a broadcast attempt did not complete.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("no peers available for broadcast")]
    NoPeersAvailable,
    #[error("broadcast timed out: {succeeded} sends succeeded, {failed} failed, {open} still open")]
    TimedOut {
        succeeded: usize,
        failed: usize,
        open: usize,
    },
    #[error("all {failed} broadcast sends failed")]
    AllSendsFailed { failed: usize },
    #[error("broadcast canceled")]
    Canceled,
}

// Terminal transitions race between the timeout timer, the last send
// result and cancellation; a CAS from Broadcasting decides the winner.
const STATE_BROADCASTING: u8 = 0;
const STATE_COMPLETED: u8 = 1;
const STATE_TIMED_OUT: u8 = 2;
const STATE_CANCELED: u8 = 3;
const STATE_FAILED: u8 = 4;

pub struct BroadcastHandler {
    transport: Arc<dyn Transport>,
    peer_manager: Arc<PeerManager>,
    message: BroadcastMessage,
    /// Peer the message arrived from; never sent back to.
    exclude: Option<NodeAddress>,
    is_owner: bool,
    listener: Option<Arc<dyn BroadcastListener>>,

    state: AtomicU8,
    num_peers: AtomicUsize,
    num_succeeded: AtomicUsize,
    num_failed: AtomicUsize,
    sent_to_first: AtomicBool,
    /// Armed before the first send; aborted on the terminal transition
    /// so a finished broadcast does not pin the handler until expiry.
    timeout_task: parking_lot::Mutex<Option<tokio::task::JoinHandle<()>>>,
    /// Called once on the terminal transition, used by the broadcaster
    /// to drop its reference to this handler.
    on_terminal: parking_lot::Mutex<Option<Box<dyn FnOnce() + Send>>>,
}

impl BroadcastHandler {
    #[allow(clippy::too_many_arguments)]
    pub(super) fn new(
        transport: Arc<dyn Transport>,
        peer_manager: Arc<PeerManager>,
        message: BroadcastMessage,
        exclude: Option<NodeAddress>,
        is_owner: bool,
        listener: Option<Arc<dyn BroadcastListener>>,
        on_terminal: Box<dyn FnOnce() + Send>,
    ) -> Self {
        Self {
            transport,
            peer_manager,
            message,
            exclude,
            is_owner,
            listener,
            state: AtomicU8::new(STATE_BROADCASTING),
            num_peers: AtomicUsize::new(0),
            num_succeeded: AtomicUsize::new(0),
            num_failed: AtomicUsize::new(0),
            sent_to_first: AtomicBool::new(false),
            timeout_task: parking_lot::Mutex::new(None),
            on_terminal: parking_lot::Mutex::new(Some(on_terminal)),
        }
    }

    pub fn message_id(&self) -> &str {
        &self.message.id
    }

    pub fn num_succeeded(&self) -> usize {
        self.num_succeeded.load(Ordering::Relaxed)
    }

    pub fn num_failed(&self) -> usize {
        self.num_failed.load(Ordering::Relaxed)
    }

    /// Chosen fan-out for this attempt.
    pub fn num_peers(&self) -> usize {
        self.num_peers.load(Ordering::Relaxed)
    }

    pub fn is_terminal(&self) -> bool {
        self.state.load(Ordering::Acquire) != STATE_BROADCASTING
    }

    /// Select candidates, arm the timeout, schedule the staggered sends.
    pub(super) fn start(self: &Arc<Self>) {
        let candidates = self.select_candidates();
        if candidates.is_empty() {
            warn!(
                message_id = %self.message.id,
                "[BROADCAST] No peers available, giving up without arming a timer"
            );
            if self.transition(STATE_FAILED) {
                if let Some(listener) = &self.listener {
                    listener.on_broadcast_failed(&BroadcastError::NoPeersAvailable);
                }
            }
            return;
        }

        let fanout = candidates.len();
        self.num_peers.store(fanout, Ordering::Relaxed);

        let stagger = if self.is_owner {
            OWNER_SEND_DELAY
        } else {
            RELAY_SEND_DELAY
        };

        // Timer first. If every send task stalls, the timeout still fires.
        let timeout = BASE_TIMEOUT + stagger * fanout as u32;
        let handler = Arc::clone(self);
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            handler.on_timeout();
        });
        if self.is_terminal() {
            timer.abort();
        } else {
            *self.timeout_task.lock() = Some(timer);
        }

        debug!(
            message_id = %self.message.id,
            fanout,
            is_owner = self.is_owner,
            ?timeout,
            "[BROADCAST] Scheduling staggered sends"
        );

        let mut rng = rand::thread_rng();
        for (i, connection) in candidates.into_iter().enumerate() {
            // Jittered slot per peer so sends spread over the window
            // instead of bursting, without any global ordering.
            let slot = stagger.as_millis() as u64;
            let delay = rng.gen_range((i as u64 + 1) * slot..=(i as u64 + 2) * slot);
            let handler = Arc::clone(self);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay)).await;
                handler.send_to_peer(connection).await;
            });
        }
    }

    /// Confirmed connections minus the peer the message came from,
    /// shuffled so stagger slots carry no positional bias. Owners flood
    /// everyone; relays keep a bounded random subset.
    fn select_candidates(&self) -> Vec<Arc<Connection>> {
        let mut candidates: Vec<Arc<Connection>> = self
            .transport
            .confirmed_connections()
            .into_iter()
            .filter(|c| self.exclude.is_none() || c.peer_address() != self.exclude)
            .collect();

        let mut rng = rand::thread_rng();
        candidates.shuffle(&mut rng);
        if !self.is_owner {
            candidates.truncate(RELAY_FANOUT_CAP);
        }
        candidates
    }

    async fn send_to_peer(self: Arc<Self>, connection: Arc<Connection>) {
        if self.is_terminal() {
            return;
        }

        let result = self
            .transport
            .send(Arc::clone(&connection), self.message.clone())
            .await;

        // Results landing after the terminal transition are ignored; a
        // timeout already counted this send as open.
        if self.is_terminal() {
            return;
        }

        match result {
            Ok(()) => {
                let completed = self.num_succeeded.fetch_add(1, Ordering::Relaxed) + 1;
                if !self.sent_to_first.swap(true, Ordering::Relaxed) {
                    if let Some(listener) = &self.listener {
                        listener.on_broadcasted_to_first_peer();
                    }
                }
                if let Some(listener) = &self.listener {
                    listener.on_broadcasted(completed);
                }
            }
            Err(e) => {
                self.num_failed.fetch_add(1, Ordering::Relaxed);
                warn!(
                    message_id = %self.message.id,
                    conn_id = connection.id(),
                    "[BROADCAST] Send failed: {}", e
                );
                if let Some(address) = connection.peer_address() {
                    self.peer_manager
                        .handle_connection_fault(&address, CloseReason::TransportFailure);
                }
            }
        }
        self.check_completion();
    }

    fn check_completion(&self) {
        let succeeded = self.num_succeeded.load(Ordering::Relaxed);
        let failed = self.num_failed.load(Ordering::Relaxed);
        let fanout = self.num_peers.load(Ordering::Relaxed);
        if succeeded + failed < fanout {
            return;
        }

        if succeeded == 0 {
            if self.transition(STATE_FAILED) {
                warn!(
                    message_id = %self.message.id,
                    failed, "[BROADCAST] Every send failed"
                );
                if let Some(listener) = &self.listener {
                    listener.on_broadcast_failed(&BroadcastError::AllSendsFailed { failed });
                }
            }
        } else if self.transition(STATE_COMPLETED) {
            info!(
                message_id = %self.message.id,
                succeeded, failed, "[BROADCAST] Broadcast completed"
            );
            if let Some(listener) = &self.listener {
                listener.on_broadcast_completed(succeeded, failed);
            }
        }
    }

    fn on_timeout(&self) {
        if !self.transition(STATE_TIMED_OUT) {
            return;
        }
        let succeeded = self.num_succeeded.load(Ordering::Relaxed);
        let failed = self.num_failed.load(Ordering::Relaxed);
        let open = self.num_peers.load(Ordering::Relaxed) - succeeded - failed;
        warn!(
            message_id = %self.message.id,
            succeeded, failed, open, "[BROADCAST] Broadcast timed out"
        );
        if let Some(listener) = &self.listener {
            listener.on_broadcast_failed(&BroadcastError::TimedOut {
                succeeded,
                failed,
                open,
            });
        }
    }

    /// Cancel this attempt, surfaced to the listener through the same
    /// failure path as a timeout. Idempotent; a handler that already
    /// reached a terminal state is left untouched and no callbacks fire.
    pub fn cancel(&self) {
        if self.transition(STATE_CANCELED) {
            debug!(message_id = %self.message.id, "[BROADCAST] Broadcast canceled");
            if let Some(listener) = &self.listener {
                listener.on_broadcast_failed(&BroadcastError::Canceled);
            }
        }
    }

    /// CAS into a terminal state. The single winner aborts the timeout
    /// timer and runs the terminal hook (which detaches the handler from
    /// its broadcaster).
    fn transition(&self, to: u8) -> bool {
        let won = self
            .state
            .compare_exchange(STATE_BROADCASTING, to, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            if let Some(timer) = self.timeout_task.lock().take() {
                timer.abort();
            }
            if let Some(hook) = self.on_terminal.lock().take() {
                hook();
            }
        }
        won
    }
}
