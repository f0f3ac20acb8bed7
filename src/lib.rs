//! onionmesh: peer maintenance and flood broadcast for an anonymous
//! gossip overlay.
//!
//! The transport (onion routing, sockets, handshakes) lives outside this
//! crate, behind the [`transport::Transport`] trait. On top of it this
//! crate keeps the network healthy:
//!
//! - [`peer_manager::PeerManager`] tracks reported / persisted / live
//!   peer sets, runs debounced housekeeping, and enforces tiered
//!   connection-count eviction
//! - [`broadcast::Broadcaster`] floods payloads with staggered sends,
//!   fan-out profiles for owners vs. relays, and strict timeout
//!   accounting
//! - [`ban::BanRegistry`] is the shared ban list consulted on accept and
//!   gossip ingestion
//! - [`peer_store::PeerStore`] persists peer reputation across restarts
//!   with a debounced flush worker

pub mod ban;
pub mod broadcast;
pub mod config;
pub mod peer;
pub mod peer_manager;
pub mod peer_store;
pub mod transport;

#[cfg(test)]
pub(crate) mod test_utils;

pub use ban::BanRegistry;
pub use broadcast::{BroadcastListener, BroadcastMessage, Broadcaster};
pub use config::{load_network_config, ConnectionLimits, NetworkConfig};
pub use peer::{Capabilities, Capability, NodeAddress, PeerRecord};
pub use peer_manager::{ConnectionStats, PeerManager, PeerManagerListener};
pub use peer_store::PeerStore;
pub use transport::{CloseReason, Connection, ConnectionListener, Direction, PeerKind, Transport};
