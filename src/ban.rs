//! Ban registry for misbehaving or operator-blocked peers
//!
//! Loaded once at startup from the comma-separated `banned_peers` config
//! value and consulted by the transport acceptor before admitting inbound
//! connections, and by the peer manager before retaining gossip-learned
//! addresses. Scoped to the node instance (constructed and injected, no
//! process-wide static) so parallel nodes and tests never share state.
//!
//! Durability of the list across restarts is the host configuration's
//! concern; this registry only holds the in-memory set.

use parking_lot::RwLock;
use std::collections::HashSet;
use tracing::info;

use crate::config::csv_entries;
use crate::peer::NodeAddress;

pub struct BanRegistry {
    banned: RwLock<HashSet<NodeAddress>>,
}

impl BanRegistry {
    /// Build from the comma-separated config value. Empty string = no bans.
    /// Unparseable entries are skipped; `NetworkConfig::validate` reports
    /// them before we ever get here.
    pub fn from_csv(raw: &str) -> Self {
        let banned: HashSet<NodeAddress> =
            csv_entries(raw).filter_map(|s| s.parse().ok()).collect();

        if !banned.is_empty() {
            info!("[BAN] Loaded {} banned peer addresses", banned.len());
        }

        Self {
            banned: RwLock::new(banned),
        }
    }

    pub fn empty() -> Self {
        Self::from_csv("")
    }

    /// O(1) membership check, consulted on every inbound accept and on
    /// every gossip-learned peer.
    pub fn is_banned(&self, address: &NodeAddress) -> bool {
        self.banned.read().contains(address)
    }

    /// Runtime addition (operator action), effective without restart.
    pub fn add(&self, address: NodeAddress) {
        if self.banned.write().insert(address.clone()) {
            info!("[BAN] Added {} to ban list", address);
        }
    }

    /// Runtime removal (operator action).
    pub fn remove(&self, address: &NodeAddress) {
        if self.banned.write().remove(address) {
            info!("[BAN] Removed {} from ban list", address);
        }
    }

    pub fn len(&self) -> usize {
        self.banned.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.banned.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_loading() {
        let bans = BanRegistry::from_csv("bad1.onion:8000, bad2.onion:8000,");
        assert_eq!(bans.len(), 2);
        assert!(bans.is_banned(&NodeAddress::new("bad1.onion", 8000)));
        assert!(bans.is_banned(&NodeAddress::new("bad2.onion", 8000)));
        assert!(!bans.is_banned(&NodeAddress::new("good.onion", 8000)));
    }

    #[test]
    fn empty_string_means_no_bans() {
        let bans = BanRegistry::from_csv("");
        assert!(bans.is_empty());
    }

    #[test]
    fn runtime_add_and_remove() {
        let bans = BanRegistry::empty();
        let addr = NodeAddress::new("late.onion", 9000);

        bans.add(addr.clone());
        assert!(bans.is_banned(&addr));

        bans.remove(&addr);
        assert!(!bans.is_banned(&addr));
    }

    #[test]
    fn instances_are_isolated() {
        let a = BanRegistry::empty();
        let b = BanRegistry::empty();
        a.add(NodeAddress::new("x.onion", 1));
        assert!(!b.is_banned(&NodeAddress::new("x.onion", 1)));
    }
}
