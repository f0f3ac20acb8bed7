//! Network configuration and derived connection-count tiers
//!
//! Loads from TOML with environment-variable overrides, validates, and
//! derives the staged eviction thresholds from a single `max_connections`
//! knob. Regular nodes default to 12 connections; seed nodes are expected
//! to configure a higher value.

use serde::{Deserialize, Serialize};
use std::fs;

use crate::peer::NodeAddress;

/// Default connection target for regular (non-seed) nodes.
pub const DEFAULT_MAX_CONNECTIONS: usize = 12;

/// Top-level network maintenance configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Target number of open connections. Eviction tiers derive from this.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Comma-separated list of banned peer addresses (empty = no bans).
    #[serde(default)]
    pub banned_peers: String,

    /// Comma-separated list of seed node addresses for initial entry.
    #[serde(default)]
    pub seed_nodes: String,
}

fn default_max_connections() -> usize {
    DEFAULT_MAX_CONNECTIONS
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            banned_peers: String::new(),
            seed_nodes: String::new(),
        }
    }
}

impl NetworkConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be at least 1".to_string());
        }

        for entry in csv_entries(&self.seed_nodes) {
            entry
                .parse::<NodeAddress>()
                .map_err(|e| format!("invalid seed node entry: {}", e))?;
        }
        for entry in csv_entries(&self.banned_peers) {
            entry
                .parse::<NodeAddress>()
                .map_err(|e| format!("invalid banned peer entry: {}", e))?;
        }

        Ok(())
    }

    /// Parsed seed node addresses.
    pub fn seed_addresses(&self) -> Vec<NodeAddress> {
        csv_entries(&self.seed_nodes)
            .filter_map(|s| s.parse().ok())
            .collect()
    }

    /// Derived eviction tiers for this configuration.
    pub fn limits(&self) -> ConnectionLimits {
        ConnectionLimits::from_max_connections(self.max_connections)
    }
}

/// Split a comma-separated config value, dropping empty segments.
pub(crate) fn csv_entries(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

/// Load network configuration from a TOML file, applying env overrides.
pub fn load_network_config(path: &str) -> Result<NetworkConfig, String> {
    let content = fs::read_to_string(path)
        .map_err(|e| format!("failed to read config file {}: {}", path, e))?;

    let mut config: NetworkConfig =
        toml::from_str(&content).map_err(|e| format!("failed to parse TOML config: {}", e))?;

    if let Ok(val) = std::env::var("ONIONMESH_MAX_CONNECTIONS") {
        if let Ok(n) = val.trim().parse::<usize>() {
            config.max_connections = n;
        }
    }
    if let Ok(val) = std::env::var("ONIONMESH_BANNED_PEERS") {
        config.banned_peers = val;
    }

    config.validate()?;

    tracing::info!(
        max_connections = config.max_connections,
        seed_nodes = config.seed_addresses().len(),
        "Loaded network configuration"
    );

    Ok(config)
}

/// Connection-count tiers derived from one configured `max_connections`.
///
/// Each tier only fires once the next threshold is exceeded, so nodes
/// sitting near their target are left alone; the escalating tiers keep
/// eviction from stalling when no cheap candidates exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionLimits {
    /// Below this the node should be dialing out for more peers.
    pub min_connections: usize,
    /// Configured target connection count.
    pub max_connections: usize,
    /// Above this, outbound plain peers also become eviction candidates.
    pub outbound_peer_trigger: usize,
    /// Above this, handshaking connections become eviction candidates.
    pub initial_data_exchange_trigger: usize,
    /// Above this, any connection may be evicted.
    pub max_connections_absolute: usize,
}

impl ConnectionLimits {
    pub fn from_max_connections(max_connections: usize) -> Self {
        let scaled = |factor: f64, floor: usize| -> usize {
            ((max_connections as f64 * factor).round() as usize).max(floor)
        };

        let limits = Self {
            min_connections: scaled(0.7, 1),
            max_connections,
            outbound_peer_trigger: scaled(1.3, 4),
            initial_data_exchange_trigger: scaled(1.7, 8),
            max_connections_absolute: scaled(2.5, 12),
        };
        debug_assert!(limits.is_monotonic());
        limits
    }

    /// min <= max <= outbound <= initial_data <= absolute
    fn is_monotonic(&self) -> bool {
        self.min_connections <= self.max_connections
            && self.max_connections <= self.outbound_peer_trigger
            && self.outbound_peer_trigger <= self.initial_data_exchange_trigger
            && self.initial_data_exchange_trigger <= self.max_connections_absolute
    }
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self::from_max_connections(DEFAULT_MAX_CONNECTIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tiers() {
        let limits = ConnectionLimits::default();
        assert_eq!(limits.min_connections, 8);
        assert_eq!(limits.max_connections, 12);
        assert_eq!(limits.outbound_peer_trigger, 16);
        assert_eq!(limits.initial_data_exchange_trigger, 20);
        assert_eq!(limits.max_connections_absolute, 30);
    }

    #[test]
    fn tiers_stay_monotonic_across_configs() {
        for max in 1..=200 {
            let limits = ConnectionLimits::from_max_connections(max);
            assert!(
                limits.is_monotonic(),
                "tier ordering broken at max_connections={}: {:?}",
                max,
                limits
            );
        }
    }

    #[test]
    fn small_configs_hit_floors() {
        let limits = ConnectionLimits::from_max_connections(2);
        assert_eq!(limits.min_connections, 1);
        assert_eq!(limits.outbound_peer_trigger, 4);
        assert_eq!(limits.initial_data_exchange_trigger, 8);
        assert_eq!(limits.max_connections_absolute, 12);
    }

    #[test]
    fn config_validation() {
        let mut config = NetworkConfig::default();
        assert!(config.validate().is_ok());

        config.seed_nodes = "seed1.onion:8000, seed2.onion:8000".to_string();
        assert!(config.validate().is_ok());
        assert_eq!(config.seed_addresses().len(), 2);

        config.seed_nodes = "no-port-here".to_string();
        assert!(config.validate().is_err());

        config.seed_nodes.clear();
        config.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn csv_handles_empty_and_whitespace() {
        assert_eq!(csv_entries("").count(), 0);
        assert_eq!(csv_entries(" , ,").count(), 0);
        let entries: Vec<_> = csv_entries("a.onion:1, b.onion:2").collect();
        assert_eq!(entries, vec!["a.onion:1", "b.onion:2"]);
    }
}
