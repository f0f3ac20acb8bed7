//! End-to-end peer maintenance through the public API.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::MemoryNet;
use onionmesh::{
    BanRegistry, Capabilities, Capability, CloseReason, NetworkConfig, NodeAddress, PeerManager,
    PeerManagerListener, PeerRecord, PeerStore,
};

fn now_secs() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}

fn manager_on(
    net: &Arc<MemoryNet>,
    db: &sled::Db,
    config: &NetworkConfig,
) -> Arc<PeerManager> {
    common::init_tracing();
    let store = Arc::new(PeerStore::open(db).expect("open peer store"));
    let bans = Arc::new(BanRegistry::from_csv(&config.banned_peers));
    PeerManager::new(net.clone(), store, bans, config)
}

#[tokio::test]
async fn gossip_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let config = NetworkConfig::default();
    let peer_addr = NodeAddress::new("archive.onion", 8000);

    {
        let net = MemoryNet::new();
        let db = sled::open(dir.path()).unwrap();
        let manager = manager_on(&net, &db, &config);

        let sender = net.connect_outbound(1, "gossiper.onion");
        let record = PeerRecord::new(peer_addr.clone(), now_secs())
            .with_capabilities(Capabilities::from_iter([Capability::Archival]));
        assert!(manager.add_to_reported_peers(vec![record], &sender));

        manager.shut_down();
    }

    // Fresh process: the peer and its capabilities come back from disk.
    let net = MemoryNet::new();
    let db = sled::open(dir.path()).unwrap();
    let manager = manager_on(&net, &db, &config);

    let caps = manager
        .find_peers_capabilities(&peer_addr)
        .expect("peer should survive restart");
    assert!(caps.contains(Capability::Archival));
}

#[tokio::test]
async fn connectivity_transitions_notify_listeners() {
    #[derive(Default)]
    struct Recorder {
        lost: AtomicUsize,
        recovered: AtomicUsize,
    }
    impl PeerManagerListener for Recorder {
        fn on_all_connections_lost(&self) {
            self.lost.fetch_add(1, Ordering::Relaxed);
        }
        fn on_new_connection_after_all_connections_lost(&self) {
            self.recovered.fetch_add(1, Ordering::Relaxed);
        }
    }

    let net = MemoryNet::new();
    let db = sled::Config::new().temporary(true).open().unwrap();
    let config = NetworkConfig::default();
    let manager = manager_on(&net, &db, &config);

    let recorder = Arc::new(Recorder::default());
    manager.add_listener(recorder.clone());

    let a = net.connect_outbound(1, "a.onion");
    manager.on_connection_event(&a);

    net.drop_connection(1);
    manager.on_disconnect_event(CloseReason::TransportFailure, &a);
    assert_eq!(recorder.lost.load(Ordering::Relaxed), 1);
    assert_eq!(manager.num_all_connections_lost(), 1);

    let b = net.connect_outbound(2, "b.onion");
    manager.on_connection_event(&b);
    assert_eq!(recorder.recovered.load(Ordering::Relaxed), 1);
}

#[tokio::test(start_paused = true)]
async fn inbound_excess_is_evicted_then_settles() {
    let net = MemoryNet::new();
    let db = sled::Config::new().temporary(true).open().unwrap();
    let config = NetworkConfig::default(); // max_connections 12
    let manager = manager_on(&net, &db, &config);

    for i in 0..13 {
        net.connect_inbound(i, &format!("p{}.onion", i));
    }

    assert!(manager.check_max_connections());

    // The delayed re-check finds 12 connections and stops evicting.
    tokio::time::sleep(Duration::from_millis(500)).await;

    let disconnects = net.disconnects();
    assert_eq!(disconnects.len(), 1);
    assert_eq!(disconnects[0].1, CloseReason::TooManyConnections);
    assert_eq!(net.connection_count(), 12);
}

#[tokio::test]
async fn banned_peer_purged_from_gossip() {
    let net = MemoryNet::new();
    let db = sled::Config::new().temporary(true).open().unwrap();
    let config = NetworkConfig {
        banned_peers: "evil.onion:8000".to_string(),
        ..NetworkConfig::default()
    };
    let manager = manager_on(&net, &db, &config);

    let sender = net.connect_outbound(1, "gossiper.onion");
    let relaying = Capabilities::from_iter([Capability::MessageRelay]);
    let batch = vec![
        PeerRecord::new(NodeAddress::new("evil.onion", 8000), now_secs())
            .with_capabilities(relaying.clone()),
        PeerRecord::new(NodeAddress::new("fine.onion", 8000), now_secs())
            .with_capabilities(relaying),
    ];
    assert!(manager.add_to_reported_peers(batch, &sender));

    assert!(manager
        .find_peers_capabilities(&NodeAddress::new("evil.onion", 8000))
        .is_none());
    assert!(manager
        .find_peers_capabilities(&NodeAddress::new("fine.onion", 8000))
        .is_some());
}
