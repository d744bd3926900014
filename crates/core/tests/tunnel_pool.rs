//! Tunnel pool integration tests under concurrent load.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use burrow_core::testing::{fixtures, MockHostNetwork};
use burrow_core::tunnel::{TunnelConfigStore, TunnelError, TunnelId, TunnelState, TunnelsConfig};
use burrow_core::TunnelManager;

fn pool(max: usize) -> (Arc<TunnelManager>, Arc<MockHostNetwork>) {
    let configs = vec![
        fixtures::tunnel_config("a", "10.1.0.0/16"),
        fixtures::tunnel_config("b", "10.2.0.0/16"),
        fixtures::tunnel_config("c", "10.3.0.0/16"),
    ];
    let store = Arc::new(TunnelConfigStore::from_configs(configs).unwrap());
    let host = Arc::new(MockHostNetwork::new());
    let config = TunnelsConfig::default()
        .with_max_tunnels(max)
        .with_warm_tunnels(0)
        .with_provision_backoff(1, 5)
        .with_maintenance_interval(1);
    let manager = Arc::new(TunnelManager::new(config, store, host.clone(), None));
    manager.start();
    (manager, host)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_tunnel_is_ever_held_twice() {
    let (manager, _host) = pool(2);
    let holders: Arc<Mutex<HashSet<TunnelId>>> = Arc::new(Mutex::new(HashSet::new()));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let manager = Arc::clone(&manager);
        let holders = Arc::clone(&holders);
        tasks.push(tokio::spawn(async move {
            for _ in 0..5 {
                let lease = manager.acquire(Duration::from_secs(5)).await.unwrap();
                let id = lease.id().clone();
                assert!(
                    holders.lock().unwrap().insert(id.clone()),
                    "tunnel {} handed out twice",
                    id
                );
                tokio::time::sleep(Duration::from_millis(2)).await;
                holders.lock().unwrap().remove(&id);
                manager.release(lease, true);
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    let status = manager.status();
    assert_eq!(status.leased(), 0);
    assert!(status.tunnels.len() <= 2);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_saturated_pool_with_zero_timeout() {
    let (manager, _host) = pool(2);
    let _a = manager.acquire(Duration::from_secs(1)).await.unwrap();
    let _b = manager.acquire(Duration::from_secs(1)).await.unwrap();

    let started = std::time::Instant::now();
    let err = manager.acquire(Duration::ZERO).await.unwrap_err();
    assert!(matches!(err, TunnelError::PoolExhausted { .. }));
    assert!(started.elapsed() < Duration::from_millis(100));

    manager.shutdown().await;
}

#[tokio::test]
async fn test_faulted_tunnel_excluded_until_reprovisioned() {
    let (manager, host) = pool(1);

    let lease = manager.acquire(Duration::from_secs(1)).await.unwrap();
    let faulted = lease.id().clone();
    manager.release(lease, false);
    assert_eq!(
        manager.status().get(&faulted).map(|t| t.state),
        Some(TunnelState::Draining)
    );

    // Every acquire from now on lands on a freshly provisioned context.
    let lease = manager.acquire(Duration::from_secs(5)).await.unwrap();
    let slot = manager.status();
    let snapshot = slot.get(lease.id()).unwrap();
    assert_eq!(snapshot.state, TunnelState::Active);
    if lease.id() == &faulted {
        assert!(snapshot.provision_count >= 2);
    }
    assert_eq!(manager.fault_count(&faulted), 1);

    // The old context was torn down before the new one came up.
    let commands = host.recorded_commands();
    assert!(commands.iter().any(|c| c.starts_with("ip link del")));

    manager.release(lease, true);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_aborted_holder_returns_its_lease() {
    let (manager, _host) = pool(1);

    let holder = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            let _lease = manager.acquire(Duration::from_secs(1)).await.unwrap();
            tokio::time::sleep(Duration::from_secs(60)).await;
        })
    };
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while manager.status().leased() == 0 {
        assert!(tokio::time::Instant::now() < deadline, "holder never acquired");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    holder.abort();
    let _ = holder.await;

    assert_eq!(manager.status().leased(), 0);
    let lease = manager.acquire(Duration::ZERO).await.unwrap();
    assert_eq!(manager.fault_count(lease.id()), 0);

    drop(lease);
    manager.shutdown().await;
}
