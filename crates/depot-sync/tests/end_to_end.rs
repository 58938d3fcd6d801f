//! Offline → online delivery through the full orchestrator.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use depot_core::OperationKind;
use depot_db::{Database, DbConfig};
use depot_sync::{
    ConnectivityState, DepotConfig, LoopbackConnector, Orchestrator, ReplayRegistry,
};
use serde_json::json;
use tokio::time::{sleep, timeout};

fn test_config() -> DepotConfig {
    let mut config = DepotConfig::default();
    config.device.id = "dock-3".into();
    config.remote.reconnect_delay_ms = 50;
    config.sync.poll_interval_secs = 0;
    config
}

#[tokio::test]
async fn test_offline_mutation_is_delivered_once_after_reconnect() {
    let connector = Arc::new(LoopbackConnector::refusing());
    let delivered = Arc::new(Mutex::new(Vec::<String>::new()));

    let mut registry = ReplayRegistry::new();
    let log = delivered.clone();
    registry.register_fn(OperationKind::Transfer, move |op| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(op.payload.clone());
            Ok(())
        }
    });

    let depot = Orchestrator::builder(test_config())
        .database(Database::new(DbConfig::in_memory()).await.unwrap())
        .connector(connector.clone())
        .replayers(registry)
        .start()
        .await
        .unwrap();
    assert!(!depot.is_online());

    // Offline: the mutation lands in the queue and nowhere else.
    let payload = json!({ "from": "WH-1", "to": "WH-2", "baskets": ["BASKET-7"] });
    let op = depot
        .record(OperationKind::Transfer, "BASKET-7", &payload)
        .await
        .unwrap();

    let queued = depot.database().pending_operations().list_in_order().await.unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].id, op.id);
    sleep(Duration::from_millis(150)).await;
    assert!(delivered.lock().unwrap().is_empty());

    // Network comes back.
    connector.set_refuse(false);
    let mut online = depot.subscribe_online();
    timeout(Duration::from_secs(5), online.wait_for(|online| *online))
        .await
        .expect("never came online")
        .unwrap();

    let repo = depot.database().pending_operations();
    timeout(Duration::from_secs(5), async {
        while repo.count().await.unwrap() > 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("queue not drained");

    // Give a duplicate delivery the chance to show up.
    sleep(Duration::from_millis(150)).await;
    let delivered = delivered.lock().unwrap().clone();
    assert_eq!(delivered.len(), 1);
    let sent: serde_json::Value = serde_json::from_str(&delivered[0]).unwrap();
    assert_eq!(sent, payload);

    let status = depot.status().await.unwrap();
    assert_eq!(status.connectivity, ConnectivityState::Connected);
    assert_eq!(status.sync.pending_count, 0);
    assert!(status.sync.is_online);

    depot.shutdown().await;
    assert!(!depot.is_online());
}

#[tokio::test]
async fn test_mutations_recorded_online_are_delivered() {
    let connector = Arc::new(LoopbackConnector::new());
    let delivered = Arc::new(Mutex::new(Vec::<String>::new()));

    let mut registry = ReplayRegistry::new();
    let log = delivered.clone();
    registry.register_fn(OperationKind::Receiving, move |op| {
        let log = log.clone();
        async move {
            log.lock().unwrap().push(op.subject.clone());
            Ok(())
        }
    });

    let depot = Orchestrator::builder(test_config())
        .database(Database::new(DbConfig::in_memory()).await.unwrap())
        .connector(connector)
        .replayers(registry)
        .start()
        .await
        .unwrap();

    let mut online = depot.subscribe_online();
    timeout(Duration::from_secs(5), online.wait_for(|online| *online))
        .await
        .unwrap()
        .unwrap();

    for pallet in ["PALLET-1", "PALLET-2", "PALLET-3"] {
        depot
            .record(OperationKind::Receiving, pallet, &json!({ "pallet": pallet }))
            .await
            .unwrap();
    }

    let repo = depot.database().pending_operations();
    timeout(Duration::from_secs(5), async {
        while repo.count().await.unwrap() > 0 {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("queue not drained");

    assert_eq!(
        *delivered.lock().unwrap(),
        vec!["PALLET-1", "PALLET-2", "PALLET-3"]
    );

    depot.shutdown().await;
}
