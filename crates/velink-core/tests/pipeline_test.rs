#![allow(clippy::unwrap_used)]

//! Ingest queue feeding the tree directly, without a transport.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use velink_core::ingest::{self, Inbound};
use velink_core::{
    ConnectionState, ItemPath, ItemStream, ItemTree, Mutation, Scope, TreeEvent, Value,
};

fn drain(tree: &mut ItemTree, batch: Vec<Inbound>) {
    for entry in batch {
        match entry {
            Inbound::Mutation(m) => tree.apply(m).unwrap(),
            Inbound::Status(state) => tree.set_connected(state.is_connected()),
        }
    }
}

fn recorder(tree: &mut ItemTree, path: &str) -> Arc<Mutex<Vec<TreeEvent>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let _id = tree.subscribe(&ItemPath::parse(path), Scope::Exact, move |event, _| {
        sink.lock().push(event.clone());
    });
    seen
}

#[tokio::test]
async fn burst_of_updates_notifies_once_with_final_value() {
    let (tx, mut rx) = ingest::channel(ingest::DEFAULT_CAPACITY);
    let mut tree = ItemTree::new();
    let seen = recorder(&mut tree, "battery/soldc/voltage");

    tx.status(ConnectionState::Connected).await.unwrap();
    for i in 0..10_000_i64 {
        tx.send(Mutation::value_changed("battery/soldc/voltage", i))
            .await
            .unwrap();
    }
    drop(tx);

    while let Some(batch) = rx.recv_batch().await {
        drain(&mut tree, batch);
    }

    let values: Vec<Value> = seen
        .lock()
        .iter()
        .filter_map(|e| match e {
            TreeEvent::ValueChanged { value, .. } => Some(value.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(values, vec![Value::Int(9_999)]);
    assert!(rx.coalesced() >= 9_998);
}

#[tokio::test]
async fn observed_item_survives_reconnect_and_comes_back_live() {
    let (tx, mut rx) = ingest::channel(16);
    let mut tree = ItemTree::new();
    let path = ItemPath::parse("tank/fresh/level");
    let seen = recorder(&mut tree, "tank/fresh/level");

    tx.status(ConnectionState::Connected).await.unwrap();
    tx.send(Mutation::value_changed("tank/fresh/level", 64_i64))
        .await
        .unwrap();
    drain(&mut tree, rx.try_recv_batch());
    assert!(tree.get(&path).unwrap().is_live());

    // Link drops, the source forgets the item, then republishes it.
    tx.status(ConnectionState::Retrying { attempt: 1 }).await.unwrap();
    tx.send(Mutation::ItemRemoved { path: path.clone() })
        .await
        .unwrap();
    drain(&mut tree, rx.try_recv_batch());
    let stale = tree.get(&path).unwrap();
    assert!(!stale.is_live());
    assert_eq!(stale.value(), &Value::Int(64));

    tx.status(ConnectionState::Connected).await.unwrap();
    tx.send(Mutation::value_changed("tank/fresh/level", 63_i64))
        .await
        .unwrap();
    drain(&mut tree, rx.try_recv_batch());
    assert!(tree.get(&path).unwrap().is_live());

    let liveness: Vec<bool> = seen
        .lock()
        .iter()
        .filter_map(|e| match e {
            TreeEvent::LivenessChanged { live, .. } => Some(*live),
            _ => None,
        })
        .collect();
    assert_eq!(liveness, vec![true, false, true]);
    tree.check_integrity().unwrap();
}

#[tokio::test]
async fn unobserved_subtree_is_destroyed_on_remove() {
    let (tx, mut rx) = ingest::channel(16);
    let mut tree = ItemTree::new();
    let parent = recorder(&mut tree, "devices");

    tx.send(Mutation::value_changed("devices/fridge/power", 45_i64))
        .await
        .unwrap();
    tx.send(Mutation::ItemRemoved {
        path: ItemPath::parse("devices/fridge"),
    })
    .await
    .unwrap();
    drain(&mut tree, rx.try_recv_batch());

    assert!(tree.lookup(&ItemPath::parse("devices/fridge")).is_none());
    let events = parent.lock();
    assert!(matches!(events.first(), Some(TreeEvent::ChildAdded { .. })));
    assert!(matches!(events.last(), Some(TreeEvent::ChildRemoved { .. })));
    tree.check_integrity().unwrap();
}

#[tokio::test]
async fn dropping_the_last_stream_releases_a_removed_device() {
    let (tx, mut rx) = ingest::channel(16);
    let mut tree = ItemTree::new();
    let released = tree.bus().release_signal();
    let fridge = ItemPath::parse("devices/fridge");

    tx.send(Mutation::value_changed("devices/fridge/power", 45_i64))
        .await
        .unwrap();
    drain(&mut tree, rx.try_recv_batch());
    let stream = ItemStream::attach(&mut tree, &fridge.child("power"), Scope::Exact);

    tx.send(Mutation::ItemRemoved {
        path: fridge.clone(),
    })
    .await
    .unwrap();
    drain(&mut tree, rx.try_recv_batch());
    assert!(tree.lookup(&fridge).is_some());

    tokio::spawn(async move { drop(stream) }).await.unwrap();
    tokio::time::timeout(Duration::from_secs(1), released.notified())
        .await
        .unwrap();
    tree.collect_released();

    assert!(tree.lookup(&fridge).is_none());
    assert_eq!(tree.retained_len(), 0);
    tree.check_integrity().unwrap();
}
