// SPDX-License-Identifier: GPL-3.0-only

mod common;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use bridge_contracts::MountStore;
use bridge_sys::JsonMountStore;
use bridge_types::{AccessPoint, ActiveMount, MountIdentity};
use common::*;
use mount_bridge::Reconciler;
use tokio_util::sync::CancellationToken;

fn scratch_store() -> (Arc<JsonMountStore>, PathBuf) {
    let dir = std::env::temp_dir().join(format!("mount-bridge-reconcile-{}", uuid::Uuid::new_v4()));
    (Arc::new(JsonMountStore::new(dir.join("mounts.json"))), dir)
}

async fn seed(store: &JsonMountStore, count: u32) {
    for disk in 1..=count {
        store
            .upsert(ActiveMount::new(
                MountIdentity::new(disk, 1),
                AccessPoint::DriveLetter(letter(char::from(b'D' + disk as u8))),
                "Ubuntu",
                format!("/mnt/wsl/PHYSICALDRIVE{}p1", disk),
                unc(disk, 1),
                true,
            ))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn exactly_one_reachable_record_survives_for_any_count() {
    for count in [1u32, 2, 5, 9] {
        let (store, dir) = scratch_store();
        seed(&store, count).await;
        let survivor = count.div_ceil(2);
        let probe = Arc::new(FakeProbe::only(&[unc(survivor, 1)]));

        let report = Reconciler::new(store.clone(), probe, Duration::from_millis(200))
            .reconcile(&CancellationToken::new())
            .await
            .unwrap();

        let restored = report.restored.expect("one record restored");
        assert_eq!(restored.identity, MountIdentity::new(survivor, 1));
        assert_eq!(report.removed.len() as u32, count - 1);
        assert!(report.failures.is_empty());

        // A fresh handle sees the same thing the file holds.
        let reopened = JsonMountStore::new(dir.join("mounts.json"));
        let left = reopened.list().await.unwrap();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].identity, MountIdentity::new(survivor, 1));
        let _ = std::fs::remove_dir_all(dir);
    }
}

#[tokio::test]
async fn no_reachable_record_empties_the_store() {
    let (store, dir) = scratch_store();
    seed(&store, 4).await;

    let report = Reconciler::new(store.clone(), Arc::new(FakeProbe::only(&[])), Duration::from_millis(200))
        .reconcile(&CancellationToken::new())
        .await
        .unwrap();

    assert!(report.restored.is_none());
    assert_eq!(report.removed.len(), 4);
    assert!(store.list().await.unwrap().is_empty());
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn reachable_records_after_the_first_are_still_removed() {
    let (store, dir) = scratch_store();
    seed(&store, 3).await;
    let probe = Arc::new(FakeProbe::everything());

    let report = Reconciler::new(store.clone(), probe.clone(), Duration::from_millis(200))
        .reconcile(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.restored.unwrap().identity, MountIdentity::new(1, 1));
    assert_eq!(
        report.removed,
        vec![MountIdentity::new(2, 1), MountIdentity::new(3, 1)]
    );
    assert_eq!(probe.probed.lock().unwrap().len(), 1);
    let _ = std::fs::remove_dir_all(dir);
}

#[tokio::test]
async fn empty_store_reconciles_to_nothing() {
    let (store, _dir) = scratch_store();

    let report = Reconciler::new(store, Arc::new(FakeProbe::everything()), Duration::from_millis(200))
        .reconcile(&CancellationToken::new())
        .await
        .unwrap();

    assert!(report.restored.is_none());
    assert!(report.removed.is_empty());
}
