mod common;

use common::{harness, SEED_EPC, TID};
use std::collections::HashSet;
use tagforge_common::CoordinatorSettings;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_successes_for_one_tid_count_once() {
    let h = harness(CoordinatorSettings::default());

    let handles: Vec<_> = (0..32)
        .map(|i| {
            let c = h.coordinator.clone();
            tokio::spawn(async move { c.record_result(TID, &format!("ok {i}"), true).await })
        })
        .collect();

    let latched = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .filter(|first| *first)
        .count();
    assert_eq!(latched, 1);
    assert_eq!(h.coordinator.success_count().await.unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_assignments_are_unique() {
    let h = harness(CoordinatorSettings::default());

    // 64 unknown chips sharing the same last five bytes: after the first, every
    // assignment must come from the random fallback.
    let handles: Vec<_> = (0..64u32)
        .map(|i| {
            let c = h.coordinator.clone();
            let tid = format!("E2C0{i:04X}0000000102030405");
            tokio::spawn(async move { c.next_epc_for_tag(SEED_EPC, &tid).await })
        })
        .collect();

    let epcs: Vec<String> = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();
    let distinct: HashSet<&String> = epcs.iter().collect();
    assert_eq!(distinct.len(), epcs.len());
    assert!(epcs.iter().all(|e| e.starts_with("3034257BF400B7")));
    assert_eq!(h.coordinator.used_serials().len(), 64);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn notifications_from_many_channels_discover_each_tid_once() {
    let h = harness(CoordinatorSettings::default());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let c = h.coordinator.clone();
            tokio::spawn(async move {
                c.on_read_reported(vec![tagforge_core::TagSample {
                    tid: TID.into(),
                    epc: SEED_EPC.into(),
                    rssi: None,
                    antenna_port: None,
                }])
                .await
                .len()
            })
        })
        .collect();

    let total: usize = futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|r| r.unwrap())
        .sum();
    assert_eq!(total, 1);
}
