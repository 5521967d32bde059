mod common;

use common::init_tracing;
use std::collections::HashSet;
use tagforge_epc::{ChipRegistry, EpcGenerator, EpcList, UsedSerialSet};

fn generator(used: UsedSerialSet) -> EpcGenerator {
    match EpcGenerator::new(ChipRegistry::builtin(), used, 100, "E2801160000000") {
        Ok(g) => g,
        Err(e) => panic!("failed to build generator: {e}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_random_draws_never_repeat() {
    init_tracing();
    const TASKS: usize = 16;
    const PER_TASK: usize = 250;

    let used = UsedSerialSet::new();
    let gen = generator(used.clone());

    let handles: Vec<_> = (0..TASKS)
        .map(|_| {
            let gen = gen.clone();
            tokio::spawn(async move {
                let mut out = Vec::with_capacity(PER_TASK);
                for _ in 0..PER_TASK {
                    out.push(gen.random_serial().unwrap());
                    tokio::task::yield_now().await;
                }
                out
            })
        })
        .collect();

    let mut all = Vec::new();
    for result in futures::future::join_all(handles).await {
        all.extend(result.unwrap());
    }
    let distinct: HashSet<&String> = all.iter().collect();
    assert_eq!(all.len(), TASKS * PER_TASK);
    assert_eq!(distinct.len(), all.len());
    assert_eq!(used.len(), all.len());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_next_epc_for_same_tid_issues_distinct_values() {
    let gen = generator(UsedSerialSet::new());
    let tid = "E2801160200074C5F1A2B3C4";

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let gen = gen.clone();
            tokio::task::spawn_blocking(move || gen.next_epc_for_tag("3034257BF400B7800004CB2F", tid))
        })
        .collect();

    let mut epcs = HashSet::new();
    for result in futures::future::join_all(handles).await {
        let epc = result.unwrap().unwrap();
        assert!(epc.starts_with("3034257BF400B7"), "{epc}");
        assert!(epcs.insert(epc));
    }
    assert_eq!(epcs.len(), 8);
}

#[test]
fn clearing_the_set_starts_a_new_session() {
    let used = UsedSerialSet::new();
    assert!(used.try_register("00000000AA"));
    assert!(!used.try_register("00000000aa"));
    used.clear();
    assert!(used.is_empty());
    assert!(used.try_register("00000000AA"));
}

#[test]
fn epc_list_loads_from_file() {
    use std::io::Write;
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "# line one\n303B029BC16E1B4301843203\n3000ABCD0000000102030405").unwrap();
    let mut list = EpcList::from_file(file.path()).unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list.next().unwrap(), "303B029BC16E1B4301843203");
    assert_eq!(list.next().unwrap(), "3000ABCD0000000102030405");
    assert!(list.next().is_err());
}
