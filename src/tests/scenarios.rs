// End-to-end scenarios across the replication pipeline

use super::{marker_op, put_op, Harness};
use crate::forks::{BoundaryViolation, RegistryConfig, RegistryEvent};
use crate::graph::GraphClient;
use crate::types::{Checkpoint, ForkId, ForkStatus, ProducerId};

#[tokio::test]
async fn test_happy_path_commit() {
    let mut h = Harness::new(RegistryConfig::default());
    let p1 = ProducerId::from("p1");
    let fork = ForkId::from("forkhash-f");

    h.registry.on_fork_start(&p1, fork.clone(), 100, 1);
    h.registry.on_operation(&p1, put_op("p1", "forkhash-f", 100, 1, "/a"));
    h.registry.on_operation(&p1, put_op("p1", "forkhash-f", 100, 2, "/b"));
    h.registry.on_operation(&p1, marker_op("p1", "forkhash-f", 100, 3));
    h.drain().await;

    h.registry.on_checkpoint(Checkpoint::new(
        101,
        fork.clone(),
        fork.clone(),
        10,
    ));
    h.drain().await;

    // The fork is canonical through block 101 in the projection
    let record = h.graph.fork_record(&fork).await.unwrap().unwrap();
    assert_eq!(record.status, ForkStatus::Canonical);
    assert_eq!(record.last_block, 101);

    // Both data operations applied; the write marker is a boundary, not data
    assert!(h.graph.value_at("/a").is_some());
    assert!(h.graph.value_at("/b").is_some());
    assert_eq!(h.graph.applied_for(&fork), 2);

    // One snapshot requested for block 101
    let snapshots = h.engine.created();
    assert_eq!(snapshots.len(), 1);
    assert_eq!(snapshots[0].block_num, 101);

    // The registry holds only the confirmed fork at block 100
    assert_eq!(h.registry.fork_count(), 1);
    let at_block = h.registry.forks_at(100);
    assert_eq!(at_block.len(), 1);
    assert_eq!(at_block[0].id, fork);
    assert!(at_block[0].confirmed);
}

#[tokio::test]
async fn test_orphan_and_revert() {
    let mut h = Harness::new(RegistryConfig::default());
    let pa = ProducerId::from("pa");
    let pb = ProducerId::from("pb");
    let fa = ForkId::from("fa");
    let fb = ForkId::from("fb");

    h.registry.on_fork_start(&pa, fa.clone(), 200, 1);
    h.registry.on_fork_start(&pb, fb.clone(), 200, 1);
    h.registry.on_operation(&pa, put_op("pa", "fa", 200, 1, "/fa/x"));
    h.registry.on_operation(&pa, marker_op("pa", "fa", 200, 2));
    h.registry.on_operation(&pb, put_op("pb", "fb", 200, 1, "/fb/y"));
    h.drain().await;

    assert!(h.graph.value_at("/fa/x").is_some());
    assert!(h.graph.value_at("/fb/y").is_some());

    h.registry.on_checkpoint(Checkpoint::new(201, fa.clone(), fa.clone(), 10));
    h.drain().await;

    // FA canonical, FB orphaned and reverted
    let ra = h.graph.fork_record(&fa).await.unwrap().unwrap();
    let rb = h.graph.fork_record(&fb).await.unwrap().unwrap();
    assert_eq!(ra.status, ForkStatus::Canonical);
    assert_eq!(rb.status, ForkStatus::Orphaned);
    assert!(h.graph.value_at("/fa/x").is_some());
    assert!(h.graph.value_at("/fb/y").is_none());

    // FB is gone from the live registry and pb's active pointer is cleared
    assert!(h.registry.fork(&fb).is_none());
    assert_eq!(h.registry.active_fork(&pb), None);
}

#[tokio::test]
async fn test_missing_write_marker_rejects_checkpoint() {
    let mut h = Harness::new(RegistryConfig::default());
    let p1 = ProducerId::from("p1");
    let fork = ForkId::from("fx");

    h.registry.on_fork_start(&p1, fork.clone(), 300, 1);
    h.registry.on_operation(&p1, put_op("p1", "fx", 300, 1, "/a"));
    h.registry.on_operation(&p1, put_op("p1", "fx", 300, 2, "/b"));
    h.drain().await;

    h.registry.on_checkpoint(Checkpoint::new(301, fork.clone(), fork.clone(), 10));
    let events = h.drain().await;

    // CHECKPOINT_INVALID with the right reason
    assert!(events.iter().any(|e| matches!(
        e,
        RegistryEvent::CheckpointInvalid {
            reason: BoundaryViolation::MissingWriteMarker,
            ..
        }
    )));

    // No snapshot, fork retained for retry
    assert!(h.engine.created().is_empty());
    let retained = h.registry.fork(&fork).unwrap();
    assert!(!retained.confirmed);
    assert_eq!(retained.operation_count, 2);
}

#[tokio::test]
async fn test_buffer_overflow_keeps_counting() {
    let mut h = Harness::new(RegistryConfig {
        op_buffer_size: 10,
        ..RegistryConfig::default()
    });
    let p1 = ProducerId::from("p1");

    for i in 1..=15 {
        h.registry
            .on_operation(&p1, put_op("p1", "fbig", 400, i, &format!("/k/{}", i)));
    }
    h.drain().await;

    let fork = h.registry.fork(&ForkId::from("fbig")).unwrap();
    assert_eq!(fork.operations.len(), 10);
    assert_eq!(fork.operation_count, 15);
    assert_eq!(fork.last_operation().unwrap().index, 15);
}

#[tokio::test]
async fn test_fork_cap_enforcement() {
    let mut h = Harness::new(RegistryConfig {
        fork_cap: 3,
        ..RegistryConfig::default()
    });

    // Five forks at block 500 with owner counts 4, 3, 2, 1, 1
    let owner_counts = [4usize, 3, 2, 1, 1];
    for (i, count) in owner_counts.iter().enumerate() {
        let fork = ForkId::new(format!("f{}", i));
        for j in 0..*count {
            let producer = ProducerId::new(format!("prod-{}-{}", i, j));
            h.registry.on_fork_start(&producer, fork.clone(), 500, 1);
        }
    }
    h.drain().await;

    let survivors = h.registry.forks_at(500);
    assert_eq!(survivors.len(), 3);
    for kept in ["f0", "f1", "f2"] {
        assert!(h.registry.fork(&ForkId::from(kept)).is_some(), "{} evicted", kept);
    }
    for evicted in ["f3", "f4"] {
        assert!(h.registry.fork(&ForkId::from(evicted)).is_none(), "{} kept", evicted);
    }
}

#[tokio::test]
async fn test_unknown_checkpoint_hash_creates_canonical_fork() {
    let mut h = Harness::new(RegistryConfig::default());
    let p1 = ProducerId::from("p1");

    h.registry.on_fork_start(&p1, ForkId::from("local-fork"), 600, 1);
    h.drain().await;

    h.registry.on_checkpoint(Checkpoint::new(
        601,
        ForkId::from("foreign-hash"),
        ForkId::from("prev"),
        10,
    ));
    h.drain().await;

    // The unknown hash finalized on a fresh fork; the sibling was pruned
    let record = h
        .graph
        .fork_record(&ForkId::from("foreign-hash"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, ForkStatus::Canonical);
    assert!(h.registry.fork(&ForkId::from("local-fork")).is_none());
    assert!(h.registry.fork(&ForkId::from("foreign-hash")).unwrap().confirmed);
}
