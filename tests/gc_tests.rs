//! Garbage-collection state rebuilt from the cluster event log.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::time::Duration;

use sfctl::error::Error;

/// G1 complete, G2 rescheduled, G3 with two of its three block services done.
fn three_generations(fake: &FakeCluster) {
    fake.push_event(
        "GCStarted",
        "2024-05-01T10:00:00Z",
        0,
        json!({ "generation": 1, "participatingSS": [1, 2], "eligibleBS": [10, 11, 12] }),
    );
    for (bs, time) in [(10, "2024-05-01T10:05:00Z"), (11, "2024-05-01T10:06:00Z"), (12, "2024-05-01T10:07:00Z")] {
        fake.push_event("GCCompleted", time, bs, json!({ "generation": 1, "discardedBlocks": 100 }));
    }
    fake.push_event("GCRescheduled", "2024-05-01T11:00:00Z", 0, json!({ "generation": 2 }));
    fake.push_event(
        "GCStarted",
        "2024-05-01T12:00:00Z",
        0,
        json!({ "generation": 3, "participatingSS": [1, 2], "eligibleBS": [10, 11, 12] }),
    );
    fake.push_event("GCCompleted", "2024-05-01T12:05:00Z", 10, json!({ "generation": 3, "discardedBlocks": 7 }));
    fake.push_event("GCCompleted", "2024-05-01T12:06:00Z", 11, json!({ "generation": 3, "discardedBlocks": 9 }));
}

#[tokio::test]
async fn test_gc_generations_reconstructed_in_order() {
    let fake = FakeCluster::new();
    three_generations(&fake);
    let cluster = fake.cluster();

    let cycles = cluster.all_gc_info().await.unwrap();
    let generations: Vec<u64> = cycles.iter().map(|c| c.generation).collect();
    assert_eq!(generations, vec![1, 2, 3]);

    assert!(cycles[0].is_complete());
    assert_eq!(cycles[0].discarded_bytes, 300 * 4096);
    assert_eq!(cycles[0].duration_secs(), Some(7 * 60));
    assert!(cycles[1].rescheduled);
    assert!(!cycles[2].is_complete());
    assert_eq!(cycles[2].completed_bs.len(), 2);

    assert_eq!(cluster.last_gc_info().await.unwrap().generation, 3);
}

#[tokio::test]
async fn test_wait_for_gc_times_out_then_finishes() {
    let fake = FakeCluster::new();
    three_generations(&fake);
    let cluster = fake.cluster();

    let err = cluster.wait_for_gc(Duration::from_millis(50)).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "{err:?}");

    fake.push_event("GCCompleted", "2024-05-01T12:09:00Z", 12, json!({ "generation": 3, "discardedBlocks": 1 }));
    let done = cluster.wait_for_gc(Duration::from_millis(50)).await.unwrap();
    assert_eq!(done.generation, 3);
    assert_eq!(done.discarded_bytes, 17 * 4096);
}

#[tokio::test]
async fn test_gc_subcommands() {
    let fake = FakeCluster::new();
    three_generations(&fake);

    assert_eq!(run_command(&fake, &["show-last-gc"]).await, 0);
    assert_eq!(run_command(&fake, &["wait-for-gc", "--timeout", "1"]).await, 1);

    fake.push_event("GCCompleted", "2024-05-01T12:09:00Z", 12, json!({ "generation": 3, "discardedBlocks": 1 }));
    assert_eq!(run_command(&fake, &["wait-for-gc", "--timeout", "1"]).await, 0);
}

#[tokio::test]
async fn test_start_gc_waits_for_the_cluster() {
    let fake = FakeCluster::new();
    three_generations(&fake);
    fake.push_event("GCCompleted", "2024-05-01T12:09:00Z", 12, json!({ "generation": 3, "discardedBlocks": 1 }));
    fake.start_gc_at(4);

    assert_eq!(run_command(&fake, &["cluster-start-gc"]).await, 0);
    assert_eq!(fake.call_count("StartGC"), 1);
    assert_eq!(fake.cluster().last_gc_info().await.unwrap().generation, 4);

    // Generation 4 is still running, so only --force starts another
    assert_eq!(run_command(&fake, &["cluster-start-gc"]).await, 0);
    assert_eq!(fake.call_count("StartGC"), 1);
    assert_eq!(run_command(&fake, &["cluster-start-gc", "--force"]).await, 0);
    assert_eq!(fake.call_count("StartGC"), 2);
}

#[tokio::test]
async fn test_start_gc_times_out_without_acknowledgement() {
    let fake = FakeCluster::new();
    let cluster = fake.cluster();
    let err = cluster.start_gc(true).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "{err:?}");
}

#[tokio::test]
async fn test_stray_completion_does_not_finish_a_generation() {
    let fake = FakeCluster::new();
    three_generations(&fake);
    // Service 40 was never eligible for generation 3
    fake.push_event("GCCompleted", "2024-05-01T12:08:00Z", 40, json!({ "generation": 3, "discardedBlocks": 50 }));
    let cluster = fake.cluster();

    let last = cluster.last_gc_info().await.unwrap();
    assert!(last.completed_bs.is_subset(&last.eligible_bs));
    assert_eq!(last.discarded_bytes, 16 * 4096);
    assert!(!last.is_complete());

    let err = cluster.wait_for_gc(Duration::from_millis(50)).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }), "{err:?}");
}
