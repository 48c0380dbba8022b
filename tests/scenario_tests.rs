//! End-to-end runs of sfctl subcommands against an in-memory cluster.
//!
//! Every test parses a real command line and runs it through the
//! `ActionRunner`, then checks both the exit code and the cluster state.

mod common;

use common::*;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::HashSet;

use sfctl::api::ApiVersion;
use sfctl::cluster::VolumeSearch;
use sfctl::error::Error;
use sfctl::validate::NameOrId;

// ============================================================================
// Accounts
// ============================================================================

#[tokio::test]
async fn test_account_create_then_delete() {
    let fake = FakeCluster::new();

    assert_eq!(run_command(&fake, &["account-create", "--account-name", "acct1"]).await, 0);
    let account = fake.account_named("acct1").expect("account was created");
    assert_eq!(account.initiator_secret.as_ref().map(String::len), Some(14));

    // Already there: fine without --strict, a failure with it
    assert_eq!(run_command(&fake, &["account-create", "--account-name", "acct1"]).await, 0);
    assert_eq!(run_command(&fake, &["account-create", "--account-name", "acct1", "--strict"]).await, 1);
    assert_eq!(fake.call_count("AddAccount"), 1);

    assert_eq!(run_command(&fake, &["account-delete", "--account-name", "acct1", "--strict"]).await, 0);
    assert!(fake.account_named("acct1").is_none());
    assert_eq!(run_command(&fake, &["account-delete", "--account-name", "acct1", "--strict"]).await, 1);
    assert_eq!(run_command(&fake, &["account-delete", "--account-name", "acct1"]).await, 0);
    assert_eq!(fake.call_count("RemoveAccount"), 1);
}

#[tokio::test]
async fn test_account_move_volumes_with_count() {
    let fake = FakeCluster::new();
    let a = fake.add_account("A");
    let b = fake.add_account("B");
    let v1 = fake.add_volume("v1", a, GB);
    let v2 = fake.add_volume("v2", a, GB);
    let v3 = fake.add_volume("v3", a, GB);

    let code = run_command(
        &fake,
        &[
            "account-move-volumes",
            "--source-account",
            "A",
            "--volume-regex",
            ".+",
            "--volume-count",
            "2",
            "--dest-account",
            "B",
        ],
    )
    .await;
    assert_eq!(code, 0);
    assert_eq!(fake.call_count("ModifyVolume"), 2);

    let cluster = fake.cluster();
    let account_b = cluster.find_account(&NameOrId::Id(b)).await.unwrap();
    let moved: Vec<u64> = cluster
        .account_volumes(&account_b)
        .await
        .unwrap()
        .iter()
        .map(|v| v.volume_id)
        .collect();
    assert_eq!(moved, vec![v1, v2]);
    assert_eq!(fake.volume(v3).unwrap().account_id, a);
}

#[tokio::test]
async fn test_account_delete_purges_deleted_volumes_first() {
    let fake = FakeCluster::new();
    let account_id = fake.add_account("acct6");
    let volume_id = fake.add_deleted_volume("old", account_id);

    assert_eq!(run_command(&fake, &["account-delete", "--account-name", "acct6"]).await, 0);

    assert!(fake.account_named("acct6").is_none());
    assert!(fake.volume(volume_id).is_none());
    let calls = fake.api_calls();
    let purge = calls.iter().position(|m| m == "PurgeDeletedVolumes").expect("purged");
    let remove = calls.iter().position(|m| m == "RemoveAccount").expect("removed");
    assert!(purge < remove);

    let accounts = fake.cluster().list_accounts().await.unwrap();
    assert!(accounts.iter().all(|a| a.username != "acct6"));
}

#[tokio::test]
async fn test_purge_is_one_call_per_volume_on_old_clusters() {
    let fake = FakeCluster::with_version(ApiVersion::V8_0);
    let account_id = fake.add_account("acct");
    fake.add_deleted_volume("old1", account_id);
    fake.add_deleted_volume("old2", account_id);

    assert_eq!(run_command(&fake, &["account-delete", "--account-name", "acct"]).await, 0);
    assert_eq!(fake.call_count("PurgeDeletedVolume"), 2);
    assert_eq!(fake.call_count("PurgeDeletedVolumes"), 0);
}

// ============================================================================
// Volume access groups
// ============================================================================

#[tokio::test]
async fn test_add_existing_wwn_is_a_no_op() {
    let fake = FakeCluster::new();
    fake.add_group("g1", &["10000090fa34ad72"], &[]);

    let code = run_command(
        &fake,
        &["volgroup-add-initiators", "--volgroup-name", "g1", "--initiator", "10:00:00:90:FA:34:AD:72"],
    )
    .await;
    assert_eq!(code, 0);
    assert_eq!(fake.call_count("ModifyVolumeAccessGroup"), 0);

    let code = run_command(
        &fake,
        &["volgroup-add-initiators", "--volgroup-name", "g1", "--initiator", "iqn.1998-01.com.vmware:host2"],
    )
    .await;
    assert_eq!(code, 0);
    assert_eq!(fake.call_count("ModifyVolumeAccessGroup"), 1);
    assert_eq!(fake.group("g1").unwrap().initiators.len(), 2);
}

#[tokio::test]
async fn test_add_wwn_sends_normalized_lists() {
    let fake = FakeCluster::new();
    let group_id = fake.add_group("g1", &["iqn.1998-01.com.vmware:host1"], &[]);

    let code = run_command(
        &fake,
        &["volgroup-add-initiators", "--volgroup-name", "g1", "--initiator", "10:00:00:90:FA:34:AD:72"],
    )
    .await;
    assert_eq!(code, 0);

    let (_, params) = fake
        .calls()
        .into_iter()
        .find(|(m, _)| m == "ModifyVolumeAccessGroup")
        .unwrap();
    assert_eq!(
        params,
        json!({
            "volumeAccessGroupID": group_id,
            "initiators": ["iqn.1998-01.com.vmware:host1", "10000090fa34ad72"],
            "fibreChannelInitiators": ["10000090fa34ad72"],
        })
    );

    // The stored form matches any spelling of the same WWN
    let code = run_command(
        &fake,
        &["volgroup-add-initiators", "--volgroup-name", "g1", "--initiator", "10:00:00:90:fa:34:ad:72"],
    )
    .await;
    assert_eq!(code, 0);
    assert_eq!(fake.call_count("ModifyVolumeAccessGroup"), 1);
}

#[tokio::test]
async fn test_add_wwn_on_old_cluster_sends_unified_list() {
    let fake = FakeCluster::with_version(ApiVersion::V6_0);
    let group_id = fake.add_group("g1", &[], &[]);

    let code = run_command(
        &fake,
        &["volgroup-add-initiators", "--volgroup-name", "g1", "--initiator", "0x10000090FA34AD72"],
    )
    .await;
    assert_eq!(code, 0);

    let (_, params) = fake
        .calls()
        .into_iter()
        .find(|(m, _)| m == "ModifyVolumeAccessGroup")
        .unwrap();
    assert_eq!(params, json!({ "volumeAccessGroupID": group_id, "initiators": ["10000090fa34ad72"] }));
}

#[tokio::test]
async fn test_volgroup_strict_symmetry() {
    let fake = FakeCluster::new();

    assert_eq!(run_command(&fake, &["volgroup-create", "--volgroup-name", "g2"]).await, 0);
    assert_eq!(run_command(&fake, &["volgroup-create", "--volgroup-name", "g2"]).await, 0);
    assert_eq!(run_command(&fake, &["volgroup-create", "--volgroup-name", "g2", "--strict"]).await, 1);
    assert_eq!(fake.call_count("CreateVolumeAccessGroup"), 1);

    assert_eq!(run_command(&fake, &["volgroup-delete", "--volgroup-name", "g2", "--strict"]).await, 0);
    assert_eq!(run_command(&fake, &["volgroup-delete", "--volgroup-name", "g2"]).await, 0);
    assert_eq!(run_command(&fake, &["volgroup-delete", "--volgroup-name", "g2", "--strict"]).await, 1);
}

#[tokio::test]
async fn test_lun_renumber_gives_unique_luns() {
    let fake = FakeCluster::new();
    let account_id = fake.add_account("acct");
    let volumes: Vec<u64> = (0..20).map(|n| fake.add_volume(&format!("lun{}", n), account_id, GB)).collect();
    fake.add_group("g3", &[], &volumes);

    for method in ["seq", "rev", "rand", "vol"] {
        let code = run_command(
            &fake,
            &["volgroup-modify-lun-assignments", "--volgroup-name", "g3", "--method", method],
        )
        .await;
        assert_eq!(code, 0, "method {}", method);

        let group = fake.group("g3").unwrap();
        assert_eq!(group.lun_assignments.len(), volumes.len());
        let luns: HashSet<u32> = group.lun_assignments.iter().map(|a| a.lun).collect();
        assert_eq!(luns.len(), volumes.len(), "duplicate LUN with method {}", method);
        assert!(luns.iter().all(|lun| *lun <= 16383));
    }

    // Twenty volumes do not fit in ten LUNs
    let code = run_command(
        &fake,
        &["volgroup-modify-lun-assignments", "--volgroup-name", "g3", "--lun-min", "0", "--lun-max", "9"],
    )
    .await;
    assert_eq!(code, 1);
}

// ============================================================================
// Volumes
// ============================================================================

#[tokio::test]
async fn test_extend_fan_out_with_one_failure() {
    let fake = FakeCluster::new();
    let account_id = fake.add_account("acct");
    let volumes: Vec<u64> = (1..=50)
        .map(|n| fake.add_volume(&format!("ext{:05}", n), account_id, GB))
        .collect();
    let failing = volumes[17];
    fake.fail_modify(failing);

    let code = run_command(&fake, &["volume-extend", "--volume-prefix", "ext", "--new-size", "2"]).await;
    assert_eq!(code, 1);
    assert_eq!(fake.call_count("ModifyVolume"), 50);

    let extended = volumes
        .iter()
        .filter(|id| fake.volume(**id).unwrap().total_size == 2 * GB)
        .count();
    assert_eq!(extended, 49);
    assert_eq!(fake.volume(failing).unwrap().total_size, GB);

    // The aggregate error names the volume that failed
    let cluster = fake.cluster();
    let targets = cluster.search_volumes(&VolumeSearch::by_ids(volumes.clone())).await.unwrap();
    let report = cluster.extend_volumes(&targets, 3 * GB).await.unwrap();
    assert_eq!(report.success_count, 49);
    assert_eq!(report.failures.keys().cloned().collect::<Vec<_>>(), vec!["ext00018".to_string()]);
    let message = report.into_result("extend").unwrap_err().to_string();
    assert!(message.contains("1 of 50"), "{}", message);
    assert!(message.contains("ext00018"), "{}", message);
}

#[tokio::test]
async fn test_volume_search_round_trip() {
    let fake = FakeCluster::new();
    fake.add_account("acct");

    let code = run_command(
        &fake,
        &["volume-create", "--volume-name", "data1", "--volume-size", "10", "--account-name", "acct"],
    )
    .await;
    assert_eq!(code, 0);

    let cluster = fake.cluster();
    let found = cluster.search_volumes(&VolumeSearch::by_names(["data1"])).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].name, "data1");
    assert_eq!(found[0].total_size, 10 * GB);

    let missing = VolumeSearch {
        prefix: Some("nothing".into()),
        ..Default::default()
    };
    assert!(matches!(cluster.search_volumes(&missing).await, Err(Error::UnknownObject(_))));

    // Creating it again is fine, strictly it is not
    let again = ["volume-create", "--volume-name", "data1", "--volume-size", "10", "--account-name", "acct"];
    assert_eq!(run_command(&fake, &again).await, 0);
    let strict: Vec<&str> = again.iter().copied().chain(["--strict"]).collect();
    assert_eq!(run_command(&fake, &strict).await, 1);
    assert_eq!(fake.call_count("CreateVolume"), 1);
}

#[tokio::test]
async fn test_volume_create_series_in_one_call() {
    let fake = FakeCluster::new();
    fake.add_account("acct");

    let code = run_command(
        &fake,
        &[
            "volume-create",
            "--volume-prefix",
            "bulk",
            "--volume-count",
            "3",
            "--volume-size",
            "1",
            "--account-name",
            "acct",
        ],
    )
    .await;
    assert_eq!(code, 0);
    assert_eq!(fake.call_count("CreateMultipleVolumes"), 1);
    let names: Vec<String> = fake.state().volumes.iter().map(|v| v.name.clone()).collect();
    assert_eq!(names, vec!["bulk00001", "bulk00002", "bulk00003"]);
}

#[tokio::test]
async fn test_volume_delete_and_purge() {
    let fake = FakeCluster::new();
    let account_id = fake.add_account("acct");
    let keep = fake.add_volume("keep", account_id, GB);
    let gone = fake.add_volume("gone", account_id, GB);

    assert_eq!(run_command(&fake, &["volume-delete", "--volume-name", "gone"]).await, 0);
    assert!(fake.volume(gone).unwrap().is_deleted());

    assert_eq!(run_command(&fake, &["volume-purge", "--volume-name", "gone"]).await, 0);
    assert!(fake.volume(gone).is_none());
    assert!(!fake.volume(keep).unwrap().is_deleted());
}

// ============================================================================
// Cluster waits
// ============================================================================

#[tokio::test]
async fn test_wait_for_fullness_polls_until_full() {
    let fake = FakeCluster::new();
    fake.set_used_space(&[120 * GB, 160 * GB]);

    let code = run_command(&fake, &["wait-for-cluster-fullness", "--full", "150", "--timeout", "5"]).await;
    assert_eq!(code, 0);
    assert_eq!(fake.call_count("GetClusterCapacity"), 2);
}

#[tokio::test]
async fn test_wait_for_fullness_times_out() {
    let fake = FakeCluster::new();
    fake.set_used_space(&[100 * GB]);

    let code = run_command(&fake, &["wait-for-cluster-fullness", "--full", "150", "--timeout", "1"]).await;
    assert_eq!(code, 1);
    assert!(fake.call_count("GetClusterCapacity") > 1);
}

#[tokio::test]
async fn test_check_for_event() {
    let fake = FakeCluster::new();
    fake.push_event("Node 3 restarted", "2024-05-01T10:00:00Z", 0, serde_json::Value::Null);

    assert_eq!(run_command(&fake, &["check-for-event", "--event", "restarted"]).await, 0);
    assert_eq!(
        run_command(&fake, &["check-for-event", "--event", "restarted", "--since", "2024-05-01T10:00:00Z"]).await,
        1
    );
    assert_eq!(run_command(&fake, &["check-for-event", "--event", "removed"]).await, 1);
}
