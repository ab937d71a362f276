//! # Persistence Integration Tests
//!
//! Verifies that records written through `SledStore` survive a reopen of
//! the on-disk database and that expiry behaves across keyspaces.

use std::time::Duration;

use gavel_store::{Keyspace, RecordStore, RecordStoreExt, SledStore, WriteOp};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Item {
    id: String,
    status: String,
}

#[test]
fn test_records_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("gavel.db");

    {
        let store = SledStore::open(&path).unwrap();
        store
            .put_json(
                Keyspace::Approvals,
                "req-1",
                &Item {
                    id: "req-1".to_string(),
                    status: "pending".to_string(),
                },
            )
            .unwrap();
        store.flush().unwrap();
    }

    let reopened = SledStore::open(&path).unwrap();
    let item: Item = reopened
        .get_json(Keyspace::Approvals, "req-1")
        .unwrap()
        .unwrap();
    assert_eq!(item.status, "pending");
}

#[test]
fn test_synced_batch_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("gavel.db");

    {
        let store = SledStore::open(&path).unwrap();
        let op = WriteOp::put_json(
            "req-2",
            &Item {
                id: "req-2".to_string(),
                status: "approved".to_string(),
            },
        )
        .unwrap();
        store.apply(Keyspace::Approvals, vec![op]).unwrap();
        store.sync().unwrap();
    }

    let reopened = SledStore::open(&path).unwrap();
    let item: Item = reopened
        .get_json(Keyspace::Approvals, "req-2")
        .unwrap()
        .unwrap();
    assert_eq!(item.status, "approved");
}

#[test]
fn test_batch_with_votes_survives_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("gavel.db");

    {
        let store = SledStore::open(&path).unwrap();
        store
            .apply(
                Keyspace::Deliberations,
                vec![
                    WriteOp::put_json(
                        "item-1",
                        &Item {
                            id: "item-1".to_string(),
                            status: "under_review".to_string(),
                        },
                    )
                    .unwrap(),
                    WriteOp::put_json("item-1/votes/agent-a", &"approve").unwrap(),
                    WriteOp::put_json("item-1/votes/agent-b", &"reject").unwrap(),
                ],
            )
            .unwrap();
        store.flush().unwrap();
    }

    let reopened = SledStore::open(&path).unwrap();
    let votes: Vec<(String, String)> = reopened
        .scan_json(Keyspace::Deliberations, "item-1/votes/")
        .unwrap();
    assert_eq!(votes.len(), 2);
    assert_eq!(votes[0].1, "approve");
    assert_eq!(votes[1].1, "reject");
}

#[test]
fn test_ttl_applies_per_store_instance() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("gavel.db");

    let expiring = SledStore::open(&path).unwrap().with_ttl(Duration::ZERO);
    expiring
        .put(Keyspace::Deliberations, "item-x", b"{}".to_vec())
        .unwrap();
    assert!(expiring
        .get(Keyspace::Deliberations, "item-x")
        .unwrap()
        .is_none());

    let durable = expiring.clone().with_ttl(Duration::from_secs(3600));
    durable
        .put(Keyspace::Deliberations, "item-y", b"{}".to_vec())
        .unwrap();
    assert!(durable
        .get(Keyspace::Deliberations, "item-y")
        .unwrap()
        .is_some());
}
