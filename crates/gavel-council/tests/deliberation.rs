//! # Deliberation Integration Tests
//!
//! Routing, concurrent voting and store failure handling across the
//! council's public surface.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gavel_council::{
    AdaptiveRouter, ConsensusReason, CouncilError, Decision, DeliberationQueue, GovernanceRequest,
    ItemStatus, Lane, Vote, VoteOutcome,
};
use gavel_store::{Keyspace, RecordStore, SledStore, StoreError, WriteOp};

/// Wraps a sled store and fails every write while `offline` is set.
struct SwitchableStore {
    inner: SledStore,
    offline: AtomicBool,
    unsynced: AtomicUsize,
    syncs: AtomicUsize,
}

impl SwitchableStore {
    fn new() -> Self {
        Self {
            inner: SledStore::temporary().unwrap(),
            offline: AtomicBool::new(false),
            unsynced: AtomicUsize::new(0),
            syncs: AtomicUsize::new(0),
        }
    }

    fn check(&self) -> gavel_store::Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("store offline".to_string()))
        } else {
            self.unsynced.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Writes not yet followed by a sync.
    fn unsynced(&self) -> usize {
        self.unsynced.load(Ordering::SeqCst)
    }
}

impl RecordStore for SwitchableStore {
    fn get(&self, space: Keyspace, key: &str) -> gavel_store::Result<Option<Vec<u8>>> {
        self.inner.get(space, key)
    }

    fn put(&self, space: Keyspace, key: &str, value: Vec<u8>) -> gavel_store::Result<()> {
        self.check()?;
        self.inner.put(space, key, value)
    }

    fn remove(&self, space: Keyspace, key: &str) -> gavel_store::Result<bool> {
        self.check()?;
        self.inner.remove(space, key)
    }

    fn scan_prefix(
        &self,
        space: Keyspace,
        prefix: &str,
    ) -> gavel_store::Result<Vec<(String, Vec<u8>)>> {
        self.inner.scan_prefix(space, prefix)
    }

    fn apply(&self, space: Keyspace, ops: Vec<WriteOp>) -> gavel_store::Result<()> {
        self.check()?;
        self.inner.apply(space, ops)
    }

    fn sync(&self) -> gavel_store::Result<()> {
        self.inner.sync()?;
        self.unsynced.store(0, Ordering::SeqCst);
        self.syncs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn request(id: &str) -> GovernanceRequest {
    GovernanceRequest::new(id, "expand data retention to 7 years").with_tenant("acme")
}

#[tokio::test]
async fn test_routed_request_reaches_consensus() {
    let queue = Arc::new(DeliberationQueue::new(Arc::new(
        SledStore::temporary().unwrap(),
    )));
    let router = AdaptiveRouter::new(Arc::clone(&queue));

    let decision = router.route(request("r1"), 0.95).await.unwrap();
    assert_eq!(decision.lane, Lane::Deliberation);
    let item_id = decision.item_id.unwrap();

    for (agent, vote) in [
        ("legal", Vote::Approve),
        ("security", Vote::Approve),
        ("privacy", Vote::Approve),
        ("finance", Vote::Reject),
    ] {
        queue
            .submit_vote(&item_id, agent, vote, "reviewed", 0.9)
            .await
            .unwrap();
    }

    let item = queue.get_status(&item_id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::ConsensusReached);
    assert_eq!(item.decision, Some(Decision::Approved));
}

#[tokio::test]
async fn test_split_vote_stays_open() {
    let queue = DeliberationQueue::new(Arc::new(SledStore::temporary().unwrap()));
    let item_id = queue
        .enqueue(request("r2"), 3, 0.66, Duration::from_secs(60))
        .await
        .unwrap();

    let mut last = None;
    for (agent, vote) in [
        ("a", Vote::Approve),
        ("b", Vote::Approve),
        ("c", Vote::Reject),
        ("d", Vote::Reject),
    ] {
        last = Some(
            queue
                .submit_vote(&item_id, agent, vote, "", 1.0)
                .await
                .unwrap(),
        );
    }

    match last.unwrap() {
        VoteOutcome::Counted { status, verdict } => {
            assert_eq!(status, ItemStatus::UnderReview);
            assert_eq!(verdict.reason, ConsensusReason::ThresholdNotMet);
        }
        other => panic!("expected Counted, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_votes_keep_one_per_agent() {
    let queue = Arc::new(DeliberationQueue::new(Arc::new(
        SledStore::temporary().unwrap(),
    )));
    let item_id = queue
        .enqueue(request("r3"), 10, 0.66, Duration::from_secs(60))
        .await
        .unwrap();

    let mut tasks = Vec::new();
    for round in 0..5 {
        for agent in 0..10 {
            let queue = Arc::clone(&queue);
            let item_id = item_id.clone();
            tasks.push(tokio::spawn(async move {
                let vote = if round % 2 == 0 { Vote::Approve } else { Vote::Reject };
                queue
                    .submit_vote(&item_id, &format!("agent-{}", agent), vote, "", 0.5)
                    .await
                    .unwrap()
            }));
        }
    }
    for task in tasks {
        assert!(task.await.unwrap().accepted());
    }

    let item = queue.get_status(&item_id).await.unwrap().unwrap();
    assert_eq!(item.votes.len(), 10);
    let mut agents: Vec<&str> = item.votes.iter().map(|v| v.agent_id.as_str()).collect();
    agents.sort();
    agents.dedup();
    assert_eq!(agents.len(), 10);
}

#[tokio::test]
async fn test_store_outage_aborts_vote() {
    let store = Arc::new(SwitchableStore::new());
    let queue = DeliberationQueue::new(store.clone());
    let item_id = queue
        .enqueue(request("r4"), 1, 0.5, Duration::from_secs(60))
        .await
        .unwrap();

    store.offline.store(true, Ordering::SeqCst);
    let err = queue
        .submit_vote(&item_id, "a", Vote::Approve, "", 1.0)
        .await
        .unwrap_err();
    assert!(matches!(err, CouncilError::Store(_)));
    assert!(err.is_retryable());

    // nothing was written
    let item = queue.get_status(&item_id).await.unwrap().unwrap();
    assert_eq!(item.status, ItemStatus::Pending);
    assert!(item.votes.is_empty());

    store.offline.store(false, Ordering::SeqCst);
    let outcome = queue
        .submit_vote(&item_id, "a", Vote::Approve, "", 1.0)
        .await
        .unwrap();
    assert!(outcome.accepted());
}

#[tokio::test]
async fn test_vote_is_synced_before_reply() {
    let store = Arc::new(SwitchableStore::new());
    let queue = DeliberationQueue::new(store.clone());
    let item_id = queue
        .enqueue(request("r7"), 1, 0.5, Duration::from_secs(60))
        .await
        .unwrap();
    assert_eq!(store.unsynced(), 0);

    let outcome = queue
        .submit_vote(&item_id, "a", Vote::Approve, "", 1.0)
        .await
        .unwrap();
    assert!(outcome.accepted());
    assert_eq!(store.unsynced(), 0);
    assert_eq!(store.syncs.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_store_outage_fails_routing() {
    let store = Arc::new(SwitchableStore::new());
    let queue = Arc::new(DeliberationQueue::new(store.clone()));
    let router = AdaptiveRouter::new(queue);

    store.offline.store(true, Ordering::SeqCst);
    assert!(router.route(request("r5"), 0.99).await.is_err());

    // the fast lane never touches the store
    let decision = router.route(request("r6"), 0.01).await.unwrap();
    assert_eq!(decision.lane, Lane::Fast);
    assert_eq!(router.stats().total_routed, 1);
}
