use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;
use tokio::time::timeout;

use super::*;

const LOCK_KEY: &str = "nomad-firehose/jobs.lock";
const TTL: Duration = Duration::from_secs(15);

#[tokio::test]
async fn test_sled_store_round_trip_survives_reopen() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("firehose");

    {
        let store = SledCheckpointStore::open(&path).unwrap();
        assert_eq!(store.get("a").await.unwrap(), None);
        store.put("a", b"17".to_vec()).await.unwrap();
        store.put("a", b"18".to_vec()).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    let reopened = SledCheckpointStore::open(&path).unwrap();
    assert_eq!(reopened.get("a").await.unwrap(), Some(b"18".to_vec()));

    let checkpointer = Checkpointer::new(Arc::new(reopened), "a".to_string());
    assert_eq!(checkpointer.restore().await.unwrap(), 18);
}

#[tokio::test]
async fn test_lock_grants_fresh_session_ids() {
    let locks = InProcessLockService::new();

    let lease = locks.acquire(LOCK_KEY, "nomad-firehose-jobs", TTL).await.unwrap();
    assert_eq!(lease.key(), LOCK_KEY);
    assert_eq!(lease.session_id(), "nomad-firehose-jobs-1");
    assert_eq!(locks.holder(LOCK_KEY).as_deref(), Some("nomad-firehose-jobs-1"));

    lease.release().await.unwrap();
    assert_eq!(locks.holder(LOCK_KEY), None);

    let lease = locks.acquire(LOCK_KEY, "nomad-firehose-jobs", TTL).await.unwrap();
    assert_eq!(lease.session_id(), "nomad-firehose-jobs-2");
}

#[tokio::test]
async fn test_second_acquirer_waits_for_release() {
    let locks = InProcessLockService::new();
    let first = locks.acquire(LOCK_KEY, "a", TTL).await.unwrap();

    let contender = {
        let locks = locks.clone();
        tokio::spawn(async move { locks.acquire(LOCK_KEY, "b", TTL).await })
    };

    // still blocked while the first lease is held
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!contender.is_finished());

    first.release().await.unwrap();
    let second = timeout(Duration::from_secs(1), contender)
        .await
        .expect("contender should be granted")
        .unwrap()
        .unwrap();
    assert!(second.session_id().starts_with("b-"));
}

#[tokio::test]
async fn test_independent_keys_do_not_contend() {
    let locks = InProcessLockService::new();
    let _jobs = locks.acquire("jobs.lock", "a", TTL).await.unwrap();
    let nodes = timeout(Duration::from_millis(100), locks.acquire("nodes.lock", "a", TTL)).await;
    assert!(nodes.is_ok());
}

#[tokio::test]
async fn test_revoke_closes_monitor_and_frees_key() {
    let locks = InProcessLockService::new();
    let mut lease = locks.acquire(LOCK_KEY, "a", TTL).await.unwrap();

    assert!(locks.revoke(LOCK_KEY));
    let notice = timeout(Duration::from_millis(100), lease.next_notice()).await.unwrap();
    assert_eq!(notice, None);

    // the revoked session may not release someone else's lock
    let other = locks.acquire(LOCK_KEY, "b", TTL).await.unwrap();
    assert!(lease.release().await.is_err());
    assert_eq!(locks.holder(LOCK_KEY).as_deref(), Some(other.session_id()));
}

#[tokio::test]
async fn test_revoke_unknown_key_is_noop() {
    let locks = InProcessLockService::new();
    assert!(!locks.revoke("missing"));
}
