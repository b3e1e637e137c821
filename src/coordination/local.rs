//! Single-instance coordination backend.
//!
//! Checkpoints live in an embedded sled tree; the lock only excludes other
//! managers inside the same process. Suitable for one-replica deployments
//! and for exercising the leadership logic in tests.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::Notify;
use tracing::debug;
use tracing::info;

use super::CheckpointStore;
use super::LeaseHandle;
use super::LeaseNotice;
use super::LockLease;
use super::LockService;
use crate::CoordinationError;
use crate::Result;

pub(crate) const CHECKPOINT_TREE: &str = "_firehose_checkpoints";

#[derive(Clone)]
pub struct SledCheckpointStore {
    _db: Arc<sled::Db>,
    tree: Arc<sled::Tree>,
}

impl std::fmt::Debug for SledCheckpointStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledCheckpointStore")
            .field("tree_len", &self.tree.len())
            .finish()
    }
}

impl SledCheckpointStore {
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path).map_err(CoordinationError::from)?;
        Self::new(Arc::new(db))
    }

    pub fn new(db: Arc<sled::Db>) -> Result<Self> {
        let tree = db.open_tree(CHECKPOINT_TREE).map_err(CoordinationError::from)?;
        Ok(Self {
            _db: db,
            tree: Arc::new(tree),
        })
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.tree.len()
    }
}

#[async_trait]
impl CheckpointStore for SledCheckpointStore {
    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<Vec<u8>>> {
        match self.tree.get(key).map_err(CoordinationError::from)? {
            Some(ivec) => Ok(Some(ivec.to_vec())),
            None => Ok(None),
        }
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
    ) -> Result<()> {
        self.tree.insert(key, value).map_err(CoordinationError::from)?;

        // a checkpoint that is not on disk is not a checkpoint
        let bytes = self.tree.flush_async().await.map_err(CoordinationError::from)?;
        debug!("flushed checkpoint {}, bytes flushed: {}", key, bytes);
        Ok(())
    }
}

struct Holder {
    session_id: String,
    // dropping the sender closes the lease monitor
    _monitor: mpsc::Sender<LeaseNotice>,
}

#[derive(Default)]
struct LockTable {
    holders: Mutex<HashMap<String, Holder>>,
    released: Notify,
    next_session: AtomicU64,
}

/// Process-local mutual exclusion keyed by lock name
#[derive(Clone, Default)]
pub struct InProcessLockService {
    table: Arc<LockTable>,
}

impl std::fmt::Debug for InProcessLockService {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("InProcessLockService")
            .field("held", &self.table.holders.lock().len())
            .finish()
    }
}

impl InProcessLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current holder session of `key`, if any
    pub fn holder(
        &self,
        key: &str,
    ) -> Option<String> {
        self.table.holders.lock().get(key).map(|h| h.session_id.clone())
    }

    /// Drops the current holder of `key` as if its session expired. The
    /// holder's monitor channel closes and waiters may acquire.
    pub fn revoke(
        &self,
        key: &str,
    ) -> bool {
        let removed = self.table.holders.lock().remove(key).is_some();
        if removed {
            info!(key, "lock revoked");
            self.table.released.notify_waiters();
        }
        removed
    }

    fn try_grant(
        &self,
        key: &str,
        session_name: &str,
    ) -> Option<LockLease> {
        let mut holders = self.table.holders.lock();
        if holders.contains_key(key) {
            return None;
        }

        let seq = self.table.next_session.fetch_add(1, Ordering::SeqCst) + 1;
        let session_id = format!("{session_name}-{seq}");
        // the local backend never sends notices; the channel only signals loss
        let (monitor_tx, monitor_rx) = mpsc::channel(1);
        holders.insert(
            key.to_string(),
            Holder {
                session_id: session_id.clone(),
                _monitor: monitor_tx,
            },
        );

        let handle = InProcessLeaseHandle {
            table: self.table.clone(),
            key: key.to_string(),
            session_id: session_id.clone(),
        };
        Some(LockLease::new(key.to_string(), session_id, monitor_rx, Box::new(handle)))
    }
}

#[async_trait]
impl LockService for InProcessLockService {
    async fn acquire(
        &self,
        key: &str,
        session_name: &str,
        _session_ttl: Duration,
    ) -> Result<LockLease> {
        loop {
            // register interest before checking so a release in between is not missed
            let released = self.table.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();

            if let Some(lease) = self.try_grant(key, session_name) {
                debug!(key, session_id = lease.session_id(), "lock granted");
                return Ok(lease);
            }

            released.await;
        }
    }
}

struct InProcessLeaseHandle {
    table: Arc<LockTable>,
    key: String,
    session_id: String,
}

#[async_trait]
impl LeaseHandle for InProcessLeaseHandle {
    async fn release(&self) -> Result<()> {
        let released = {
            let mut holders = self.table.holders.lock();
            let owned = holders
                .get(&self.key)
                .is_some_and(|h| h.session_id == self.session_id);
            if owned {
                holders.remove(&self.key);
            }
            owned
        };

        if !released {
            // already revoked or taken over
            return Err(CoordinationError::Release {
                key: self.key.clone(),
                reason: format!("session {} no longer holds the lock", self.session_id),
            }
            .into());
        }

        self.table.released.notify_waiters();
        Ok(())
    }
}
