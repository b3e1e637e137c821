//! Coordination seam: durable checkpoints and leader locks.
//!
//! Both capabilities are session-free from the caller's point of view: a
//! [`CheckpointStore`] is a plain key/value holder, and a [`LockService`]
//! hands out a [`LockLease`] whose monitor channel closes once ownership is
//! gone.

mod checkpoint;
mod consul;
mod local;
pub use checkpoint::*;
pub use consul::*;
pub use local::*;

#[cfg(test)]
mod local_test;

use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tokio::sync::mpsc;

use crate::Result;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CheckpointStore: Send + Sync + 'static {
    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<Vec<u8>>>;

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
    ) -> Result<()>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait LockService: Send + Sync + 'static {
    /// Blocks until the lock on `key` is granted to a fresh session or the
    /// backend fails. Contention is not an error; it just keeps waiting.
    async fn acquire(
        &self,
        key: &str,
        session_name: &str,
        session_ttl: Duration,
    ) -> Result<LockLease>;
}

/// Non-fatal messages from a lease monitor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeaseNotice {
    /// The monitor could not confirm ownership and is retrying
    MonitorRetry { attempt: u32, reason: String },
}

/// Backend-specific release of a held lease
#[async_trait]
pub trait LeaseHandle: Send + Sync {
    async fn release(&self) -> Result<()>;
}

/// Exclusive ownership of one watcher role.
///
/// The monitor channel closes when ownership is lost (session expired, key
/// taken over, monitor retries exhausted).
pub struct LockLease {
    key: String,
    session_id: String,
    monitor: mpsc::Receiver<LeaseNotice>,
    handle: Box<dyn LeaseHandle>,
}

impl std::fmt::Debug for LockLease {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("LockLease")
            .field("key", &self.key)
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl LockLease {
    pub fn new(
        key: String,
        session_id: String,
        monitor: mpsc::Receiver<LeaseNotice>,
        handle: Box<dyn LeaseHandle>,
    ) -> Self {
        Self {
            key,
            session_id,
            monitor,
            handle,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Next monitor message; `None` means the lock is lost.
    pub async fn next_notice(&mut self) -> Option<LeaseNotice> {
        self.monitor.recv().await
    }

    pub async fn release(self) -> Result<()> {
        self.handle.release().await
    }
}
