//! Resumable long-poll watch loop.
//!
//! A single loop implementation serves every resource kind. What happens to
//! a changed item (fetch and publish the record, publish the list entry,
//! split an allocation into task events) is a [`PublishStrategy`] chosen by
//! the [`FirehoseKind`].

mod allocation;
mod kind;
mod resource_watcher;
mod strategy;

pub use allocation::*;
pub use kind::*;
pub use resource_watcher::*;
pub use strategy::*;

#[cfg(test)]
mod allocation_test;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::ChangeItem;
use crate::Result;

/// Per-item work dispatched for every changed list entry
#[cfg_attr(test, automock)]
#[async_trait]
pub trait PublishStrategy: Send + Sync + 'static {
    async fn handle(
        &self,
        item: ChangeItem,
    ) -> Result<()>;
}
