//! Leader election per watcher role.
//!
//! The [`Manager`] holds the role lock, restores the checkpoint, runs one
//! watcher per term and persists the watermark it reports.

mod manager;
pub use manager::*;
