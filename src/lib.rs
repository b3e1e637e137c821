//! Leader-elected firehose for Nomad.
//!
//! One process instance per resource kind competes for a lock; the winner
//! long-polls the orchestrator, publishes every changed record to a sink and
//! checkpoints its progress so the next leader resumes where it stopped.

mod config;
mod coordination;
mod errors;
mod leadership;
pub mod metrics;
mod sink;
mod upstream;
mod watcher;

pub use config::*;
pub use coordination::*;
pub use errors::*;
pub use leadership::*;
pub use sink::*;
pub use upstream::*;
pub use watcher::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
