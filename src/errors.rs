//! Firehose Error Hierarchy
//!
//! Errors are grouped by the collaborator that produced them. Steady-state
//! failures (upstream queries, checkpoint writes, sink publishes) are absorbed
//! locally with logging; only configuration errors and lock acquisition
//! failures travel up to the process boundary.

use std::time::Duration;

use config::ConfigError;
use tokio::task::JoinError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Orchestrator API failures (list/info calls)
    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    /// Checkpoint store and distributed lock failures
    #[error(transparent)]
    Coordination(#[from] CoordinationError),

    /// Event destination failures
    #[error(transparent)]
    Sink(#[from] SinkError),

    /// Configuration source loading failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Configuration values rejected by validation
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Event payload encoding failures
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    TaskFailed(#[from] JoinError),

    /// Unrecoverable failures requiring process termination
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    /// Transport level failure talking to the orchestrator
    #[error("Request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// Non-success HTTP status
    #[error("Unexpected status {status} from {endpoint}")]
    Status { endpoint: String, status: u16 },

    /// Blocking query response without a usable index header
    #[error("Missing or malformed index header on {endpoint}")]
    MissingIndex { endpoint: String },

    /// Response body did not match the expected shape
    #[error("Malformed response from {endpoint}: {reason}")]
    Malformed { endpoint: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum CoordinationError {
    /// KV read/write failure on the checkpoint key
    #[error("Checkpoint operation on {key} failed: {reason}")]
    Checkpoint { key: String, reason: String },

    /// Session creation failure
    #[error("Failed to create session {name}: {reason}")]
    Session { name: String, reason: String },

    /// Lock acquisition call failed (not merely contended)
    #[error("Failed to acquire lock {key}: {reason}")]
    Acquire { key: String, reason: String },

    /// Lock release call failed
    #[error("Failed to release lock {key}: {reason}")]
    Release { key: String, reason: String },

    /// Coordination backend transport error
    #[error("Coordination request to {endpoint} failed: {source}")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },

    /// Embedded database errors
    #[error(transparent)]
    Sled(#[from] sled::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    /// `put` called after `stop` began
    #[error("Sink {0} is stopped and no longer accepts messages")]
    Stopped(&'static str),

    /// Writer tasks are gone while the queue is still open
    #[error("Sink {0} queue is closed")]
    QueueClosed(&'static str),

    /// Destination rejected or failed a write
    #[error("Publish to {destination} failed: {reason}")]
    Publish { destination: String, reason: String },

    /// Destination timed out
    #[error("Publish to {destination} timed out after {duration:?}")]
    Timeout {
        destination: String,
        duration: Duration,
    },

    /// Stdout or other local IO failure
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
