use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Leader election timing
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LeadershipConfig {
    /// Pause between lock acquisition attempts
    #[serde(default = "default_acquire_interval_ms")]
    pub acquire_interval_ms: u64,
}

impl Default for LeadershipConfig {
    fn default() -> Self {
        Self {
            acquire_interval_ms: default_acquire_interval_ms(),
        }
    }
}

impl LeadershipConfig {
    pub fn validate(&self) -> Result<()> {
        if self.acquire_interval_ms == 0 {
            return Err(Error::InvalidConfig("leadership.acquire_interval_ms cannot be 0".into()));
        }
        Ok(())
    }

    pub fn acquire_interval(&self) -> Duration {
        Duration::from_millis(self.acquire_interval_ms)
    }
}

/// Long-poll loop parameters shared by every resource kind
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct WatcherConfig {
    /// Server-side wait of each blocking list query
    #[serde(default = "default_wait_time_secs")]
    pub wait_time_secs: u64,

    #[serde(default = "default_allow_stale")]
    pub allow_stale: bool,

    /// Fixed sleep after a failed list query
    #[serde(default = "default_error_backoff_ms")]
    pub error_backoff_ms: u64,

    /// How often the watermark is reported for persistence
    #[serde(default = "default_report_interval_ms")]
    pub report_interval_ms: u64,

    /// Upper bound on waiting for in-flight fetch tasks during stop
    #[serde(default = "default_inflight_grace_ms")]
    pub inflight_grace_ms: u64,

    #[serde(default = "default_update_channel_capacity")]
    pub update_channel_capacity: usize,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            wait_time_secs: default_wait_time_secs(),
            allow_stale: default_allow_stale(),
            error_backoff_ms: default_error_backoff_ms(),
            report_interval_ms: default_report_interval_ms(),
            inflight_grace_ms: default_inflight_grace_ms(),
            update_channel_capacity: default_update_channel_capacity(),
        }
    }
}

impl WatcherConfig {
    pub fn validate(&self) -> Result<()> {
        if self.wait_time_secs == 0 {
            return Err(Error::InvalidConfig("watcher.wait_time_secs cannot be 0".into()));
        }

        if self.report_interval_ms == 0 {
            return Err(Error::InvalidConfig("watcher.report_interval_ms cannot be 0".into()));
        }

        if self.update_channel_capacity == 0 {
            return Err(Error::InvalidConfig(
                "watcher.update_channel_capacity must be at least 1".into(),
            ));
        }

        Ok(())
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.wait_time_secs)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn report_interval(&self) -> Duration {
        Duration::from_millis(self.report_interval_ms)
    }

    pub fn inflight_grace(&self) -> Duration {
        Duration::from_millis(self.inflight_grace_ms)
    }
}

fn default_acquire_interval_ms() -> u64 {
    250
}
fn default_wait_time_secs() -> u64 {
    300
}
fn default_allow_stale() -> bool {
    true
}
fn default_error_backoff_ms() -> u64 {
    10_000
}
fn default_report_interval_ms() -> u64 {
    5_000
}
fn default_inflight_grace_ms() -> u64 {
    5_000
}
fn default_update_channel_capacity() -> usize {
    1
}
