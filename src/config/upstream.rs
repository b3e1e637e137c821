use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Connection settings for the Nomad HTTP API
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct UpstreamConfig {
    #[serde(default = "default_upstream_address")]
    pub address: String,

    /// ACL token sent as `X-Nomad-Token`
    #[serde(default)]
    pub token: Option<String>,

    #[serde(default)]
    pub region: Option<String>,

    /// Timeout for non-blocking calls (record lookups). Blocking list queries
    /// use the watcher wait time plus `blocking_slack_ms`.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Extra time granted to blocking queries on top of the requested wait,
    /// the server adds up to wait/16 of jitter
    #[serde(default = "default_blocking_slack_ms")]
    pub blocking_slack_ms: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: default_upstream_address(),
            token: None,
            region: None,
            request_timeout_ms: default_request_timeout_ms(),
            blocking_slack_ms: default_blocking_slack_ms(),
        }
    }
}

impl UpstreamConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.address.starts_with("http://") || self.address.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "upstream.address must be an http(s) URL, got {:?}",
                self.address
            )));
        }

        if self.request_timeout_ms == 0 {
            return Err(Error::InvalidConfig("upstream.request_timeout_ms cannot be 0".into()));
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn blocking_slack(&self) -> Duration {
        Duration::from_millis(self.blocking_slack_ms)
    }
}

fn default_upstream_address() -> String {
    "http://127.0.0.1:4646".to_string()
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_blocking_slack_ms() -> u64 {
    30_000
}
