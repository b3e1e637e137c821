use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Which KV + lock service backs checkpoints and leader election
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CoordinationBackend {
    /// Consul sessions and KV
    Consul,
    /// Sled checkpoint file and an in-process lock. Single instance only.
    Local,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CoordinationConfig {
    #[serde(default = "default_backend")]
    pub backend: CoordinationBackend,

    /// Namespace prepended to every checkpoint and lock key
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    /// Consecutive monitor failures tolerated before the lock is considered lost
    #[serde(default = "default_monitor_retries")]
    pub monitor_retries: u32,

    #[serde(default = "default_monitor_retry_ms")]
    pub monitor_retry_ms: u64,

    /// First delay between checkpoint reads when the store is unreachable at
    /// the start of a term; doubles up to `restore_retry_max_ms`
    #[serde(default = "default_restore_retry_ms")]
    pub restore_retry_ms: u64,

    #[serde(default = "default_restore_retry_max_ms")]
    pub restore_retry_max_ms: u64,

    #[serde(default)]
    pub consul: ConsulConfig,

    #[serde(default)]
    pub local: LocalConfig,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            key_prefix: default_key_prefix(),
            session_ttl_secs: default_session_ttl_secs(),
            monitor_retries: default_monitor_retries(),
            monitor_retry_ms: default_monitor_retry_ms(),
            restore_retry_ms: default_restore_retry_ms(),
            restore_retry_max_ms: default_restore_retry_max_ms(),
            consul: ConsulConfig::default(),
            local: LocalConfig::default(),
        }
    }
}

impl CoordinationConfig {
    pub fn validate(&self) -> Result<()> {
        // Consul rejects session TTLs outside 10s..=86400s
        if !(10..=86_400).contains(&self.session_ttl_secs) {
            return Err(Error::InvalidConfig(format!(
                "coordination.session_ttl_secs must be within 10..=86400, got {}",
                self.session_ttl_secs
            )));
        }

        if self.monitor_retry_ms == 0 {
            return Err(Error::InvalidConfig("coordination.monitor_retry_ms cannot be 0".into()));
        }

        if self.restore_retry_ms == 0 || self.restore_retry_max_ms < self.restore_retry_ms {
            return Err(Error::InvalidConfig(format!(
                "coordination.restore_retry_ms must be > 0 and <= restore_retry_max_ms, got {} and {}",
                self.restore_retry_ms, self.restore_retry_max_ms
            )));
        }

        match self.backend {
            CoordinationBackend::Consul => self.consul.validate(),
            CoordinationBackend::Local => self.local.validate(),
        }
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }

    pub fn monitor_retry(&self) -> Duration {
        Duration::from_millis(self.monitor_retry_ms)
    }

    pub fn restore_retry(&self) -> Duration {
        Duration::from_millis(self.restore_retry_ms)
    }

    pub fn restore_retry_max(&self) -> Duration {
        Duration::from_millis(self.restore_retry_max_ms)
    }

    /// Key holding the persisted watermark for one watcher role
    pub fn checkpoint_key(
        &self,
        name: &str,
    ) -> String {
        format!("{}{}.value", self.key_prefix, name)
    }

    /// Key holding the newest published task event time, allocations only
    pub fn event_time_key(
        &self,
        name: &str,
    ) -> String {
        format!("{}{}.event_time", self.key_prefix, name)
    }

    /// Key guarded by the leader lock for one watcher role
    pub fn lock_key(
        &self,
        name: &str,
    ) -> String {
        format!("{}{}.lock", self.key_prefix, name)
    }

    pub fn session_name(
        &self,
        name: &str,
    ) -> String {
        format!("nomad-firehose-{name}")
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ConsulConfig {
    #[serde(default = "default_consul_address")]
    pub address: String,

    /// ACL token sent as `X-Consul-Token`
    #[serde(default)]
    pub token: Option<String>,
}

impl Default for ConsulConfig {
    fn default() -> Self {
        Self {
            address: default_consul_address(),
            token: None,
        }
    }
}

impl ConsulConfig {
    fn validate(&self) -> Result<()> {
        if !(self.address.starts_with("http://") || self.address.starts_with("https://")) {
            return Err(Error::InvalidConfig(format!(
                "coordination.consul.address must be an http(s) URL, got {:?}",
                self.address
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LocalConfig {
    #[serde(default = "default_local_db_path")]
    pub db_path: PathBuf,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            db_path: default_local_db_path(),
        }
    }
}

impl LocalConfig {
    fn validate(&self) -> Result<()> {
        if self.db_path.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("coordination.local.db_path cannot be empty".into()));
        }
        Ok(())
    }
}

fn default_backend() -> CoordinationBackend {
    CoordinationBackend::Consul
}
fn default_key_prefix() -> String {
    "nomad-firehose/".to_string()
}
fn default_session_ttl_secs() -> u64 {
    15
}
fn default_monitor_retries() -> u32 {
    10
}
fn default_monitor_retry_ms() -> u64 {
    5_000
}
fn default_restore_retry_ms() -> u64 {
    1_000
}
fn default_restore_retry_max_ms() -> u64 {
    30_000
}
fn default_consul_address() -> String {
    "http://127.0.0.1:8500".to_string()
}
fn default_local_db_path() -> PathBuf {
    PathBuf::from("./db/firehose")
}
