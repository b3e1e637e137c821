//! Configuration management for the firehose process.
//!
//! Provides hierarchical configuration loading and validation with:
//! - Default values as code base
//! - Configuration file support (`CONFIG_PATH`)
//! - Environment variable overrides (`FIREHOSE__SECTION__FIELD`)
//! - Component-wise validation
mod coordination;
mod monitoring;
mod sink;
mod upstream;
mod watcher;
pub use coordination::*;
pub use monitoring::*;
pub use sink::*;
pub use upstream::*;
pub use watcher::*;


use std::env;
use std::fmt::Debug;

use config::Config;
use config::Environment;
use config::File;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

const ENV_PREFIX: &str = "FIREHOSE";

/// Main configuration container
///
/// Combines all subsystem configurations with hierarchical override support:
/// 1. Default values from code implementation
/// 2. Configuration file specified by `CONFIG_PATH`
/// 3. Environment variables (highest priority)
#[derive(Serialize, Deserialize, Clone, Default)]
pub struct FirehoseConfig {
    /// Orchestrator API connection
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Checkpoint store and lock service
    #[serde(default)]
    pub coordination: CoordinationConfig,
    /// Leader election timing
    #[serde(default)]
    pub leadership: LeadershipConfig,
    /// Long-poll loop parameters
    #[serde(default)]
    pub watcher: WatcherConfig,
    /// Event destination
    #[serde(default)]
    pub sink: SinkConfig,
    /// Metrics endpoint
    #[serde(default)]
    pub monitoring: MonitoringConfig,
}

impl Debug for FirehoseConfig {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        // tokens stay out of logs
        f.debug_struct("FirehoseConfig")
            .field("upstream", &self.upstream.address)
            .field("coordination", &self.coordination.backend)
            .field("sink", &self.sink.kind)
            .finish()
    }
}

impl FirehoseConfig {
    /// Loads configuration from hierarchical sources without validation.
    ///
    /// Configuration sources are merged in the following order (later sources override earlier):
    /// 1. Type defaults (lowest priority)
    /// 2. Configuration file from `CONFIG_PATH` environment variable (if set)
    /// 3. Environment variables with `FIREHOSE__` prefix (highest priority)
    ///
    /// # Note
    /// Validation is deferred so callers can apply `with_override_config()`
    /// first. Call `validate()` before using the configuration.
    pub fn new() -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        if let Ok(config_path) = env::var("CONFIG_PATH") {
            builder = builder.add_source(File::with_name(&config_path).required(true));
        }

        builder = builder.add_source(env_source());

        let config: Self = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Applies additional configuration overrides from file without validation.
    ///
    /// Merging order (later sources override earlier):
    /// 1. Current configuration values
    /// 2. New configuration file
    /// 3. Latest environment variables (highest priority)
    pub fn with_override_config(
        &self,
        path: &str,
    ) -> Result<Self> {
        let config: Self = Config::builder()
            .add_source(Config::try_from(self)?)
            .add_source(File::with_name(path))
            .add_source(env_source())
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// Validates configuration and returns validated instance.
    ///
    /// A missing sink destination is the classic startup misconfiguration
    /// and surfaces here, before any watch loop starts.
    pub fn validate(self) -> Result<Self> {
        self.upstream.validate()?;
        self.coordination.validate()?;
        self.leadership.validate()?;
        self.watcher.validate()?;
        self.sink.validate()?;
        self.monitoring.validate()?;
        Ok(self)
    }
}

fn env_source() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .separator("__")
        .ignore_empty(true)
        .try_parsing(true)
}
