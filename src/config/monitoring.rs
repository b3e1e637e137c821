use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::net::SocketAddr;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// Prometheus `/metrics` endpoint of the firehose process.
///
/// Disabled by default; the counters are still registered so a disabled
/// endpoint costs nothing but the scrape.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MonitoringConfig {
    #[serde(default = "default_prometheus_enabled")]
    pub prometheus_enabled: bool,

    #[serde(default = "default_prometheus_bind_address")]
    pub prometheus_bind_address: IpAddr,

    #[serde(default = "default_prometheus_port")]
    pub prometheus_port: u16,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            prometheus_enabled: default_prometheus_enabled(),
            prometheus_bind_address: default_prometheus_bind_address(),
            prometheus_port: default_prometheus_port(),
        }
    }
}

impl MonitoringConfig {
    /// # Errors
    /// `Error::InvalidConfig` when the metrics endpoint is enabled on port 0
    /// or on a port below 1024
    pub fn validate(&self) -> Result<()> {
        if !self.prometheus_enabled {
            if self.prometheus_port != default_prometheus_port() {
                tracing::warn!(
                    "monitoring.prometheus_port is {} but the metrics endpoint is disabled",
                    self.prometheus_port
                );
            }
            return Ok(());
        }

        if self.prometheus_port == 0 {
            return Err(Error::InvalidConfig(
                "monitoring.prometheus_port cannot be 0 when the metrics endpoint is enabled".into(),
            ));
        }
        if self.prometheus_port < 1024 {
            return Err(Error::InvalidConfig(format!(
                "monitoring.prometheus_port {} is privileged, pick a port >= 1024 for /metrics",
                self.prometheus_port
            )));
        }
        Ok(())
    }

    /// Socket the `/metrics` endpoint listens on
    pub fn metrics_addr(&self) -> SocketAddr {
        SocketAddr::new(self.prometheus_bind_address, self.prometheus_port)
    }
}

fn default_prometheus_enabled() -> bool {
    false
}

fn default_prometheus_bind_address() -> IpAddr {
    IpAddr::V4(Ipv4Addr::UNSPECIFIED)
}

fn default_prometheus_port() -> u16 {
    9000
}
