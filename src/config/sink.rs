use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::Error;
use crate::Result;

/// `SendMessageBatch` accepts at most this many entries
pub const SQS_MAX_BATCH: usize = 10;

/// Destination selected for the event feed
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum SinkKind {
    /// Newline-delimited JSON on standard output
    Stdout,
    /// One POST per event
    Http,
    /// One POST per batch (JSON array), per-event fallback on failure
    HttpBatch,
    /// One record per event keyed by resource ID
    Kafka,
    /// `SendMessageBatch` of up to 10 events, per-event fallback on failure
    Sqs,
    /// Discard everything
    Noop,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::Stdout => "stdout",
            SinkKind::Http => "http",
            SinkKind::HttpBatch => "http-batch",
            SinkKind::Kafka => "kafka",
            SinkKind::Sqs => "sqs",
            SinkKind::Noop => "noop",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SinkConfig {
    /// Required. There is no sensible default destination.
    #[serde(default)]
    pub kind: Option<SinkKind>,

    /// Bound of the internal queue between producers and writers
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Writer tasks for direct sinks
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,

    /// How often `stop` re-checks the queue length while draining
    #[serde(default = "default_drain_poll_interval_ms")]
    pub drain_poll_interval_ms: u64,

    #[serde(default)]
    pub http: HttpSinkConfig,

    #[serde(default)]
    pub kafka: KafkaSinkConfig,

    #[serde(default)]
    pub sqs: SqsSinkConfig,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: None,
            queue_capacity: default_queue_capacity(),
            worker_count: default_worker_count(),
            batch_size: default_batch_size(),
            flush_interval_ms: default_flush_interval_ms(),
            drain_poll_interval_ms: default_drain_poll_interval_ms(),
            http: HttpSinkConfig::default(),
            kafka: KafkaSinkConfig::default(),
            sqs: SqsSinkConfig::default(),
        }
    }
}

impl SinkConfig {
    pub fn validate(&self) -> Result<()> {
        let kind = self.kind.ok_or_else(|| {
            Error::InvalidConfig("Missing sink.kind: stdout, http, http-batch, kafka, sqs or noop".into())
        })?;

        if !(1..=100_000).contains(&self.queue_capacity) {
            return Err(Error::InvalidConfig(format!(
                "sink.queue_capacity must be within 1..=100000, got {}",
                self.queue_capacity
            )));
        }

        if self.worker_count == 0 {
            return Err(Error::InvalidConfig("sink.worker_count must be at least 1".into()));
        }

        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("sink.batch_size must be at least 1".into()));
        }

        if self.flush_interval_ms == 0 || self.drain_poll_interval_ms == 0 {
            return Err(Error::InvalidConfig(
                "sink.flush_interval_ms and sink.drain_poll_interval_ms cannot be 0".into(),
            ));
        }

        match kind {
            SinkKind::Http | SinkKind::HttpBatch => self.http.validate()?,
            SinkKind::Kafka => self.kafka.validate()?,
            SinkKind::Sqs => {
                self.sqs.validate()?;
                if self.batch_size > SQS_MAX_BATCH {
                    return Err(Error::InvalidConfig(format!(
                        "sink.batch_size must be at most {SQS_MAX_BATCH} for sqs, got {}",
                        self.batch_size
                    )));
                }
            }
            SinkKind::Stdout | SinkKind::Noop => {}
        }

        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }

    pub fn drain_poll_interval(&self) -> Duration {
        Duration::from_millis(self.drain_poll_interval_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HttpSinkConfig {
    /// Endpoint receiving POSTed events, e.g. `http://collector:8080/events`
    #[serde(default)]
    pub address: Option<String>,

    #[serde(default = "default_http_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for HttpSinkConfig {
    fn default() -> Self {
        Self {
            address: None,
            timeout_ms: default_http_timeout_ms(),
        }
    }
}

impl HttpSinkConfig {
    fn validate(&self) -> Result<()> {
        match &self.address {
            None => Err(Error::InvalidConfig(
                "Missing sink.http.address (example: http://collector:8080/events)".into(),
            )),
            Some(a) if !(a.starts_with("http://") || a.starts_with("https://")) => Err(
                Error::InvalidConfig(format!("sink.http.address must be an http(s) URL, got {a:?}")),
            ),
            Some(_) => Ok(()),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct KafkaSinkConfig {
    /// Comma separated bootstrap servers, e.g. `kafka-1:9092,kafka-2:9092`
    #[serde(default)]
    pub brokers: Option<String>,

    #[serde(default)]
    pub topic: Option<String>,

    /// Delivery timeout per record
    #[serde(default = "default_kafka_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for KafkaSinkConfig {
    fn default() -> Self {
        Self {
            brokers: None,
            topic: None,
            timeout_ms: default_kafka_timeout_ms(),
        }
    }
}

impl KafkaSinkConfig {
    fn validate(&self) -> Result<()> {
        if self.broker_list().is_empty() {
            return Err(Error::InvalidConfig(
                "Missing sink.kafka.brokers (example: kafka-1:9092,kafka-2:9092)".into(),
            ));
        }
        if self.topic.as_deref().map_or(true, |t| t.trim().is_empty()) {
            return Err(Error::InvalidConfig("Missing sink.kafka.topic".into()));
        }
        if self.timeout_ms == 0 {
            return Err(Error::InvalidConfig("sink.kafka.timeout_ms cannot be 0".into()));
        }
        Ok(())
    }

    pub fn broker_list(&self) -> Vec<String> {
        self.brokers
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|b| !b.is_empty())
            .map(str::to_string)
            .collect()
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SqsSinkConfig {
    #[serde(default)]
    pub queue_url: Option<String>,

    /// Falls back to the AWS default provider chain when unset
    #[serde(default)]
    pub region: Option<String>,

    /// Message group for FIFO queues when an event has no key
    #[serde(default = "default_sqs_group_id")]
    pub group_id: String,
}

impl Default for SqsSinkConfig {
    fn default() -> Self {
        Self {
            queue_url: None,
            region: None,
            group_id: default_sqs_group_id(),
        }
    }
}

impl SqsSinkConfig {
    fn validate(&self) -> Result<()> {
        match &self.queue_url {
            None => Err(Error::InvalidConfig(
                "Missing sink.sqs.queue_url (example: https://sqs.us-east-1.amazonaws.com/123456789012/events)".into(),
            )),
            Some(u) if !(u.starts_with("https://") || u.starts_with("http://")) => Err(Error::InvalidConfig(
                format!("sink.sqs.queue_url must be an http(s) URL, got {u:?}"),
            )),
            Some(_) if self.group_id.is_empty() => {
                Err(Error::InvalidConfig("sink.sqs.group_id cannot be empty".into()))
            }
            Some(_) => Ok(()),
        }
    }

    /// FIFO queues need a group and a deduplication ID on every entry
    pub fn is_fifo(&self) -> bool {
        self.queue_url.as_deref().is_some_and(|u| u.ends_with(".fifo"))
    }
}

fn default_queue_capacity() -> usize {
    1000
}
fn default_worker_count() -> usize {
    1
}
fn default_batch_size() -> usize {
    10
}
fn default_flush_interval_ms() -> u64 {
    1000
}
fn default_drain_poll_interval_ms() -> u64 {
    1000
}
fn default_http_timeout_ms() -> u64 {
    10_000
}
fn default_kafka_timeout_ms() -> u64 {
    5_000
}
fn default_sqs_group_id() -> String {
    "nomad-firehose".to_string()
}
