//! Event destinations.
//!
//! Every sink owns a bounded queue. `put` blocks once the queue is full,
//! which is the only backpressure the watch loop sees. Writer tasks drain
//! the queue in the background; `stop` refuses new messages and returns
//! once the queue is empty and the writers have exited.

mod batch_buffer;
mod batched;
mod direct;
mod http;
mod kafka;
mod noop;
mod queue;
mod sqs;
mod stdout;

pub use batch_buffer::*;
pub use batched::*;
pub use direct::*;
pub use http::*;
pub use kafka::*;
pub use noop::*;
pub(crate) use queue::*;
pub use sqs::*;
pub use stdout::*;


use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use crate::Error;
use crate::Result;
use crate::SinkConfig;
use crate::SinkKind;

/// One queued event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkMessage {
    /// Partition/dedup key, usually the resource ID
    pub key: Option<String>,
    pub payload: Vec<u8>,
}

impl SinkMessage {
    pub fn new(
        key: Option<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self { key, payload }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait Sink: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    /// Spawns the writer tasks. Calling it twice is a no-op.
    async fn start(&self) -> Result<()>;

    /// Rejects further puts, waits for the queue to drain, then halts the
    /// writers.
    async fn stop(&self) -> Result<()>;

    /// Enqueues one payload, waiting while the queue is full.
    async fn put(
        &self,
        key: Option<String>,
        payload: Vec<u8>,
    ) -> Result<()>;
}

/// Delivers one message per call
#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageWriter: Send + Sync + 'static {
    fn destination(&self) -> String;

    async fn write(
        &self,
        message: &SinkMessage,
    ) -> Result<()>;
}

/// Delivers messages in groups, with a single-message path used when a whole
/// batch is rejected
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BatchWriter: Send + Sync + 'static {
    fn destination(&self) -> String;

    async fn write_batch(
        &self,
        batch: &[SinkMessage],
    ) -> Result<()>;

    async fn write_one(
        &self,
        message: &SinkMessage,
    ) -> Result<()>;
}

/// Builds the sink selected by `config.kind`.
pub fn build_sink(config: &SinkConfig) -> Result<Arc<dyn Sink>> {
    let kind = config
        .kind
        .ok_or_else(|| Error::InvalidConfig("Missing sink.kind: stdout, http, http-batch, kafka, sqs, noop".into()))?;

    let sink: Arc<dyn Sink> = match kind {
        SinkKind::Stdout => Arc::new(DirectSink::new(
            kind.as_str(),
            Arc::new(LineWriter::stdout()),
            config,
        )),
        SinkKind::Http => Arc::new(DirectSink::new(
            kind.as_str(),
            Arc::new(HttpWriter::new(&config.http)?),
            config,
        )),
        SinkKind::HttpBatch => Arc::new(BatchedSink::new(
            kind.as_str(),
            Arc::new(HttpWriter::new(&config.http)?),
            config,
        )),
        SinkKind::Kafka => kafka_sink(config)?,
        SinkKind::Sqs => sqs_sink(config)?,
        SinkKind::Noop => Arc::new(NoopSink::new()),
    };
    Ok(sink)
}

#[cfg(feature = "kafka")]
fn kafka_sink(config: &SinkConfig) -> Result<Arc<dyn Sink>> {
    let topic = config
        .kafka
        .topic
        .clone()
        .ok_or_else(|| Error::InvalidConfig("Missing sink.kafka.topic".into()))?;
    let writer = KafkaWriter::new(RdKafkaProducer::new(&config.kafka)?, topic);
    Ok(Arc::new(DirectSink::new(SinkKind::Kafka.as_str(), Arc::new(writer), config)))
}

#[cfg(not(feature = "kafka"))]
fn kafka_sink(_config: &SinkConfig) -> Result<Arc<dyn Sink>> {
    Err(missing_feature(SinkKind::Kafka))
}

#[cfg(feature = "sqs")]
fn sqs_sink(config: &SinkConfig) -> Result<Arc<dyn Sink>> {
    let writer = SqsWriter::new(AwsSqsClient::new(config.sqs.region.clone()), &config.sqs)?;
    Ok(Arc::new(BatchedSink::new(SinkKind::Sqs.as_str(), Arc::new(writer), config)))
}

#[cfg(not(feature = "sqs"))]
fn sqs_sink(_config: &SinkConfig) -> Result<Arc<dyn Sink>> {
    Err(missing_feature(SinkKind::Sqs))
}

#[cfg(not(all(feature = "kafka", feature = "sqs")))]
fn missing_feature(kind: SinkKind) -> Error {
    Error::InvalidConfig(format!(
        "sink.kind {} needs a build with the `{}` cargo feature",
        kind.as_str(),
        kind.as_str()
    ))
}
