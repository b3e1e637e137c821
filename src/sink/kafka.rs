//! Kafka destination.
//!
//! Every event is produced as one record keyed by the resource ID, so all
//! changes of one resource land on the same partition in publish order.
//! The producer itself is behind [`KafkaProducer`]; the librdkafka backed
//! implementation is compiled with the `kafka` feature.

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;

use super::MessageWriter;
use super::SinkMessage;
use crate::Result;

#[cfg_attr(test, automock)]
#[async_trait]
pub trait KafkaProducer: Send + Sync + 'static {
    /// Produces one record and waits for the broker acknowledgement
    async fn send(
        &self,
        topic: &str,
        message: &SinkMessage,
    ) -> Result<()>;
}

#[derive(Debug)]
pub struct KafkaWriter<P: KafkaProducer> {
    producer: P,
    topic: String,
}

impl<P: KafkaProducer> KafkaWriter<P> {
    pub fn new(
        producer: P,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl<P: KafkaProducer> MessageWriter for KafkaWriter<P> {
    fn destination(&self) -> String {
        format!("kafka://{}", self.topic)
    }

    async fn write(
        &self,
        message: &SinkMessage,
    ) -> Result<()> {
        self.producer.send(&self.topic, message).await
    }
}

#[cfg(feature = "kafka")]
pub use rdkafka_producer::RdKafkaProducer;

#[cfg(feature = "kafka")]
mod rdkafka_producer {
    use std::time::Duration;

    use async_trait::async_trait;
    use rdkafka::config::ClientConfig;
    use rdkafka::producer::FutureProducer;
    use rdkafka::producer::FutureRecord;
    use rdkafka::util::Timeout;
    use tracing::debug;

    use super::KafkaProducer;
    use crate::Error;
    use crate::KafkaSinkConfig;
    use crate::Result;
    use crate::SinkError;
    use crate::SinkMessage;

    pub struct RdKafkaProducer {
        producer: FutureProducer,
        timeout: Duration,
    }

    impl std::fmt::Debug for RdKafkaProducer {
        fn fmt(
            &self,
            f: &mut std::fmt::Formatter<'_>,
        ) -> std::fmt::Result {
            f.debug_struct("RdKafkaProducer").field("timeout", &self.timeout).finish()
        }
    }

    impl RdKafkaProducer {
        pub fn new(config: &KafkaSinkConfig) -> Result<Self> {
            let brokers = config.broker_list().join(",");
            debug!("[sink/kafka] brokers: {}", brokers);

            let producer: FutureProducer = ClientConfig::new()
                .set("bootstrap.servers", &brokers)
                .set("message.timeout.ms", config.timeout_ms.to_string())
                .create()
                .map_err(|e| Error::InvalidConfig(format!("failed to create kafka producer: {e}")))?;

            Ok(Self {
                producer,
                timeout: config.timeout(),
            })
        }
    }

    #[async_trait]
    impl KafkaProducer for RdKafkaProducer {
        async fn send(
            &self,
            topic: &str,
            message: &SinkMessage,
        ) -> Result<()> {
            let mut record = FutureRecord::<str, [u8]>::to(topic).payload(message.payload.as_slice());
            if let Some(key) = &message.key {
                record = record.key(key.as_str());
            }

            self.producer
                .send(record, Timeout::After(self.timeout))
                .await
                .map(|_| ())
                .map_err(|(e, _)| {
                    SinkError::Publish {
                        destination: format!("kafka://{topic}"),
                        reason: e.to_string(),
                    }
                    .into()
                })
        }
    }
}
