//! Amazon SQS destination.
//!
//! Batches go out as one `SendMessageBatch` call. Entries the queue rejects
//! individually are resent one at a time; if the request fails as a whole
//! (or a resend is rejected again) the batched sink falls back to
//! [`BatchWriter::write_one`] for every message.
//!
//! FIFO queues get the event key as message group, so events of one
//! resource stay ordered, and a per-process deduplication ID.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use async_trait::async_trait;
#[cfg(test)]
use mockall::automock;
use tracing::debug;
use tracing::warn;

use super::BatchWriter;
use super::SinkMessage;
use crate::Error;
use crate::Result;
use crate::SinkError;
use crate::SqsSinkConfig;

/// One `SendMessageBatch` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqsEntry {
    /// Unique within one request
    pub id: String,
    pub body: String,
    pub group_id: Option<String>,
    pub deduplication_id: Option<String>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait SqsClient: Send + Sync + 'static {
    /// Sends the entries in one request. Returns the IDs of entries the
    /// queue rejected; an `Err` means the request itself failed.
    async fn send_batch(
        &self,
        queue_url: &str,
        entries: Vec<SqsEntry>,
    ) -> Result<Vec<String>>;
}

pub struct SqsWriter<C: SqsClient> {
    client: C,
    queue_url: String,
    /// Set for FIFO queues only
    fifo_group: Option<String>,
    dedup_prefix: String,
    sequence: AtomicU64,
}

impl<C: SqsClient> std::fmt::Debug for SqsWriter<C> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SqsWriter")
            .field("queue_url", &self.queue_url)
            .field("fifo", &self.fifo_group.is_some())
            .finish()
    }
}

impl<C: SqsClient> SqsWriter<C> {
    pub fn new(
        client: C,
        config: &SqsSinkConfig,
    ) -> Result<Self> {
        let queue_url = config.queue_url.clone().ok_or_else(|| {
            Error::InvalidConfig("Missing sink.sqs.queue_url".into())
        })?;
        // deduplication IDs must not repeat across restarts inside the
        // five minute dedup window
        let started = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or_default();

        Ok(Self {
            client,
            queue_url,
            fifo_group: config.is_fifo().then(|| config.group_id.clone()),
            dedup_prefix: format!("{started}-"),
            sequence: AtomicU64::new(0),
        })
    }

    fn entry(
        &self,
        position: usize,
        message: &SinkMessage,
    ) -> SqsEntry {
        let (group_id, deduplication_id) = match &self.fifo_group {
            Some(default_group) => {
                let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
                (
                    Some(message.key.clone().unwrap_or_else(|| default_group.clone())),
                    Some(format!("{}{}", self.dedup_prefix, sequence)),
                )
            }
            None => (None, None),
        };

        SqsEntry {
            id: position.to_string(),
            body: String::from_utf8_lossy(&message.payload).into_owned(),
            group_id,
            deduplication_id,
        }
    }

    fn rejected(
        &self,
        ids: &[String],
    ) -> Error {
        SinkError::Publish {
            destination: self.queue_url.clone(),
            reason: format!("entries {ids:?} rejected"),
        }
        .into()
    }
}

#[async_trait]
impl<C: SqsClient> BatchWriter for SqsWriter<C> {
    fn destination(&self) -> String {
        self.queue_url.clone()
    }

    async fn write_batch(
        &self,
        batch: &[SinkMessage],
    ) -> Result<()> {
        let entries: Vec<SqsEntry> = batch.iter().enumerate().map(|(i, m)| self.entry(i, m)).collect();
        let rejected = self.client.send_batch(&self.queue_url, entries.clone()).await?;
        if rejected.is_empty() {
            debug!("[sink/sqs] queued {} messages", batch.len());
            return Ok(());
        }

        warn!(
            "[sink/sqs] {} of {} entries rejected, resending them one at a time",
            rejected.len(),
            entries.len()
        );
        for id in &rejected {
            let Some(entry) = entries.iter().find(|e| &e.id == id) else {
                continue;
            };
            let again = self.client.send_batch(&self.queue_url, vec![entry.clone()]).await?;
            if !again.is_empty() {
                return Err(self.rejected(&again));
            }
        }
        Ok(())
    }

    async fn write_one(
        &self,
        message: &SinkMessage,
    ) -> Result<()> {
        let rejected = self.client.send_batch(&self.queue_url, vec![self.entry(0, message)]).await?;
        if rejected.is_empty() {
            Ok(())
        } else {
            Err(self.rejected(&rejected))
        }
    }
}

#[cfg(feature = "sqs")]
pub use aws::AwsSqsClient;

#[cfg(feature = "sqs")]
mod aws {
    use async_trait::async_trait;
    use aws_config::BehaviorVersion;
    use aws_config::Region;
    use aws_sdk_sqs::types::SendMessageBatchRequestEntry;
    use tokio::sync::OnceCell;

    use super::SqsClient;
    use super::SqsEntry;
    use crate::Result;
    use crate::SinkError;

    /// SQS client from the AWS default credential chain, loaded on first use
    #[derive(Debug)]
    pub struct AwsSqsClient {
        region: Option<String>,
        client: OnceCell<aws_sdk_sqs::Client>,
    }

    impl AwsSqsClient {
        pub fn new(region: Option<String>) -> Self {
            Self {
                region,
                client: OnceCell::new(),
            }
        }

        async fn client(&self) -> &aws_sdk_sqs::Client {
            self.client
                .get_or_init(|| async {
                    let mut loader = aws_config::defaults(BehaviorVersion::latest());
                    if let Some(region) = &self.region {
                        loader = loader.region(Region::new(region.clone()));
                    }
                    aws_sdk_sqs::Client::new(&loader.load().await)
                })
                .await
        }
    }

    #[async_trait]
    impl SqsClient for AwsSqsClient {
        async fn send_batch(
            &self,
            queue_url: &str,
            entries: Vec<SqsEntry>,
        ) -> Result<Vec<String>> {
            let publish_error = |reason: String| SinkError::Publish {
                destination: queue_url.to_string(),
                reason,
            };

            let mut request = self.client().await.send_message_batch().queue_url(queue_url);
            for entry in entries {
                let entry = SendMessageBatchRequestEntry::builder()
                    .id(entry.id)
                    .message_body(entry.body)
                    .set_message_group_id(entry.group_id)
                    .set_message_deduplication_id(entry.deduplication_id)
                    .build()
                    .map_err(|e| publish_error(e.to_string()))?;
                request = request.entries(entry);
            }

            let output = request.send().await.map_err(|e| publish_error(e.to_string()))?;
            Ok(output.failed().iter().map(|f| f.id().to_string()).collect())
        }
    }
}
