use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::BatchBuffer;
use super::BatchWriter;
use super::Sink;
use super::SinkMessage;
use super::SinkQueue;
use crate::metrics::SINK_BATCH_SIZE;
use crate::metrics::SINK_DROPPED;
use crate::metrics::SINK_PUBLISHED;
use crate::Result;
use crate::SinkConfig;

/// Queue drained by a single batcher that flushes at `batch_size` messages or
/// `flush_interval` after the oldest buffered message, whichever comes first.
/// A rejected batch is retried message by message.
pub struct BatchedSink<W: BatchWriter> {
    name: &'static str,
    queue: Arc<SinkQueue>,
    writer: Arc<W>,
    batch_size: usize,
    flush_interval: Duration,
    started: AtomicBool,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl<W: BatchWriter> std::fmt::Debug for BatchedSink<W> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("BatchedSink")
            .field("name", &self.name)
            .field("destination", &self.writer.destination())
            .field("batch_size", &self.batch_size)
            .field("flush_interval", &self.flush_interval)
            .finish()
    }
}

impl<W: BatchWriter> BatchedSink<W> {
    pub fn new(
        name: &'static str,
        writer: Arc<W>,
        config: &SinkConfig,
    ) -> Self {
        Self {
            name,
            queue: Arc::new(SinkQueue::new(name, config.queue_capacity, config.drain_poll_interval())),
            writer,
            batch_size: config.batch_size.max(1),
            flush_interval: config.flush_interval(),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            tasks: TaskTracker::new(),
        }
    }

    async fn run_batcher(
        name: &'static str,
        queue: Arc<SinkQueue>,
        writer: Arc<W>,
        mut buffer: BatchBuffer<SinkMessage>,
        cancel: CancellationToken,
    ) {
        info!("[sink/{}] starting batcher", name);
        let receiver = queue.receiver();
        let mut rx = receiver.lock().await;

        loop {
            let deadline = buffer.deadline();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = async {
                    match deadline {
                        Some(deadline) => sleep_until(deadline).await,
                        None => std::future::pending().await,
                    }
                } => {
                    debug!("[sink/{}] flush interval reached with {} messages", name, buffer.len());
                    Self::flush(name, writer.as_ref(), buffer.take()).await;
                }
                message = rx.recv() => match message {
                    Some(message) => {
                        if buffer.push(message).is_some() {
                            Self::flush(name, writer.as_ref(), buffer.take()).await;
                        }
                    }
                    None => {
                        warn!("[sink/{}] queue closed", name);
                        break;
                    }
                },
            }
        }

        if !buffer.is_empty() {
            info!("[sink/{}] flushing {} pending messages before exit", name, buffer.len());
            Self::flush(name, writer.as_ref(), buffer.take()).await;
        }
        info!("[sink/{}] batcher stopped", name);
    }

    async fn flush(
        name: &'static str,
        writer: &W,
        batch: Vec<SinkMessage>,
    ) {
        if batch.is_empty() {
            return;
        }
        SINK_BATCH_SIZE.with_label_values(&[name]).observe(batch.len() as f64);

        match writer.write_batch(&batch).await {
            Ok(()) => {
                debug!("[sink/{}] published batch of {} messages", name, batch.len());
                SINK_PUBLISHED.with_label_values(&[name]).inc_by(batch.len() as u64);
            }
            Err(e) => {
                warn!(
                    "[sink/{}] batch of {} rejected by {}, retrying individually: {}",
                    name,
                    batch.len(),
                    writer.destination(),
                    e
                );
                for message in &batch {
                    match writer.write_one(message).await {
                        Ok(()) => SINK_PUBLISHED.with_label_values(&[name]).inc(),
                        Err(e) => {
                            error!("[sink/{}] publish to {} failed: {}", name, writer.destination(), e);
                            SINK_DROPPED.with_label_values(&[name]).inc();
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl<W: BatchWriter> Sink for BatchedSink<W> {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.tasks.spawn(Self::run_batcher(
            self.name,
            self.queue.clone(),
            self.writer.clone(),
            BatchBuffer::new(self.batch_size, self.flush_interval),
            self.cancel.clone(),
        ));
        self.tasks.close();
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.queue.close();

        if self.started.load(Ordering::Acquire) {
            self.queue.drain().await;
        } else if self.queue.len() > 0 {
            warn!("[sink/{}] stopped before start, {} messages discarded", self.name, self.queue.len());
        }

        // the batcher flushes whatever it still buffers before exiting
        self.cancel.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!("[sink/{}] stopped", self.name);
        Ok(())
    }

    async fn put(
        &self,
        key: Option<String>,
        payload: Vec<u8>,
    ) -> Result<()> {
        self.queue.put(SinkMessage::new(key, payload)).await
    }
}
