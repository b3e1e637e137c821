use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::MessageWriter;
use super::Sink;
use super::SinkMessage;
use super::SinkQueue;
use crate::metrics::SINK_DROPPED;
use crate::metrics::SINK_PUBLISHED;
use crate::Result;
use crate::SinkConfig;

/// Queue drained by `worker_count` writers, one outbound call per message
pub struct DirectSink<W: MessageWriter> {
    name: &'static str,
    queue: Arc<SinkQueue>,
    writer: Arc<W>,
    worker_count: usize,
    started: AtomicBool,
    cancel: CancellationToken,
    workers: TaskTracker,
}

impl<W: MessageWriter> std::fmt::Debug for DirectSink<W> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("DirectSink")
            .field("name", &self.name)
            .field("destination", &self.writer.destination())
            .field("worker_count", &self.worker_count)
            .finish()
    }
}

impl<W: MessageWriter> DirectSink<W> {
    pub fn new(
        name: &'static str,
        writer: Arc<W>,
        config: &SinkConfig,
    ) -> Self {
        Self {
            name,
            queue: Arc::new(SinkQueue::new(name, config.queue_capacity, config.drain_poll_interval())),
            writer,
            worker_count: config.worker_count.max(1),
            started: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            workers: TaskTracker::new(),
        }
    }

    /// Messages waiting for a writer
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    async fn run_worker(
        id: usize,
        name: &'static str,
        queue: Arc<SinkQueue>,
        writer: Arc<W>,
        cancel: CancellationToken,
    ) {
        info!("[sink/{}/{}] starting writer", name, id);
        let receiver = queue.receiver();

        loop {
            // a received message is always written, cancellation only
            // applies between messages
            let message = {
                let mut rx = tokio::select! {
                    _ = cancel.cancelled() => break,
                    rx = receiver.lock() => rx,
                };
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    message = rx.recv() => message,
                }
            };

            let Some(message) = message else {
                warn!("[sink/{}/{}] queue closed", name, id);
                break;
            };

            match writer.write(&message).await {
                Ok(()) => {
                    debug!("[sink/{}/{}] publish ok", name, id);
                    SINK_PUBLISHED.with_label_values(&[name]).inc();
                }
                Err(e) => {
                    error!("[sink/{}/{}] publish to {} failed: {}", name, id, writer.destination(), e);
                    SINK_DROPPED.with_label_values(&[name]).inc();
                }
            }
        }
        info!("[sink/{}/{}] writer stopped", name, id);
    }
}

#[async_trait]
impl<W: MessageWriter> Sink for DirectSink<W> {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        for id in 0..self.worker_count {
            self.workers.spawn(Self::run_worker(
                id,
                self.name,
                self.queue.clone(),
                self.writer.clone(),
                self.cancel.clone(),
            ));
        }
        self.workers.close();
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.queue.close();

        if self.started.load(Ordering::Acquire) {
            self.queue.drain().await;
        } else if self.queue.len() > 0 {
            warn!("[sink/{}] stopped before start, {} messages discarded", self.name, self.queue.len());
        }

        self.cancel.cancel();
        self.workers.close();
        self.workers.wait().await;
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
