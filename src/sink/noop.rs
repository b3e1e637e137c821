use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use tracing::trace;

use super::Sink;
use crate::metrics::SINK_PUBLISHED;
use crate::Result;
use crate::SinkError;

const NAME: &str = "noop";

/// Accepts and discards every message
#[derive(Debug, Default)]
pub struct NoopSink {
    stopped: AtomicBool,
    discarded: AtomicU64,
}

impl NoopSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Sink for NoopSink {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn start(&self) -> Result<()> {
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.stopped.store(true, Ordering::Release);
        Ok(())
    }

    async fn put(
        &self,
        key: Option<String>,
        payload: Vec<u8>,
    ) -> Result<()> {
        if self.stopped.load(Ordering::Acquire) {
            return Err(SinkError::Stopped(NAME).into());
        }
        trace!(?key, bytes = payload.len(), "discarding message");
        self.discarded.fetch_add(1, Ordering::Relaxed);
        SINK_PUBLISHED.with_label_values(&[NAME]).inc();
        Ok(())
    }
}
