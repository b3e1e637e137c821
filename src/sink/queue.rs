use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::Mutex;
use tracing::info;

use super::SinkMessage;
use crate::Result;
use crate::SinkError;

/// Bounded queue shared by a sink's producers and its writer tasks
pub(crate) struct SinkQueue {
    name: &'static str,
    tx: mpsc::Sender<SinkMessage>,
    rx: Arc<Mutex<mpsc::Receiver<SinkMessage>>>,
    stopped: AtomicBool,
    drain_poll_interval: Duration,
}

impl SinkQueue {
    pub(crate) fn new(
        name: &'static str,
        capacity: usize,
        drain_poll_interval: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            name,
            tx,
            rx: Arc::new(Mutex::new(rx)),
            stopped: AtomicBool::new(false),
            drain_poll_interval,
        }
    }

    pub(crate) fn receiver(&self) -> Arc<Mutex<mpsc::Receiver<SinkMessage>>> {
        self.rx.clone()
    }

    /// Messages enqueued and not yet picked up by a writer
    pub(crate) fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub(crate) async fn put(
        &self,
        message: SinkMessage,
    ) -> Result<()> {
        if self.is_stopped() {
            return Err(SinkError::Stopped(self.name).into());
        }
        self.tx
            .send(message)
            .await
            .map_err(|_| SinkError::QueueClosed(self.name).into())
    }

    /// Refuses further puts.
    pub(crate) fn close(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    /// Polls until every queued message has been handed to a writer.
    pub(crate) async fn drain(&self) {
        let left = self.len();
        info!("[sink/{}] ensure writer queue is empty ({} messages left)", self.name, left);

        while self.len() > 0 {
            info!("[sink/{}] waiting for queue to drain ({} messages left)", self.name, self.len());
            tokio::time::sleep(self.drain_poll_interval).await;
        }
    }
}
