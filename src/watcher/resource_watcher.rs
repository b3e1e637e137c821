use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::EventClock;
use super::FirehoseKind;
use super::PublishStrategy;
use crate::metrics::UPSTREAM_FETCH_ERRORS;
use crate::metrics::UPSTREAM_LIST_ERRORS;
use crate::metrics::WATERMARK;
use crate::OrchestratorApi;
use crate::QueryCursor;
use crate::Result;
use crate::Sink;
use crate::WatcherConfig;

/// Long-poll loop for one watcher role, ready to be started from a
/// restored watermark
pub struct Watcher {
    kind: FirehoseKind,
    api: Arc<dyn OrchestratorApi>,
    strategy: Arc<dyn PublishStrategy>,
    sink: Arc<dyn Sink>,
    config: WatcherConfig,
}

impl std::fmt::Debug for Watcher {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Watcher")
            .field("kind", &self.kind)
            .field("sink", &self.sink.name())
            .finish()
    }
}

impl Watcher {
    /// Watcher using the role's own publish strategy. Allocation events
    /// newer than `clock` are published and advance it.
    pub fn new(
        kind: FirehoseKind,
        api: Arc<dyn OrchestratorApi>,
        sink: Arc<dyn Sink>,
        clock: Arc<EventClock>,
        config: WatcherConfig,
    ) -> Self {
        let strategy = kind.strategy(api.clone(), sink.clone(), clock);
        Self::with_strategy(kind, api, strategy, sink, config)
    }

    pub fn with_strategy(
        kind: FirehoseKind,
        api: Arc<dyn OrchestratorApi>,
        strategy: Arc<dyn PublishStrategy>,
        sink: Arc<dyn Sink>,
        config: WatcherConfig,
    ) -> Self {
        Self {
            kind,
            api,
            strategy,
            sink,
            config,
        }
    }

    /// Starts the sink, the long-poll loop and the watermark reporter.
    ///
    /// The watermark is sent on `updates` every report interval and once more
    /// when the watcher stops. `shutdown` stops the loop as well; the handle
    /// must still be stopped to drain in-flight work.
    pub async fn start(
        self,
        initial_watermark: u64,
        updates: mpsc::Sender<u64>,
        shutdown: &CancellationToken,
    ) -> Result<WatcherHandle> {
        self.sink.start().await?;

        let cancel = shutdown.child_token();
        let (watermark_tx, watermark_rx) = watch::channel(initial_watermark);
        let inflight = TaskTracker::new();
        WATERMARK.with_label_values(&[self.kind.name()]).set(initial_watermark as i64);

        info!(kind = %self.kind, watermark = initial_watermark, "starting watcher");

        let watch_loop = WatchLoop {
            kind: self.kind,
            api: self.api,
            strategy: self.strategy,
            config: self.config.clone(),
            cancel: cancel.clone(),
            inflight: inflight.clone(),
            watermark: watermark_tx,
        };
        let loop_handle = tokio::spawn(watch_loop.run(initial_watermark));

        let reporter = tokio::spawn(report_watermark(
            watermark_rx.clone(),
            updates.clone(),
            self.config.report_interval(),
            cancel.clone(),
        ));

        Ok(WatcherHandle {
            kind: self.kind,
            cancel,
            loop_handle,
            reporter,
            inflight,
            inflight_grace: self.config.inflight_grace(),
            sink: self.sink,
            watermark: watermark_rx,
            updates,
        })
    }
}

/// Running watcher. Dropping it without [`WatcherHandle::stop`] leaves the
/// sink undrained.
pub struct WatcherHandle {
    kind: FirehoseKind,
    cancel: CancellationToken,
    loop_handle: JoinHandle<u64>,
    reporter: JoinHandle<()>,
    inflight: TaskTracker,
    inflight_grace: Duration,
    sink: Arc<dyn Sink>,
    watermark: watch::Receiver<u64>,
    updates: mpsc::Sender<u64>,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WatcherHandle")
            .field("kind", &self.kind)
            .field("watermark", &*self.watermark.borrow())
            .finish()
    }
}

impl WatcherHandle {
    /// Highest change index committed so far
    pub fn watermark(&self) -> u64 {
        *self.watermark.borrow()
    }

    /// Stops the loop, waits up to the in-flight grace period for fetch
    /// tasks, drains the sink and returns the final watermark.
    pub async fn stop(self) -> Result<u64> {
        info!(kind = %self.kind, "stopping watcher");
        self.cancel.cancel();

        let watermark = self.loop_handle.await?;
        self.reporter.await?;

        self.inflight.close();
        if timeout(self.inflight_grace, self.inflight.wait()).await.is_err() {
            warn!(
                kind = %self.kind,
                "{} fetch tasks still running after {:?}, their events may be rejected by the stopped sink",
                self.inflight.len(),
                self.inflight_grace
            );
        }

        self.sink.stop().await?;

        // the reporter may already be gone, the caller gets the value anyway
        if self.updates.try_send(watermark).is_err() {
            debug!(kind = %self.kind, watermark, "final watermark report skipped");
        }
        info!(kind = %self.kind, watermark, "watcher stopped");
        Ok(watermark)
    }
}

struct WatchLoop {
    kind: FirehoseKind,
    api: Arc<dyn OrchestratorApi>,
    strategy: Arc<dyn PublishStrategy>,
    config: WatcherConfig,
    cancel: CancellationToken,
    inflight: TaskTracker,
    watermark: watch::Sender<u64>,
}

impl WatchLoop {
    /// Returns the final watermark once cancelled.
    async fn run(
        self,
        initial_watermark: u64,
    ) -> u64 {
        let name = self.kind.name();
        let resource = self.kind.resource();
        let mut watermark = initial_watermark;
        let mut cursor = QueryCursor::new(watermark, self.config.wait_time(), self.config.allow_stale);

        loop {
            let result = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                result = self.api.list(resource, &cursor) => result,
            };

            let page = match result {
                Ok(page) => page,
                Err(e) => {
                    error!(kind = name, "unable to list {}: {}", resource, e);
                    UPSTREAM_LIST_ERRORS.with_label_values(&[name]).inc();
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(self.config.error_backoff()) => continue,
                    }
                }
            };

            if page.last_index == cursor.wait_index {
                debug!(kind = name, "{} index is unchanged ({} == {})", resource, page.last_index, cursor.wait_index);
                continue;
            }
            debug!(kind = name, "{} index is changed ({} <> {})", resource, page.last_index, cursor.wait_index);

            let floor = watermark;
            let mut candidate = floor;
            for item in page.items {
                if item.modify_index <= floor {
                    continue;
                }
                candidate = candidate.max(item.modify_index);

                let strategy = self.strategy.clone();
                self.inflight.spawn(async move {
                    let id = item.id.clone();
                    if let Err(e) = strategy.handle(item).await {
                        error!(kind = name, "failed to publish {}: {}", id, e);
                        UPSTREAM_FETCH_ERRORS.with_label_values(&[name]).inc();
                    }
                });
            }

            cursor.wait_index = page.last_index;
            if candidate > watermark {
                watermark = candidate;
                self.watermark.send_replace(watermark);
                WATERMARK.with_label_values(&[name]).set(watermark as i64);
            }
        }

        debug!(kind = name, watermark, "watch loop exited");
        watermark
    }
}

async fn report_watermark(
    watermark: watch::Receiver<u64>,
    updates: mpsc::Sender<u64>,
    every: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(every);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticker.tick() => {
                let current = *watermark.borrow();
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    sent = updates.send(current) => {
                        if sent.is_err() {
                            debug!("watermark receiver gone, reporter exiting");
                            return;
                        }
                    }
                }
            }
        }
    }
}
