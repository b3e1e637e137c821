use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::metrics::CHECKPOINT_FAILURES;
use crate::metrics::CHECKPOINT_READ_FAILURES;
use crate::metrics::LEADER;
use crate::CheckpointStore;
use crate::Checkpointer;
use crate::EventClock;
use crate::FirehoseConfig;
use crate::FirehoseKind;
use crate::LeaseNotice;
use crate::LockLease;
use crate::LockService;
use crate::OrchestratorApi;
use crate::Result;
use crate::Sink;
use crate::Watcher;
use crate::WatcherHandle;

/// Builds a fresh sink for every leadership term
pub type SinkBuilder = Arc<dyn Fn() -> Result<Arc<dyn Sink>> + Send + Sync>;

/// How a leadership term ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermOutcome {
    /// The lock was taken away; the manager goes back to acquiring
    LockLost,
    /// The process is shutting down
    Shutdown,
}

/// Keeps at most one watcher of a role running across the fleet.
pub struct Manager {
    kind: FirehoseKind,
    config: FirehoseConfig,
    api: Arc<dyn OrchestratorApi>,
    locks: Arc<dyn LockService>,
    checkpointer: Checkpointer,
    /// Task event time checkpoint, allocations only
    event_times: Option<Checkpointer>,
    sink_builder: SinkBuilder,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for Manager {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("kind", &self.kind)
            .field("checkpoint", &self.checkpointer.key())
            .finish()
    }
}

impl Manager {
    pub fn new(
        kind: FirehoseKind,
        config: FirehoseConfig,
        api: Arc<dyn OrchestratorApi>,
        store: Arc<dyn CheckpointStore>,
        locks: Arc<dyn LockService>,
        sink_builder: SinkBuilder,
        shutdown: CancellationToken,
    ) -> Self {
        let checkpointer = Checkpointer::new(store.clone(), config.coordination.checkpoint_key(kind.name()));
        let event_times = kind
            .tracks_event_time()
            .then(|| Checkpointer::new(store, config.coordination.event_time_key(kind.name())));
        Self {
            kind,
            config,
            api,
            locks,
            checkpointer,
            event_times,
            sink_builder,
            shutdown,
        }
    }

    /// Runs until shutdown. Lock loss sends the manager back to acquiring;
    /// lock acquisition failures and watcher start failures are returned.
    pub async fn start(&self) -> Result<()> {
        let lock_key = self.config.coordination.lock_key(self.kind.name());
        let session_name = self.config.coordination.session_name(self.kind.name());
        let session_ttl = self.config.coordination.session_ttl();
        let mut ticker = tokio::time::interval(self.config.leadership.acquire_interval());

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!(kind = %self.kind, "shutdown before acquiring the lock");
                    return Ok(());
                }
                _ = ticker.tick() => {}
            }

            debug!(kind = %self.kind, "waiting for lock {}", lock_key);
            let lease = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => {
                    info!(kind = %self.kind, "shutdown while waiting for the lock");
                    return Ok(());
                }
                lease = self.locks.acquire(&lock_key, &session_name, session_ttl) => lease?,
            };

            info!(kind = %self.kind, session_id = lease.session_id(), "lock acquired, starting watcher");
            match self.lead(lease).await? {
                TermOutcome::LockLost => continue,
                TermOutcome::Shutdown => return Ok(()),
            }
        }
    }

    /// One leadership term: restore, watch, persist, and release the lock on
    /// every exit.
    async fn lead(
        &self,
        mut lease: LockLease,
    ) -> Result<TermOutcome> {
        let name = self.kind.name();
        LEADER.with_label_values(&[name]).set(1);

        let (mut persisted, event_time) = match self.restore(&mut lease).await {
            Ok(restored) => restored,
            Err(outcome) => {
                self.release(lease).await;
                return Ok(outcome);
            }
        };
        let clock = Arc::new(EventClock::starting_at(event_time));
        let mut persisted_event_time = event_time;

        let (updates_tx, mut updates_rx) = mpsc::channel(self.config.watcher.update_channel_capacity.max(1));
        let handle = match self.start_watcher(persisted, clock.clone(), updates_tx).await {
            Ok(handle) => handle,
            Err(e) => {
                error!(kind = %self.kind, "failed to start watcher: {}", e);
                self.release(lease).await;
                return Err(e);
            }
        };

        let outcome = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break TermOutcome::Shutdown,
                notice = lease.next_notice() => match notice {
                    Some(LeaseNotice::MonitorRetry { attempt, reason }) => {
                        warn!(kind = %self.kind, attempt, "lock monitor retrying: {}", reason);
                    }
                    None => break TermOutcome::LockLost,
                },
                Some(watermark) = updates_rx.recv() => {
                    if watermark > persisted && self.persist(watermark).await {
                        persisted = watermark;
                    }
                    self.persist_event_time(&clock, &mut persisted_event_time).await;
                }
            }
        };

        match outcome {
            TermOutcome::LockLost => {
                warn!(kind = %self.kind, "lock lost, stopping watcher");
                if let Err(e) = handle.stop().await {
                    error!(kind = %self.kind, "failed to stop watcher: {}", e);
                }
            }
            TermOutcome::Shutdown => {
                info!(kind = %self.kind, "shutting down, stopping watcher");
                let last_seen = handle.watermark();
                let watermark = match handle.stop().await {
                    Ok(watermark) => watermark,
                    Err(e) => {
                        error!(kind = %self.kind, "failed to stop watcher: {}", e);
                        last_seen
                    }
                };
                self.persist(watermark.max(persisted)).await;
                self.persist_event_time(&clock, &mut persisted_event_time).await;
            }
        }

        self.release(lease).await;
        Ok(outcome)
    }

    /// Reads the watermark (and the event time for allocations) until the
    /// store answers. An unreachable store is retried with a doubling delay
    /// and is never read as an empty one. Returns the outcome instead when
    /// the term ends before a read succeeds.
    async fn restore(
        &self,
        lease: &mut LockLease,
    ) -> std::result::Result<(u64, i64), TermOutcome> {
        let mut delay = self.config.coordination.restore_retry();
        let mut attempt = 0u32;
        loop {
            let read = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(TermOutcome::Shutdown),
                read = self.read_checkpoints() => read,
            };
            let e = match read {
                Ok(restored) => return Ok(restored),
                Err(e) => e,
            };

            attempt += 1;
            CHECKPOINT_READ_FAILURES.with_label_values(&[self.kind.name()]).inc();
            warn!(kind = %self.kind, attempt, "failed to read checkpoint, retrying in {:?}: {}", delay, e);

            let retry_at = tokio::time::Instant::now() + delay;
            loop {
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => return Err(TermOutcome::Shutdown),
                    notice = lease.next_notice() => match notice {
                        Some(LeaseNotice::MonitorRetry { attempt, reason }) => {
                            warn!(kind = %self.kind, attempt, "lock monitor retrying: {}", reason);
                        }
                        None => {
                            warn!(kind = %self.kind, "lock lost before the checkpoint could be read");
                            return Err(TermOutcome::LockLost);
                        }
                    },
                    _ = tokio::time::sleep_until(retry_at) => break,
                }
            }
            delay = (delay * 2).min(self.config.coordination.restore_retry_max());
        }
    }

    async fn read_checkpoints(&self) -> Result<(u64, i64)> {
        let watermark = self.checkpointer.restore().await?;
        let event_time = match &self.event_times {
            Some(event_times) => i64::try_from(event_times.restore().await?).unwrap_or(0),
            None => 0,
        };
        Ok((watermark, event_time))
    }

    async fn start_watcher(
        &self,
        watermark: u64,
        clock: Arc<EventClock>,
        updates: mpsc::Sender<u64>,
    ) -> Result<WatcherHandle> {
        let sink = (self.sink_builder)()?;
        let watcher = Watcher::new(self.kind, self.api.clone(), sink, clock, self.config.watcher.clone());
        watcher.start(watermark, updates, &self.shutdown).await
    }

    /// Writes the clock when it moved past `persisted`; failures are retried
    /// on the next report.
    async fn persist_event_time(
        &self,
        clock: &EventClock,
        persisted: &mut i64,
    ) {
        let Some(event_times) = &self.event_times else {
            return;
        };
        let newest = clock.newest();
        if newest <= *persisted {
            return;
        }
        match event_times.persist(newest as u64).await {
            Ok(()) => {
                debug!(kind = %self.kind, event_time = newest, "event time persisted");
                *persisted = newest;
            }
            Err(e) => {
                error!(kind = %self.kind, event_time = newest, "failed to persist event time: {}", e);
                CHECKPOINT_FAILURES.with_label_values(&[self.kind.name()]).inc();
            }
        }
    }

    /// Writes the watermark; failures are logged and retried on the next report.
    async fn persist(
        &self,
        watermark: u64,
    ) -> bool {
        match self.checkpointer.persist(watermark).await {
            Ok(()) => {
                debug!(kind = %self.kind, watermark, "watermark persisted");
                true
            }
            Err(e) => {
                error!(kind = %self.kind, watermark, "failed to persist watermark: {}", e);
                CHECKPOINT_FAILURES.with_label_values(&[self.kind.name()]).inc();
                false
            }
        }
    }

    async fn release(
        &self,
        lease: LockLease,
    ) {
        LEADER.with_label_values(&[self.kind.name()]).set(0);
        let key = lease.key().to_string();
        match lease.release().await {
            Ok(()) => info!(kind = %self.kind, "released lock {}", key),
            Err(e) => warn!(kind = %self.kind, "failed to release lock {}: {}", key, e),
        }
    }
}
