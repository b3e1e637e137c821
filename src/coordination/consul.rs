//! Consul-backed checkpoints and leader locks.
//!
//! Lock protocol:
//! 1. create a session (`Behavior = release`, TTL from config)
//! 2. `PUT /v1/kv/<key>?acquire=<session>` until it returns `true`, blocking on
//!    the key while another session holds it and retrying every
//!    `LOCK_RETRY` while a free key is still inside its lock delay
//! 3. renew the session every TTL/2 and watch the key with blocking queries;
//!    the lease monitor closes once the key no longer names our session
//! 4. release: `?release=<session>` then destroy the session

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::CheckpointStore;
use super::LeaseHandle;
use super::LeaseNotice;
use super::LockLease;
use super::LockService;
use crate::CoordinationConfig;
use crate::CoordinationError;
use crate::Error;
use crate::Result;

const CONSUL_INDEX_HEADER: &str = "X-Consul-Index";
const CONSUL_TOKEN_HEADER: &str = "X-Consul-Token";
const LOCK_WAIT: Duration = Duration::from_secs(60);
const LOCK_WAIT_SLACK: Duration = Duration::from_secs(15);
const LOCK_DELAY: &str = "1s";
/// Pause before re-acquiring a free key that refused us
const LOCK_RETRY: Duration = Duration::from_secs(1);

#[derive(Debug, Deserialize)]
struct SessionCreated {
    #[serde(rename = "ID")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct KvEntry {
    #[serde(rename = "Session", default)]
    session: Option<String>,
}

/// Outcome of one blocking read of the lock key
#[derive(Debug, PartialEq, Eq)]
enum KeyState {
    Missing { index: u64 },
    Held { session: Option<String>, index: u64 },
}

impl KeyState {
    fn index(&self) -> u64 {
        match self {
            KeyState::Missing { index } | KeyState::Held { index, .. } => *index,
        }
    }

    fn is_free(&self) -> bool {
        matches!(self, KeyState::Missing { .. } | KeyState::Held { session: None, .. })
    }
}

#[derive(Clone)]
pub struct ConsulCoordinator {
    http: reqwest::Client,
    address: String,
    monitor_retries: u32,
    monitor_retry: Duration,
}

impl std::fmt::Debug for ConsulCoordinator {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("ConsulCoordinator").field("address", &self.address).finish()
    }
}

impl ConsulCoordinator {
    pub fn new(config: &CoordinationConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        if let Some(token) = &config.consul.token {
            let value = HeaderValue::from_str(token).map_err(|_| {
                Error::InvalidConfig("coordination.consul.token is not a valid header value".into())
            })?;
            headers.insert(CONSUL_TOKEN_HEADER, value);
        }

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("failed to build consul client: {e}")))?;

        Ok(Self {
            http,
            address: config.consul.address.trim_end_matches('/').to_string(),
            monitor_retries: config.monitor_retries,
            monitor_retry: config.monitor_retry(),
        })
    }

    fn url(
        &self,
        path: &str,
    ) -> String {
        format!("{}{}", self.address, path)
    }

    async fn create_session(
        &self,
        name: &str,
        ttl: Duration,
    ) -> Result<String> {
        let endpoint = self.url("/v1/session/create");
        let body = json!({
            "Name": name,
            "TTL": format!("{}s", ttl.as_secs()),
            "Behavior": "release",
            "LockDelay": LOCK_DELAY,
        });

        let session_error = |reason: String| CoordinationError::Session {
            name: name.to_string(),
            reason,
        };

        let response = self
            .http
            .put(&endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| session_error(e.to_string()))?;
        if !response.status().is_success() {
            return Err(session_error(format!("status {}", response.status())).into());
        }

        let created: SessionCreated = response.json().await.map_err(|e| session_error(e.to_string()))?;
        debug!(name, session_id = %created.id, "session created");
        Ok(created.id)
    }

    async fn renew_session(
        &self,
        session_id: &str,
    ) -> std::result::Result<bool, reqwest::Error> {
        let response = self
            .http
            .put(self.url(&format!("/v1/session/renew/{session_id}")))
            .send()
            .await?;
        // 404: session already invalidated
        Ok(response.status() != StatusCode::NOT_FOUND)
    }

    async fn destroy_session(
        &self,
        session_id: &str,
    ) -> std::result::Result<(), reqwest::Error> {
        self.http
            .put(self.url(&format!("/v1/session/destroy/{session_id}")))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    /// `true` when the key now belongs to `session_id`
    async fn try_acquire(
        &self,
        key: &str,
        session_id: &str,
    ) -> std::result::Result<bool, reqwest::Error> {
        let granted: bool = self
            .http
            .put(self.url(&format!("/v1/kv/{key}")))
            .query(&[("acquire", session_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(granted)
    }

    /// Blocking read of the lock key, returns once the key changes past
    /// `index` or the wait elapses.
    async fn read_key(
        &self,
        key: &str,
        index: u64,
    ) -> std::result::Result<KeyState, reqwest::Error> {
        let response = self
            .http
            .get(self.url(&format!("/v1/kv/{key}")))
            .query(&[
                ("index", index.to_string()),
                ("wait", format!("{}s", LOCK_WAIT.as_secs())),
            ])
            .timeout(LOCK_WAIT + LOCK_WAIT_SLACK)
            .send()
            .await?;

        let new_index = response
            .headers()
            .get(CONSUL_INDEX_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(index);

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(KeyState::Missing { index: new_index });
        }

        let entries: Vec<KvEntry> = response.error_for_status()?.json().await?;
        let session = entries.into_iter().next().and_then(|e| e.session);
        Ok(KeyState::Held {
            session,
            index: new_index,
        })
    }

    async fn release_key(
        &self,
        key: &str,
        session_id: &str,
    ) -> std::result::Result<bool, reqwest::Error> {
        let released: bool = self
            .http
            .put(self.url(&format!("/v1/kv/{key}")))
            .query(&[("release", session_id)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(released)
    }

    async fn wait_for_grant(
        &self,
        key: &str,
        session_id: &str,
    ) -> std::result::Result<(), reqwest::Error> {
        loop {
            if self.try_acquire(key, session_id).await? {
                return Ok(());
            }

            // index 0 answers at once with the current holder
            let state = self.read_key(key, 0).await?;
            if state.is_free() {
                // a just released key refuses acquires for the lock delay
                debug!(key, "lock is free but the acquire was refused, retrying in {:?}", LOCK_RETRY);
                tokio::time::sleep(LOCK_RETRY).await;
                continue;
            }

            let mut index = state.index();
            loop {
                debug!(key, index, "lock is held by another session, waiting");
                let state = self.read_key(key, index).await?;
                index = state.index();
                if state.is_free() {
                    break;
                }
            }
        }
    }

    fn spawn_renewer(
        &self,
        session_id: String,
        ttl: Duration,
        stop: CancellationToken,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ttl / 2);
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = stop.cancelled() => return,
                    _ = ticker.tick() => {
                        match this.renew_session(&session_id).await {
                            Ok(true) => debug!(%session_id, "session renewed"),
                            Ok(false) => {
                                warn!(%session_id, "session no longer exists, stop renewing");
                                return;
                            }
                            Err(e) => warn!(%session_id, "session renew failed: {}", e),
                        }
                    }
                }
            }
        });
    }

    /// Watches the lock key; drops `notices` (closing the lease monitor) once
    /// ownership is gone or retries are exhausted.
    fn spawn_monitor(
        &self,
        key: String,
        session_id: String,
        mut index: u64,
        notices: mpsc::Sender<LeaseNotice>,
        stop: CancellationToken,
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut failures = 0u32;
            loop {
                let state = tokio::select! {
                    _ = stop.cancelled() => return,
                    state = this.read_key(&key, index) => state,
                };

                match state {
                    Ok(state) => {
                        failures = 0;
                        index = state.index();
                        let still_ours = matches!(
                            &state,
                            KeyState::Held { session: Some(s), .. } if *s == session_id
                        );
                        if !still_ours {
                            warn!(%key, %session_id, "lock ownership lost: {:?}", state);
                            return;
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        if failures > this.monitor_retries {
                            error!(%key, "lock monitor gave up after {} failures: {}", failures - 1, e);
                            return;
                        }
                        let _ = notices.try_send(LeaseNotice::MonitorRetry {
                            attempt: failures,
                            reason: e.to_string(),
                        });
                        tokio::select! {
                            _ = stop.cancelled() => return,
                            _ = tokio::time::sleep(this.monitor_retry) => {}
                        }
                    }
                }
            }
        });
    }
}

#[async_trait]
impl CheckpointStore for ConsulCoordinator {
    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<Vec<u8>>> {
        let endpoint = self.url(&format!("/v1/kv/{key}"));
        let checkpoint_error = |reason: String| CoordinationError::Checkpoint {
            key: key.to_string(),
            reason,
        };

        let response = self
            .http
            .get(&endpoint)
            .query(&[("raw", "true")])
            .send()
            .await
            .map_err(|source| CoordinationError::Request {
                endpoint: endpoint.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            s if s.is_success() => {
                let body = response.bytes().await.map_err(|e| checkpoint_error(e.to_string()))?;
                Ok(Some(body.to_vec()))
            }
            s => Err(checkpoint_error(format!("status {s}")).into()),
        }
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
    ) -> Result<()> {
        let endpoint = self.url(&format!("/v1/kv/{key}"));
        let response = self
            .http
            .put(&endpoint)
            .body(value)
            .send()
            .await
            .map_err(|source| CoordinationError::Request {
                endpoint: endpoint.clone(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CoordinationError::Checkpoint {
                key: key.to_string(),
                reason: format!("status {}", response.status()),
            }
            .into());
        }
        Ok(())
    }
}

#[async_trait]
impl LockService for ConsulCoordinator {
    async fn acquire(
        &self,
        key: &str,
        session_name: &str,
        session_ttl: Duration,
    ) -> Result<LockLease> {
        let session_id = self.create_session(session_name, session_ttl).await?;
        let stop = CancellationToken::new();
        self.spawn_renewer(session_id.clone(), session_ttl, stop.clone());
        // an abandoned acquire stops renewing and lets the session expire
        let abandoned = stop.clone().drop_guard();

        info!(key, %session_id, "trying to acquire consul lock");
        if let Err(e) = self.wait_for_grant(key, &session_id).await {
            stop.cancel();
            if let Err(destroy_err) = self.destroy_session(&session_id).await {
                warn!(%session_id, "failed to destroy session: {}", destroy_err);
            }
            return Err(CoordinationError::Acquire {
                key: key.to_string(),
                reason: e.to_string(),
            }
            .into());
        }
        info!(key, %session_id, "lock successfully acquired");
        abandoned.disarm();

        let (notice_tx, notice_rx) = mpsc::channel(16);
        // index 0: the monitor's first read sees the grant right away
        self.spawn_monitor(key.to_string(), session_id.clone(), 0, notice_tx, stop.clone());

        let handle = ConsulLeaseHandle {
            coordinator: self.clone(),
            key: key.to_string(),
            session_id: session_id.clone(),
            stop,
        };
        Ok(LockLease::new(key.to_string(), session_id, notice_rx, Box::new(handle)))
    }
}

struct ConsulLeaseHandle {
    coordinator: ConsulCoordinator,
    key: String,
    session_id: String,
    stop: CancellationToken,
}

#[async_trait]
impl LeaseHandle for ConsulLeaseHandle {
    async fn release(&self) -> Result<()> {
        self.stop.cancel();

        let release_error = |reason: String| CoordinationError::Release {
            key: self.key.clone(),
            reason,
        };

        let released = self
            .coordinator
            .release_key(&self.key, &self.session_id)
            .await
            .map_err(|e| release_error(e.to_string()));

        // the session goes regardless, so a failed release still frees the key
        if let Err(e) = self.coordinator.destroy_session(&self.session_id).await {
            warn!(session_id = %self.session_id, "failed to destroy session: {}", e);
        }

        match released? {
            true => Ok(()),
            false => Err(release_error("key not held by this session".into()).into()),
        }
    }
}
