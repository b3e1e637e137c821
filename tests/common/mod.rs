use std::collections::BTreeMap;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use firehose::build_sink;
use firehose::CoordinationBackend;
use firehose::FirehoseConfig;
use firehose::SinkBuilder;
use firehose::SinkKind;
use firehose::KEY_HEADER;
use parking_lot::Mutex;
use serde_json::json;
use serde_json::Value;
use tokio::sync::Notify;
use tokio::time::Instant;
use warp::http::HeaderMap;
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::Filter;

pub const JOBS_CHECKPOINT_KEY: &str = "nomad-firehose/jobs.value";
pub const WAIT_FOR_CONDITION: Duration = Duration::from_secs(10);

#[derive(Default)]
struct NomadState {
    index: u64,
    jobs: BTreeMap<String, (u64, Value)>,
    /// `index` query parameter of every list call, in arrival order
    list_indexes: Vec<u64>,
}

/// Minimal Nomad agent serving `/v1/jobs` as a blocking query and
/// `/v1/job/<id>` lookups
#[derive(Clone)]
pub struct FakeNomad {
    pub addr: SocketAddr,
    state: Arc<Mutex<NomadState>>,
    changed: Arc<Notify>,
}

impl FakeNomad {
    pub async fn start(first_index: u64) -> Self {
        let state = Arc::new(Mutex::new(NomadState {
            index: first_index,
            ..Default::default()
        }));
        let changed = Arc::new(Notify::new());

        let list_state = state.clone();
        let list_changed = changed.clone();
        let list = warp::get()
            .and(warp::path!("v1" / "jobs"))
            .and(warp::query::<HashMap<String, String>>())
            .and_then(move |query: HashMap<String, String>| {
                let state = list_state.clone();
                let changed = list_changed.clone();
                async move { Ok::<_, warp::Rejection>(blocking_list(state, changed, query).await) }
            });

        let info_state = state.clone();
        let info = warp::get().and(warp::path!("v1" / "job" / String)).map(move |id: String| {
            match info_state.lock().jobs.get(&id) {
                Some((_, record)) => warp::reply::with_status(warp::reply::json(record), StatusCode::OK),
                None => warp::reply::with_status(warp::reply::json(&json!({})), StatusCode::NOT_FOUND),
            }
        });

        let (addr, server) = warp::serve(list.or(info)).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        Self { addr, state, changed }
    }

    pub fn address(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Registers or updates a job at the next index and wakes blocked queries
    pub fn upsert_job(
        &self,
        id: &str,
        version: u64,
    ) -> u64 {
        let index = {
            let mut state = self.state.lock();
            state.index += 1;
            let index = state.index;
            let record = json!({"ID": id, "Version": version, "ModifyIndex": index});
            state.jobs.insert(id.to_string(), (index, record));
            index
        };
        self.changed.notify_waiters();
        index
    }

    pub fn list_indexes(&self) -> Vec<u64> {
        self.state.lock().list_indexes.clone()
    }
}

async fn blocking_list(
    state: Arc<Mutex<NomadState>>,
    changed: Arc<Notify>,
    query: HashMap<String, String>,
) -> warp::reply::Response {
    use warp::Reply;

    let wanted = query.get("index").and_then(|v| v.parse::<u64>().ok()).unwrap_or(0);
    let wait = query
        .get("wait")
        .and_then(|v| v.trim_end_matches("ms").parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(1));
    state.lock().list_indexes.push(wanted);

    let deadline = Instant::now() + wait;
    loop {
        let notified = changed.notified();
        if state.lock().index > wanted {
            break;
        }
        if tokio::time::timeout_at(deadline, notified).await.is_err() {
            break;
        }
    }

    let (index, stubs) = {
        let state = state.lock();
        let stubs: Vec<Value> = state
            .jobs
            .iter()
            .map(|(id, (modify_index, _))| json!({"ID": id, "ModifyIndex": modify_index}))
            .collect();
        (state.index, stubs)
    };

    let mut response = warp::reply::json(&stubs).into_response();
    response
        .headers_mut()
        .insert("X-Nomad-Index", index.to_string().parse().expect("numeric header value"));
    response
}

#[derive(Debug, Clone)]
pub struct Received {
    pub key: Option<String>,
    pub body: Value,
}

/// HTTP endpoint recording every event POSTed by an http sink
#[derive(Clone)]
pub struct Collector {
    pub addr: SocketAddr,
    inbox: Arc<Mutex<Vec<Received>>>,
}

impl Collector {
    pub async fn start() -> Self {
        let inbox: Arc<Mutex<Vec<Received>>> = Arc::new(Mutex::new(Vec::new()));
        let inbox_clone = inbox.clone();

        let route = warp::post()
            .and(warp::path("events"))
            .and(warp::header::headers_cloned())
            .and(warp::body::bytes())
            .map(move |headers: HeaderMap, body: Bytes| {
                inbox_clone.lock().push(Received {
                    key: headers
                        .get(KEY_HEADER)
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string),
                    body: serde_json::from_slice(&body).unwrap_or(Value::Null),
                });
                warp::reply()
            });

        let (addr, server) = warp::serve(route).bind_ephemeral(([127, 0, 0, 1], 0));
        tokio::spawn(server);
        Self { addr, inbox }
    }

    pub fn url(&self) -> String {
        format!("http://{}/events", self.addr)
    }

    pub fn received(&self) -> Vec<Received> {
        self.inbox.lock().clone()
    }

    /// `(key, ModifyIndex)` of every received event
    pub fn published(&self) -> Vec<(String, u64)> {
        self.received()
            .into_iter()
            .map(|r| {
                (
                    r.key.unwrap_or_default(),
                    r.body["ModifyIndex"].as_u64().unwrap_or_default(),
                )
            })
            .collect()
    }
}

/// Local coordination, short waits and an http sink pointed at `collector`
pub fn firehose_config(
    nomad: &FakeNomad,
    collector: &Collector,
    db_path: &Path,
) -> FirehoseConfig {
    let mut config = FirehoseConfig::default();
    config.upstream.address = nomad.address();
    config.coordination.backend = CoordinationBackend::Local;
    config.coordination.local.db_path = db_path.to_path_buf();
    config.leadership.acquire_interval_ms = 50;
    config.watcher.wait_time_secs = 1;
    config.watcher.error_backoff_ms = 100;
    config.watcher.report_interval_ms = 100;
    config.watcher.inflight_grace_ms = 1_000;
    config.sink.kind = Some(SinkKind::Http);
    config.sink.http.address = Some(collector.url());
    config.sink.drain_poll_interval_ms = 10;
    config
        .validate()
        .expect("integration config should be valid")
}

pub fn sink_builder(config: &FirehoseConfig) -> SinkBuilder {
    let sink_config = config.sink.clone();
    Arc::new(move || build_sink(&sink_config))
}

/// Polls `condition` until it holds or [`WAIT_FOR_CONDITION`] passes
pub async fn wait_until<F>(
    what: &str,
    mut condition: F,
) where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + WAIT_FOR_CONDITION;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}
