use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use serde_json::Value;
use tokio::time::Instant;

use crate::decode_watermark;
use crate::ChangeItem;
use crate::CheckpointStore;
use crate::CoordinationError;
use crate::ListPage;
use crate::OrchestratorApi;
use crate::QueryCursor;
use crate::ResourceKind;
use crate::Result;
use crate::Sink;
use crate::SinkError;
use crate::SinkMessage;
use crate::UpstreamError;

pub fn change_item(
    id: &str,
    modify_index: u64,
) -> ChangeItem {
    ChangeItem {
        id: id.to_string(),
        modify_index,
        stub: json!({"ID": id, "ModifyIndex": modify_index}),
    }
}

pub fn page(
    last_index: u64,
    items: &[(&str, u64)],
) -> ListPage {
    ListPage {
        items: items.iter().map(|(id, idx)| change_item(id, *idx)).collect(),
        last_index,
    }
}

/// One scripted answer to a list query
#[derive(Debug, Clone)]
pub enum ListStep {
    Page(ListPage),
    Fail,
}

/// Orchestrator fake answering list queries from a script. Once the script
/// runs out, list calls block like an idle long poll.
#[derive(Default)]
pub struct ScriptedApi {
    steps: Mutex<VecDeque<ListStep>>,
    records: Mutex<HashMap<String, Value>>,
    pub list_calls: Mutex<Vec<(QueryCursor, Instant)>>,
    pub info_calls: Mutex<Vec<String>>,
}

impl ScriptedApi {
    pub fn new(steps: Vec<ListStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            ..Default::default()
        }
    }

    pub fn with_record(
        self,
        id: &str,
        record: Value,
    ) -> Self {
        self.records.lock().insert(id.to_string(), record);
        self
    }

    pub fn push(
        &self,
        step: ListStep,
    ) {
        self.steps.lock().push_back(step);
    }

    pub fn cursors(&self) -> Vec<QueryCursor> {
        self.list_calls.lock().iter().map(|(c, _)| *c).collect()
    }
}

#[async_trait]
impl OrchestratorApi for ScriptedApi {
    async fn list(
        &self,
        kind: ResourceKind,
        cursor: &QueryCursor,
    ) -> Result<ListPage> {
        self.list_calls.lock().push((*cursor, Instant::now()));
        let step = self.steps.lock().pop_front();
        match step {
            Some(ListStep::Page(page)) => Ok(page),
            Some(ListStep::Fail) => Err(UpstreamError::Status {
                endpoint: kind.list_path().to_string(),
                status: 500,
            }
            .into()),
            None => std::future::pending().await,
        }
    }

    async fn info(
        &self,
        kind: ResourceKind,
        id: &str,
    ) -> Result<Value> {
        self.info_calls.lock().push(id.to_string());
        let record = self.records.lock().get(id).cloned();
        record.ok_or_else(|| {
            UpstreamError::Status {
                endpoint: kind.info_path(id),
                status: 404,
            }
            .into()
        })
    }
}

/// Sink that keeps every accepted message
#[derive(Default)]
pub struct RecordingSink {
    pub messages: Mutex<Vec<SinkMessage>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl RecordingSink {
    pub fn keys(&self) -> Vec<String> {
        self.messages.lock().iter().filter_map(|m| m.key.clone()).collect()
    }

    pub fn payloads(&self) -> Vec<Value> {
        self.messages
            .lock()
            .iter()
            .map(|m| serde_json::from_slice(&m.payload).unwrap_or(Value::Null))
            .collect()
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Sink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn start(&self) -> Result<()> {
        self.started.store(true, Ordering::Release);
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
        if self.is_stopped() {
            return Err(SinkError::Stopped("recording").into());
        }
        self.messages.lock().push(SinkMessage::new(key, payload));
        Ok(())
    }
}

/// Checkpoint store keeping the write history
#[derive(Default)]
pub struct MemoryCheckpointStore {
    values: Mutex<HashMap<String, Vec<u8>>>,
    pub writes: Mutex<Vec<u64>>,
    failing: AtomicBool,
    read_failing: AtomicBool,
    pub reads: AtomicUsize,
}

impl MemoryCheckpointStore {
    pub fn with_value(
        key: &str,
        raw: &[u8],
    ) -> Self {
        let store = Self::default();
        store.values.lock().insert(key.to_string(), raw.to_vec());
        store
    }

    pub fn set_value(
        &self,
        key: &str,
        raw: &[u8],
    ) {
        self.values.lock().insert(key.to_string(), raw.to_vec());
    }

    /// Makes `get` fail until cleared
    pub fn set_read_failing(
        &self,
        failing: bool,
    ) {
        self.read_failing.store(failing, Ordering::Release);
    }

    pub fn set_failing(
        &self,
        failing: bool,
    ) {
        self.failing.store(failing, Ordering::Release);
    }

    pub fn value(
        &self,
        key: &str,
    ) -> Option<u64> {
        self.values.lock().get(key).and_then(|raw| decode_watermark(raw))
    }

    pub fn history(&self) -> Vec<u64> {
        self.writes.lock().clone()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn get(
        &self,
        key: &str,
    ) -> Result<Option<Vec<u8>>> {
        self.reads.fetch_add(1, Ordering::AcqRel);
        if self.read_failing.load(Ordering::Acquire) {
            return Err(CoordinationError::Checkpoint {
                key: key.to_string(),
                reason: "store unreachable".into(),
            }
            .into());
        }
        Ok(self.values.lock().get(key).cloned())
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
    ) -> Result<()> {
        if self.failing.load(Ordering::Acquire) {
            return Err(CoordinationError::Checkpoint {
                key: key.to_string(),
                reason: "store unavailable".into(),
            }
            .into());
        }
        if let Some(watermark) = decode_watermark(&value) {
            self.writes.lock().push(watermark);
        }
        self.values.lock().insert(key.to_string(), value);
        Ok(())
    }
}
