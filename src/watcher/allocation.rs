//! Allocation changes are published per task event rather than per record.
//!
//! Each changed allocation is fetched and every task event newer than the
//! newest one already published for that allocation becomes its own
//! [`AllocationUpdate`]. An allocation that changed without a new task event
//! (a desired status flip, a reschedule) yields one update with no event.
//!
//! The newest published event time is kept on an [`EventClock`] the leader
//! checkpoints next to the index watermark. After a failover it becomes the
//! cutoff for every allocation the new leader has not seen yet, so task
//! event history is not replayed.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::atomic::AtomicI64;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use tracing::trace;

use super::PublishStrategy;
use crate::ChangeItem;
use crate::OrchestratorApi;
use crate::ResourceKind;
use crate::Result;
use crate::Sink;
use crate::UpstreamError;

/// Client statuses after which an allocation never changes again
const TERMINAL_CLIENT_STATUSES: [&str; 3] = ["complete", "failed", "lost"];

/// Published payload for one allocation task event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AllocationUpdate {
    pub name: String,
    #[serde(rename = "NodeID")]
    pub node_id: String,
    #[serde(rename = "AllocationID")]
    pub allocation_id: String,
    pub desired_status: String,
    pub desired_description: String,
    pub client_status: String,
    pub client_description: String,
    #[serde(rename = "JobID")]
    pub job_id: String,
    pub group_name: String,
    pub task_name: String,
    #[serde(rename = "EvalID")]
    pub eval_id: String,
    pub task_state: String,
    pub task_failed: bool,
    pub task_started_at: Option<String>,
    pub task_finished_at: Option<String>,
    pub task_event: Option<Value>,
    pub modify_time: i64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct Allocation {
    #[serde(rename = "ID")]
    id: String,
    name: String,
    #[serde(rename = "NodeID")]
    node_id: String,
    #[serde(rename = "EvalID")]
    eval_id: String,
    #[serde(rename = "JobID")]
    job_id: String,
    task_group: String,
    desired_status: String,
    desired_description: String,
    client_status: String,
    client_description: String,
    modify_time: i64,
    task_states: Option<BTreeMap<String, TaskState>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct TaskState {
    state: String,
    failed: bool,
    started_at: Option<String>,
    finished_at: Option<String>,
    events: Option<Vec<Value>>,
}

fn event_time(event: &Value) -> i64 {
    event.get("Time").and_then(Value::as_i64).unwrap_or(0)
}

impl Allocation {
    fn update(
        &self,
        task: Option<(&str, &TaskState)>,
        event: Option<&Value>,
    ) -> AllocationUpdate {
        AllocationUpdate {
            name: self.name.clone(),
            node_id: self.node_id.clone(),
            allocation_id: self.id.clone(),
            desired_status: self.desired_status.clone(),
            desired_description: self.desired_description.clone(),
            client_status: self.client_status.clone(),
            client_description: self.client_description.clone(),
            job_id: self.job_id.clone(),
            group_name: self.task_group.clone(),
            task_name: task.map(|(name, _)| name.to_string()).unwrap_or_default(),
            eval_id: self.eval_id.clone(),
            task_state: task.map(|(_, s)| s.state.clone()).unwrap_or_default(),
            task_failed: task.is_some_and(|(_, s)| s.failed),
            task_started_at: task.and_then(|(_, s)| s.started_at.clone()),
            task_finished_at: task.and_then(|(_, s)| s.finished_at.clone()),
            task_event: event.cloned(),
            modify_time: self.modify_time,
        }
    }

    fn is_terminal(&self) -> bool {
        TERMINAL_CLIENT_STATUSES.contains(&self.client_status.as_str())
    }
}

/// Splits an allocation into updates for every task event newer than
/// `cutoff`. Returns the updates, the newest event time seen and whether the
/// allocation reached a terminal client status.
pub(crate) fn decompose(
    allocation: &Value,
    cutoff: Option<i64>,
) -> Result<(Vec<AllocationUpdate>, Option<i64>, bool)> {
    let allocation: Allocation = serde_json::from_value(allocation.clone()).map_err(|e| UpstreamError::Malformed {
        endpoint: ResourceKind::Allocations.list_path().to_string(),
        reason: e.to_string(),
    })?;

    let mut updates = Vec::new();
    let mut newest = cutoff;

    if let Some(task_states) = &allocation.task_states {
        for (task_name, state) in task_states {
            for event in state.events.iter().flatten() {
                let time = event_time(event);
                if cutoff.is_some_and(|c| time <= c) {
                    continue;
                }
                newest = Some(newest.map_or(time, |n| n.max(time)));
                updates.push(allocation.update(Some((task_name.as_str(), state)), Some(event)));
            }
        }
    }

    if updates.is_empty() {
        updates.push(allocation.update(None, None));
    }
    Ok((updates, newest, allocation.is_terminal()))
}

/// Newest task event time published for a role, in upstream nanoseconds
#[derive(Debug, Default)]
pub struct EventClock {
    newest: AtomicI64,
}

impl EventClock {
    pub fn starting_at(time: i64) -> Self {
        Self {
            newest: AtomicI64::new(time),
        }
    }

    pub fn newest(&self) -> i64 {
        self.newest.load(Ordering::Acquire)
    }

    fn advance(
        &self,
        time: i64,
    ) {
        self.newest.fetch_max(time, Ordering::AcqRel);
    }
}

/// Publishes allocation changes as task-event updates keyed by allocation ID
pub struct AllocationEvents {
    api: Arc<dyn OrchestratorApi>,
    sink: Arc<dyn Sink>,
    clock: Arc<EventClock>,
    /// Cutoff for allocations without an entry in `cutoffs`
    floor: Option<i64>,
    /// Newest published task event time per allocation
    cutoffs: Mutex<HashMap<String, i64>>,
}

impl AllocationEvents {
    /// Events at or before the clock's current time are treated as already
    /// published.
    pub fn new(
        api: Arc<dyn OrchestratorApi>,
        sink: Arc<dyn Sink>,
        clock: Arc<EventClock>,
    ) -> Self {
        let floor = Some(clock.newest()).filter(|t| *t > 0);
        Self {
            api,
            sink,
            clock,
            floor,
            cutoffs: Mutex::new(HashMap::new()),
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked(&self) -> usize {
        self.cutoffs.lock().len()
    }
}

#[async_trait]
impl PublishStrategy for AllocationEvents {
    async fn handle(
        &self,
        item: ChangeItem,
    ) -> Result<()> {
        let record = self.api.info(ResourceKind::Allocations, &item.id).await?;

        // claim the events under the lock so concurrent lookups of the same
        // allocation never publish an event twice
        let (updates, newest) = {
            let mut cutoffs = self.cutoffs.lock();
            let cutoff = cutoffs.get(&item.id).copied().or(self.floor);
            let (updates, newest, terminal) = decompose(&record, cutoff)?;
            if terminal {
                cutoffs.remove(&item.id);
            } else if let Some(newest) = newest {
                cutoffs.insert(item.id.clone(), newest);
            }
            (updates, newest)
        };

        debug!(id = %item.id, count = updates.len(), "publishing allocation updates");
        for update in updates {
            trace!(?update);
            let payload = serde_json::to_vec(&update)?;
            self.sink.put(Some(item.id.clone()), payload).await?;
        }

        if let Some(newest) = newest {
            self.clock.advance(newest);
        }
        Ok(())
    }
}
