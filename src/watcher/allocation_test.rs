use std::sync::Arc;

use serde_json::json;
use serde_json::Value;

use super::*;
use crate::test_utils::change_item;
use crate::test_utils::RecordingSink;
use crate::test_utils::ScriptedApi;
use crate::Error;
use crate::Sink;
use crate::UpstreamError;

fn allocation(
    client_status: &str,
    web_events: &[(i64, &str)],
    sidecar_events: &[(i64, &str)],
) -> Value {
    let events = |list: &[(i64, &str)]| -> Vec<Value> {
        list.iter()
            .map(|(time, kind)| json!({"Type": kind, "Time": time}))
            .collect()
    };
    json!({
        "ID": "alloc-1",
        "Name": "web.web[0]",
        "NodeID": "node-1",
        "EvalID": "eval-1",
        "JobID": "web",
        "TaskGroup": "web",
        "DesiredStatus": "run",
        "DesiredDescription": "",
        "ClientStatus": client_status,
        "ClientDescription": "Tasks are running",
        "ModifyTime": 1_700_000_000_000_000_000i64,
        "TaskStates": {
            "web": {
                "State": "running",
                "Failed": false,
                "StartedAt": "2024-01-01T00:00:00Z",
                "FinishedAt": null,
                "Events": events(web_events),
            },
            "sidecar": {
                "State": "pending",
                "Failed": true,
                "Events": events(sidecar_events),
            }
        }
    })
}

#[test]
fn test_decompose_publishes_every_event_first_time() {
    let record = allocation("running", &[(10, "Received"), (20, "Started")], &[(15, "Driver")]);
    let (updates, newest, terminal) = decompose(&record, None).unwrap();

    assert_eq!(updates.len(), 3);
    assert_eq!(newest, Some(20));
    assert!(!terminal);

    // task states are visited in name order
    assert_eq!(updates[0].task_name, "sidecar");
    assert!(updates[0].task_failed);
    assert_eq!(updates[1].task_name, "web");
    assert_eq!(updates[1].task_started_at.as_deref(), Some("2024-01-01T00:00:00Z"));
    assert_eq!(updates[2].task_event.as_ref().unwrap()["Type"], "Started");
    assert_eq!(updates[2].group_name, "web");
}

#[test]
fn test_decompose_skips_events_at_or_before_cutoff() {
    let record = allocation("running", &[(10, "Received"), (20, "Started"), (30, "Restarting")], &[]);
    let (updates, newest, _) = decompose(&record, Some(20)).unwrap();

    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].task_event.as_ref().unwrap()["Time"], 30);
    assert_eq!(newest, Some(30));
}

#[test]
fn test_decompose_without_new_events_yields_one_update() {
    let record = allocation("running", &[(10, "Received")], &[]);
    let (updates, newest, _) = decompose(&record, Some(10)).unwrap();

    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].task_event, None);
    assert_eq!(updates[0].task_name, "");
    assert_eq!(updates[0].allocation_id, "alloc-1");
    assert_eq!(newest, Some(10));
}

#[test]
fn test_decompose_handles_missing_task_states() {
    let record = json!({"ID": "fresh", "ClientStatus": "pending", "TaskStates": null});
    let (updates, newest, terminal) = decompose(&record, None).unwrap();
    assert_eq!(updates.len(), 1);
    assert_eq!(newest, None);
    assert!(!terminal);
}

#[test]
fn test_decompose_rejects_malformed_record() {
    let record = json!({"ID": "x", "TaskStates": "not-a-map"});
    assert!(matches!(
        decompose(&record, None),
        Err(Error::Upstream(UpstreamError::Malformed { .. }))
    ));
}

#[test]
fn test_update_serializes_with_upstream_field_names() {
    let record = allocation("running", &[(10, "Received")], &[]);
    let (updates, _, _) = decompose(&record, None).unwrap();
    let encoded = serde_json::to_value(&updates[0]).unwrap();

    for field in [
        "Name",
        "NodeID",
        "AllocationID",
        "EvalID",
        "DesiredStatus",
        "DesiredDescription",
        "ClientStatus",
        "ClientDescription",
        "JobID",
        "GroupName",
        "TaskName",
        "TaskState",
        "TaskFailed",
        "TaskStartedAt",
        "TaskFinishedAt",
        "TaskEvent",
        "ModifyTime",
    ] {
        assert!(encoded.get(field).is_some(), "missing {field}");
    }
}

#[tokio::test]
async fn test_allocation_events_only_publish_new_events() {
    let sink = Arc::new(RecordingSink::default());
    let api = Arc::new(ScriptedApi::new(vec![]).with_record(
        "alloc-1",
        allocation("running", &[(10, "Received"), (20, "Started")], &[]),
    ));
    let strategy = AllocationEvents::new(api.clone(), sink.clone(), Arc::default());

    strategy.handle(change_item("alloc-1", 5)).await.unwrap();
    assert_eq!(sink.messages.lock().len(), 2);
    assert_eq!(strategy.tracked(), 1);

    // same record again: nothing new, one synthetic update
    strategy.handle(change_item("alloc-1", 6)).await.unwrap();
    let payloads = sink.payloads();
    assert_eq!(payloads.len(), 3);
    assert_eq!(payloads[2]["TaskEvent"], Value::Null);
    assert!(sink.keys().iter().all(|k| k == "alloc-1"));
}

#[tokio::test]
async fn test_terminal_allocation_is_forgotten() {
    let sink = Arc::new(RecordingSink::default());
    let api = Arc::new(ScriptedApi::new(vec![]).with_record(
        "alloc-1",
        allocation("complete", &[(10, "Terminated")], &[]),
    ));
    let strategy = AllocationEvents::new(api, sink.clone(), Arc::default());

    strategy.handle(change_item("alloc-1", 5)).await.unwrap();
    assert_eq!(sink.payloads()[0]["ClientStatus"], "complete");
    assert_eq!(strategy.tracked(), 0);
}

#[tokio::test]
async fn test_missing_allocation_publishes_nothing() {
    let sink = Arc::new(RecordingSink::default());
    let strategy = AllocationEvents::new(Arc::new(ScriptedApi::new(vec![])), sink.clone(), Arc::default());

    let result = strategy.handle(change_item("gone", 5)).await;
    assert!(matches!(result, Err(Error::Upstream(UpstreamError::Status { status: 404, .. }))));
    assert!(sink.messages.lock().is_empty());
}

#[tokio::test]
async fn test_event_clock_advances_with_published_events() {
    let sink = Arc::new(RecordingSink::default());
    let clock = Arc::new(EventClock::default());
    let api = Arc::new(ScriptedApi::new(vec![]).with_record(
        "alloc-1",
        allocation("running", &[(10, "Received"), (20, "Started")], &[(15, "Driver")]),
    ));
    let strategy = AllocationEvents::new(api, sink.clone(), clock.clone());

    strategy.handle(change_item("alloc-1", 5)).await.unwrap();
    assert_eq!(clock.newest(), 20);
}

#[tokio::test]
async fn test_restored_event_clock_skips_already_published_history() {
    // first leader publishes the two events it saw and checkpoints the clock
    let first_sink = Arc::new(RecordingSink::default());
    let first_clock = Arc::new(EventClock::default());
    let first = AllocationEvents::new(
        Arc::new(ScriptedApi::new(vec![]).with_record(
            "alloc-1",
            allocation("running", &[(10, "Received"), (20, "Started")], &[]),
        )),
        first_sink.clone(),
        first_clock.clone(),
    );
    first.handle(change_item("alloc-1", 5)).await.unwrap();
    assert_eq!(first_sink.messages.lock().len(), 2);

    // a new leader starts from the checkpointed time with an empty cache
    let second_sink = Arc::new(RecordingSink::default());
    let second_clock = Arc::new(EventClock::starting_at(first_clock.newest()));
    let second = AllocationEvents::new(
        Arc::new(ScriptedApi::new(vec![]).with_record(
            "alloc-1",
            allocation("running", &[(10, "Received"), (20, "Started"), (30, "Restarting")], &[]),
        )),
        second_sink.clone(),
        second_clock.clone(),
    );
    second.handle(change_item("alloc-1", 6)).await.unwrap();

    let payloads = second_sink.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0]["TaskEvent"]["Type"], "Restarting");
    assert_eq!(second_clock.newest(), 30);
}

#[tokio::test]
async fn test_event_clock_does_not_advance_when_publish_fails() {
    let sink = Arc::new(RecordingSink::default());
    sink.stop().await.unwrap();
    let clock = Arc::new(EventClock::starting_at(5));
    let api = Arc::new(ScriptedApi::new(vec![]).with_record(
        "alloc-1",
        allocation("running", &[(10, "Received")], &[]),
    ));
    let strategy = AllocationEvents::new(api, sink, clock.clone());

    assert!(strategy.handle(change_item("alloc-1", 5)).await.is_err());
    assert_eq!(clock.newest(), 5);
}
