//! Two firehose instances share a lock service and a checkpoint store. Only
//! one publishes at a time; when it shuts down the standby takes over from
//! the persisted watermark.

use std::sync::Arc;
use std::time::Duration;

use firehose::decode_watermark;
use firehose::CheckpointStore;
use firehose::FirehoseKind;
use firehose::InProcessLockService;
use firehose::Manager;
use firehose::NomadClient;
use firehose::SledCheckpointStore;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

use crate::common::firehose_config;
use crate::common::sink_builder;
use crate::common::wait_until;
use crate::common::Collector;
use crate::common::FakeNomad;
use crate::common::JOBS_CHECKPOINT_KEY;
use crate::common::WAIT_FOR_CONDITION;

struct Instance {
    collector: Collector,
    shutdown: CancellationToken,
    running: Option<tokio::task::JoinHandle<firehose::Result<()>>>,
}

async fn wait_for_checkpoint(
    store: &SledCheckpointStore,
    expected: u64,
) {
    let deadline = Instant::now() + WAIT_FOR_CONDITION;
    loop {
        let raw = store.get(JOBS_CHECKPOINT_KEY).await.unwrap();
        if raw.as_deref().and_then(decode_watermark) == Some(expected) {
            return;
        }
        assert!(Instant::now() < deadline, "checkpoint never reached {expected}");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

#[tokio::test]
#[traced_test]
async fn test_standby_takes_over_without_republishing() {
    let nomad = FakeNomad::start(10).await;
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("db");
    let store = Arc::new(SledCheckpointStore::open(&db_path).unwrap());
    let locks = InProcessLockService::new();

    nomad.upsert_job("web", 1);

    let mut instances = Vec::new();
    for _ in 0..2 {
        let collector = Collector::start().await;
        let config = firehose_config(&nomad, &collector, &db_path);
        let shutdown = CancellationToken::new();
        let manager = Manager::new(
            FirehoseKind::Jobs,
            config.clone(),
            Arc::new(NomadClient::new(config.upstream.clone()).unwrap()),
            store.clone(),
            Arc::new(locks.clone()),
            sink_builder(&config),
            shutdown.clone(),
        );
        instances.push(Instance {
            collector,
            shutdown,
            running: Some(tokio::spawn(async move { manager.start().await })),
        });
    }

    wait_until("a leader to publish", || {
        instances.iter().any(|i| !i.collector.published().is_empty())
    })
    .await;
    let leader = instances
        .iter()
        .position(|i| !i.collector.published().is_empty())
        .unwrap();
    let standby = 1 - leader;
    wait_for_checkpoint(&store, 11).await;
    assert!(instances[standby].collector.published().is_empty());

    instances[leader].shutdown.cancel();
    instances[leader].running.take().unwrap().await.unwrap().unwrap();

    nomad.upsert_job("api", 1);
    wait_until("the standby to publish", || {
        !instances[standby].collector.published().is_empty()
    })
    .await;
    wait_for_checkpoint(&store, 12).await;

    assert_eq!(instances[standby].collector.published(), vec![("api".to_string(), 12)]);
    assert_eq!(instances[leader].collector.published(), vec![("web".to_string(), 11)]);
    assert!(locks.holder("nomad-firehose/jobs.lock").is_some());

    instances[standby].shutdown.cancel();
    instances[standby].running.take().unwrap().await.unwrap().unwrap();
    assert_eq!(locks.holder("nomad-firehose/jobs.lock"), None);
}
