//! A leader streams job changes from a Nomad agent to an HTTP collector and
//! leaves its final watermark in the local checkpoint store on shutdown.

use std::collections::BTreeSet;
use std::sync::Arc;

use firehose::CheckpointStore;
use firehose::FirehoseKind;
use firehose::InProcessLockService;
use firehose::Manager;
use firehose::NomadClient;
use firehose::SledCheckpointStore;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

use crate::common::firehose_config;
use crate::common::sink_builder;
use crate::common::wait_until;
use crate::common::Collector;
use crate::common::FakeNomad;
use crate::common::JOBS_CHECKPOINT_KEY;

#[tokio::test]
#[traced_test]
async fn test_job_changes_reach_the_collector_and_are_checkpointed() {
    let nomad = FakeNomad::start(10).await;
    let collector = Collector::start().await;
    let dir = tempfile::tempdir().unwrap();
    let config = firehose_config(&nomad, &collector, &dir.path().join("db"));

    nomad.upsert_job("web", 1);

    let store = Arc::new(SledCheckpointStore::open(&config.coordination.local.db_path).unwrap());
    let locks = InProcessLockService::new();
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
    let running = tokio::spawn(async move { manager.start().await });

    wait_until("first job", || collector.published() == vec![("web".to_string(), 11)]).await;
    assert!(locks.holder("nomad-firehose/jobs.lock").is_some());

    nomad.upsert_job("web", 2);
    nomad.upsert_job("api", 1);
    wait_until("job updates", || collector.published().len() == 3).await;

    let published: BTreeSet<_> = collector.published().into_iter().collect();
    assert_eq!(
        published,
        BTreeSet::from([
            ("web".to_string(), 11),
            ("web".to_string(), 12),
            ("api".to_string(), 13),
        ])
    );
    assert_eq!(collector.received()[0].body["Version"], 1);

    shutdown.cancel();
    running.await.unwrap().unwrap();

    assert_eq!(store.get(JOBS_CHECKPOINT_KEY).await.unwrap(), Some(b"13".to_vec()));
    assert_eq!(locks.holder("nomad-firehose/jobs.lock"), None);
    // a fresh store starts from the beginning
    assert_eq!(nomad.list_indexes()[0], 0);
}
