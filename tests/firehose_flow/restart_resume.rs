//! A restarted firehose resumes from the persisted watermark: changes made
//! while it was down are published once, older records are not repeated.

use std::path::Path;
use std::sync::Arc;

use firehose::FirehoseConfig;
use firehose::FirehoseKind;
use firehose::InProcessLockService;
use firehose::Manager;
use firehose::NomadClient;
use firehose::SledCheckpointStore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_test::traced_test;

use crate::common::firehose_config;
use crate::common::sink_builder;
use crate::common::wait_until;
use crate::common::Collector;
use crate::common::FakeNomad;

fn spawn_manager(
    config: &FirehoseConfig,
    db_path: &Path,
    shutdown: &CancellationToken,
) -> JoinHandle<firehose::Result<()>> {
    let store = Arc::new(SledCheckpointStore::open(db_path).unwrap());
    let manager = Manager::new(
        FirehoseKind::Jobs,
        config.clone(),
        Arc::new(NomadClient::new(config.upstream.clone()).unwrap()),
        store,
        Arc::new(InProcessLockService::new()),
        sink_builder(config),
        shutdown.clone(),
    );
    // the manager owns the only handle on the database and drops it on exit
    tokio::spawn(async move { manager.start().await })
}

#[tokio::test]
#[traced_test]
async fn test_restart_resumes_from_checkpoint() {
    let nomad = FakeNomad::start(10).await;
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("db");
    nomad.upsert_job("web", 1);

    // first run
    let first = Collector::start().await;
    let config = firehose_config(&nomad, &first, &db_path);
    let shutdown = CancellationToken::new();
    let running = spawn_manager(&config, &db_path, &shutdown);

    wait_until("first run publish", || first.published() == vec![("web".to_string(), 11)]).await;
    shutdown.cancel();
    running.await.unwrap().unwrap();

    // a change while nobody is watching
    nomad.upsert_job("api", 1);
    let calls_before_restart = nomad.list_indexes().len();

    // second run against the same checkpoint database
    let second = Collector::start().await;
    let config = firehose_config(&nomad, &second, &db_path);
    let shutdown = CancellationToken::new();
    let running = spawn_manager(&config, &db_path, &shutdown);

    wait_until("second run publish", || !second.published().is_empty()).await;
    // let the next long poll start so any republish would have happened
    wait_until("next long poll", || nomad.list_indexes().contains(&12)).await;

    assert_eq!(second.published(), vec![("api".to_string(), 12)]);
    assert_eq!(nomad.list_indexes()[calls_before_restart], 11);
    assert_eq!(first.published().len(), 1);

    shutdown.cancel();
    running.await.unwrap().unwrap();
}
