
use std::net::SocketAddr;

use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounterVec;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

lazy_static! {
    pub static ref SINK_PUBLISHED: IntCounterVec = IntCounterVec::new(
        Opts::new("sink_published_total", "Events delivered to the sink destination"),
        &["sink"]
    )
    .expect("metric can not be created");

    pub static ref SINK_DROPPED: IntCounterVec = IntCounterVec::new(
        Opts::new("sink_dropped_total", "Events dropped after a failed publish"),
        &["sink"]
    )
    .expect("metric can not be created");

    pub static ref SINK_BATCH_SIZE: HistogramVec = HistogramVec::new(
        HistogramOpts::new("sink_batch_size", "Number of events per flushed batch")
            .buckets(exponential_buckets(1.0, 2.0, 12).expect("valid buckets")),
        &["sink"]
    )
    .expect("metric can not be created");

    pub static ref UPSTREAM_LIST_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("upstream_list_errors_total", "Failed blocking list queries"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref UPSTREAM_FETCH_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("upstream_fetch_errors_total", "Failed single record lookups"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref CHECKPOINT_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("checkpoint_write_failures_total", "Failed watermark writes"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref CHECKPOINT_READ_FAILURES: IntCounterVec = IntCounterVec::new(
        Opts::new("checkpoint_read_failures_total", "Failed checkpoint reads at the start of a term"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref WATERMARK: IntGaugeVec = IntGaugeVec::new(
        Opts::new("watermark", "Highest change index processed"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref LEADER: IntGaugeVec = IntGaugeVec::new(
        Opts::new("leader", "1 while this instance holds the watcher lock"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

/// Registers every firehose collector with `registry`. Collectors that are
/// already present are skipped, so repeated calls are harmless.
pub fn register_custom_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(SINK_PUBLISHED.clone()),
        Box::new(SINK_DROPPED.clone()),
        Box::new(SINK_BATCH_SIZE.clone()),
        Box::new(UPSTREAM_LIST_ERRORS.clone()),
        Box::new(UPSTREAM_FETCH_ERRORS.clone()),
        Box::new(CHECKPOINT_FAILURES.clone()),
        Box::new(CHECKPOINT_READ_FAILURES.clone()),
        Box::new(WATERMARK.clone()),
        Box::new(LEADER.clone()),
    ];

    for collector in collectors {
        match registry.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => error!("collector can not be registered: {}", e),
        }
    }
}

/// Serves `/metrics` until `shutdown` is cancelled.
pub async fn start_server(
    addr: SocketAddr,
    shutdown: CancellationToken,
) {
    register_custom_metrics(&REGISTRY);

    let metrics_route = warp::path!("metrics").and_then(metrics_handler);

    match warp::serve(metrics_route).try_bind_with_graceful_shutdown(addr, async move {
        shutdown.cancelled().await;
    }) {
        Ok((bound, server)) => {
            info!("metrics endpoint listening on {}", bound);
            server.await;
        }
        Err(e) => error!("failed to bind metrics endpoint on {}: {}", addr, e),
    }
}

/// Text exposition of the firehose registry
pub fn gather_text() -> String {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&REGISTRY.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_else(|e| {
        error!("custom metrics could not be from_utf8'd: {}", e);
        String::default()
    })
}

async fn metrics_handler() -> Result<impl Reply, Rejection> {
    Ok(gather_text())
}
