use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use clap::Subcommand;
use clap::ValueEnum;
use firehose::build_sink;
use firehose::metrics;
use firehose::CheckpointStore;
use firehose::ConsulCoordinator;
use firehose::CoordinationBackend;
use firehose::Error;
use firehose::FirehoseConfig;
use firehose::FirehoseKind;
use firehose::InProcessLockService;
use firehose::LockService;
use firehose::Manager;
use firehose::NomadClient;
use firehose::Result;
use firehose::SinkBuilder;
use firehose::SledCheckpointStore;
use tokio::signal::unix::signal;
use tokio::signal::unix::SignalKind;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::Layer;

#[derive(Parser, Debug)]
#[command(name = "nomad-firehose", version, about = "Stream Nomad changes to a sink")]
struct Cli {
    /// Default log filter when RUST_LOG is unset
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[arg(long, global = true, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Extra configuration file merged over CONFIG_PATH and the defaults
    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug, Clone, Copy)]
enum Command {
    /// Firehose allocation task events
    Allocations,
    /// Firehose full node records
    Nodes,
    /// Firehose node list stubs
    Nodeliststubs,
    /// Firehose full evaluation records
    Evaluations,
    /// Firehose full job records
    Jobs,
    /// Firehose job list stubs
    Jobliststubs,
    /// Firehose full deployment records
    Deployments,
}

impl Command {
    fn kind(self) -> FirehoseKind {
        match self {
            Command::Allocations => FirehoseKind::Allocations,
            Command::Nodes => FirehoseKind::Nodes,
            Command::Nodeliststubs => FirehoseKind::NodeListStubs,
            Command::Evaluations => FirehoseKind::Evaluations,
            Command::Jobs => FirehoseKind::Jobs,
            Command::Jobliststubs => FirehoseKind::JobListStubs,
            Command::Deployments => FirehoseKind::Deployments,
        }
    }
}

#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_observability(&cli.log_level, cli.log_format);

    match run(cli).await {
        Ok(()) => {
            info!("Exiting program.");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("firehose stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let mut config = FirehoseConfig::new()?;
    if let Some(path) = &cli.config {
        config = config.with_override_config(path)?;
    }
    let config = config.validate()?;
    let kind = cli.command.kind();
    info!(%kind, "starting with {:?}", config);

    let shutdown = CancellationToken::new();
    tokio::spawn(graceful_shutdown(shutdown.clone()));

    if config.monitoring.prometheus_enabled {
        tokio::spawn(metrics::start_server(config.monitoring.metrics_addr(), shutdown.clone()));
    } else {
        metrics::register_custom_metrics(&metrics::REGISTRY);
    }

    let api = Arc::new(NomadClient::new(config.upstream.clone())?);
    let (store, locks) = coordination(&config)?;

    let sink_config = config.sink.clone();
    let sink_builder: SinkBuilder = Arc::new(move || build_sink(&sink_config));
    // fail on a bad sink before competing for the lock
    sink_builder()?;

    let manager = Manager::new(kind, config, api, store, locks, sink_builder, shutdown.clone());
    let result = manager.start().await;
    shutdown.cancel();
    result
}

fn coordination(config: &FirehoseConfig) -> Result<(Arc<dyn CheckpointStore>, Arc<dyn LockService>)> {
    match config.coordination.backend {
        CoordinationBackend::Consul => {
            let consul = Arc::new(ConsulCoordinator::new(&config.coordination)?);
            let store: Arc<dyn CheckpointStore> = consul.clone();
            let locks: Arc<dyn LockService> = consul;
            Ok((store, locks))
        }
        CoordinationBackend::Local => {
            let store: Arc<dyn CheckpointStore> =
                Arc::new(SledCheckpointStore::open(&config.coordination.local.db_path)?);
            let locks: Arc<dyn LockService> = Arc::new(InProcessLockService::new());
            Ok((store, locks))
        }
    }
}

async fn graceful_shutdown(shutdown: CancellationToken) {
    if let Err(e) = wait_for_signal().await {
        error!("Failed to listen for shutdown signals: {}", e);
        return;
    }
    info!("Shutting down..");
    shutdown.cancel();
}

async fn wait_for_signal() -> Result<()> {
    let mut sigint = signal(SignalKind::interrupt()).map_err(|e| Error::Fatal(e.to_string()))?;
    let mut sigterm = signal(SignalKind::terminate()).map_err(|e| Error::Fatal(e.to_string()))?;
    tokio::select! {
        _ = sigint.recv() => {
            info!("SIGINT detected.");
        },
        _ = sigterm.recv() => {
            info!("SIGTERM detected.");
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C detected.");
        },
    }
    Ok(())
}

fn init_observability(
    log_level: &str,
    format: LogFormat,
) {
    let filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let layer = match format {
        LogFormat::Text => tracing_subscriber::fmt::layer().with_filter(filter()).boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_filter(filter()).boxed(),
    };
    tracing_subscriber::registry().with(layer).init();
}
