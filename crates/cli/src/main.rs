use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use kube::{
    api::Api,
    runtime::{events::Reporter, watcher, Controller},
    CustomResourceExt,
};
use metrica_collector::CollectionRegistry;
use metrica_core::Metric;
use metrica_kubehub::{
    run_controller, Backoff, Context, EndpointsScraper, KubeEventSink, KubeStatusWriter, StoreReader,
};
use metrica_reconciler::Reconciler;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "metricactl", version, about = "Metrica Metric controller")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the Metric controller until interrupted
    Run(RunArgs),
    /// Print the Metric CustomResourceDefinition as YAML
    Crd,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Only watch Metrics in this namespace (default: all namespaces)
    #[arg(long = "ns", env = "METRICA_NAMESPACE")]
    namespace: Option<String>,
    /// Concurrent reconcile passes (0 means unbounded)
    #[arg(long, env = "METRICA_WORKERS", default_value_t = 2)]
    workers: u16,
    /// Seconds between full resyncs of cached Metrics (0 disables)
    #[arg(long = "resync-secs", env = "METRICA_RESYNC_SECS", default_value_t = 300)]
    resync_secs: u64,
    /// Milliseconds between scrapes of a single Metric
    #[arg(long = "scrape-interval-ms", env = "METRICA_SCRAPE_INTERVAL_MS", default_value_t = 1000)]
    scrape_interval_ms: u64,
    /// First retry delay after a failed reconcile
    #[arg(long = "retry-base-ms", env = "METRICA_RETRY_BASE_MS", default_value_t = 5)]
    retry_base_ms: u64,
    /// Upper bound for the retry delay
    #[arg(long = "retry-max-secs", env = "METRICA_RETRY_MAX_SECS", default_value_t = 1000)]
    retry_max_secs: u64,
    /// Controller name reported on Events
    #[arg(long, env = "METRICA_REPORTER", default_value = "metrica-controller")]
    reporter: String,
    /// Instance reported on Events (usually the pod name)
    #[arg(long, env = "POD_NAME")]
    instance: Option<String>,
}

fn init_tracing() {
    let env = std::env::var("METRICA_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("METRICA_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            warn!(addr = %addr, "invalid METRICA_METRICS_ADDR; expected host:port");
        }
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let client = metrica_kubehub::get_kube_client().await?;
    let api: Api<Metric> = match args.namespace.as_deref() {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let controller = Controller::new(api.clone(), watcher::Config::default());

    let collector = Arc::new(CollectionRegistry::new(
        Arc::new(EndpointsScraper::new(client.clone())),
        Duration::from_millis(args.scrape_interval_ms),
    ));
    let reporter = Reporter { controller: args.reporter.clone(), instance: args.instance.clone() };
    let reconciler = Arc::new(Reconciler::new(
        Arc::new(StoreReader::new(controller.store())),
        Arc::new(KubeStatusWriter::new(client.clone())),
        collector,
        Arc::new(KubeEventSink::new(client.clone(), reporter)),
    ));
    let backoff = Backoff {
        base: Duration::from_millis(args.retry_base_ms),
        max: Duration::from_secs(args.retry_max_secs),
    };
    let ctx = Arc::new(Context::new(reconciler, backoff, Duration::from_secs(args.resync_secs)));

    info!(ns = ?args.namespace, workers = args.workers, "starting metric controller");
    run_controller(controller, api, ctx, args.workers).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => {
            init_metrics();
            if let Err(e) = run(args).await {
                error!(error = ?e, "controller failed");
                return Err(e);
            }
        }
        Commands::Crd => println!("{}", serde_yaml::to_string(&Metric::crd())?),
    }
    Ok(())
}
