//! SVM Operator
//!
//! Watches `StorageVirtualMachine` objects and reconciles each one against
//! its remote storage cluster's management API.

use clap::Parser;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use kube::CustomResourceExt;
use svm_operator::adapters::{KubeAuditSink, KubeDesiredState, KubeSecrets, RestConnector};
use svm_operator::controller::{runtime, AuditPolicy, TeardownPolicy};
use svm_operator::remote::{PollPolicy, RemoteSettings};
use svm_operator::{
    Error, Metrics, Ports, Reconciler, ReconcilerConfig, Result, StorageVirtualMachine,
    TokioSleeper,
};

// =============================================================================
// CLI Arguments
// =============================================================================

/// SVM Operator - declarative storage virtual machines on remote storage clusters
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Namespace to watch (all namespaces when unset)
    #[arg(long, env = "WATCH_NAMESPACE")]
    namespace: Option<String>,

    /// Health server bind address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: String,

    /// Metrics server bind address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    /// Requeue interval after a converged pass, in seconds
    #[arg(long, env = "RESYNC_INTERVAL", default_value = "300")]
    resync_interval_secs: u64,

    /// Requeue interval after a transient failure, in seconds
    #[arg(long, env = "RETRY_INTERVAL", default_value = "30")]
    retry_interval_secs: u64,

    /// Requeue interval while a feature waits on the remote side, in seconds
    #[arg(long, env = "PENDING_INTERVAL", default_value = "15")]
    pending_interval_secs: u64,

    /// Initial delay between remote job polls, in milliseconds
    #[arg(long, env = "JOB_POLL_INTERVAL_MS", default_value = "1000")]
    job_poll_interval_ms: u64,

    /// Maximum number of polls per remote job
    #[arg(long, env = "JOB_MAX_POLLS", default_value = "300")]
    job_max_polls: u32,

    /// Attempts per teardown step
    #[arg(long, env = "TEARDOWN_ATTEMPTS", default_value = "5")]
    teardown_attempts: u32,

    /// Sleep between teardown attempts, in seconds
    #[arg(long, env = "TEARDOWN_INTERVAL", default_value = "2")]
    teardown_interval_secs: u64,

    /// Records kept per condition type in append mode
    #[arg(long, env = "CONDITION_HISTORY", default_value = "10")]
    condition_history: usize,

    /// IPspace used for cluster-scoped interfaces
    #[arg(long, env = "IPSPACE", default_value = "Default")]
    ipspace: String,

    /// Remote API request timeout, in seconds
    #[arg(long, env = "REQUEST_TIMEOUT", default_value = "60")]
    request_timeout_secs: u64,

    /// Skip TLS certificate verification for management hosts
    #[arg(long, env = "ACCEPT_INVALID_CERTS")]
    accept_invalid_certs: bool,

    /// Print the CustomResourceDefinition as YAML and exit
    #[arg(long)]
    print_crd: bool,
}

impl Args {
    fn reconciler_config(&self) -> ReconcilerConfig {
        let defaults = ReconcilerConfig::default();
        ReconcilerConfig {
            resync_interval: Duration::from_secs(self.resync_interval_secs),
            retry_interval: Duration::from_secs(self.retry_interval_secs),
            pending_interval: Duration::from_secs(self.pending_interval_secs),
            poll: PollPolicy {
                initial_interval: Duration::from_millis(self.job_poll_interval_ms),
                max_polls: self.job_max_polls,
                ..PollPolicy::default()
            },
            teardown: TeardownPolicy {
                attempts: self.teardown_attempts,
                interval: Duration::from_secs(self.teardown_interval_secs),
            },
            audit: AuditPolicy {
                max_history: self.condition_history,
                ..defaults.audit
            },
            remote: RemoteSettings {
                ipspace: self.ipspace.clone(),
                ..defaults.remote
            },
        }
    }
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_crd {
        let crd = serde_yaml::to_string(&StorageVirtualMachine::crd())
            .map_err(|e| Error::Internal(format!("Failed to render CRD: {}", e)))?;
        print!("{}", crd);
        return Ok(());
    }

    // Initialize logging
    init_logging(&args);

    let config = args.reconciler_config();
    info!("Starting SVM Operator");
    info!("  Version: {}", svm_operator::VERSION);
    info!("  Namespace: {}", args.namespace.as_deref().unwrap_or("<all>"));
    info!("  Resync interval: {:?}", config.resync_interval);
    info!("  Teardown: {} attempts every {:?}", config.teardown.attempts, config.teardown.interval);
    if args.accept_invalid_certs {
        warn!("TLS certificate verification disabled for management hosts");
    }

    let metrics = Arc::new(Metrics::new()?);
    metrics.register(prometheus::default_registry())?;

    // Start health server
    let health_addr = args.health_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_health_server(&health_addr).await {
            error!("Health server error: {}", e);
        }
    });

    // Start metrics server
    let metrics_addr = args.metrics_addr.clone();
    tokio::spawn(async move {
        if let Err(e) = run_metrics_server(&metrics_addr).await {
            error!("Metrics server error: {}", e);
        }
    });

    let client = kube::Client::try_default().await?;
    let secrets = Arc::new(KubeSecrets::new(client.clone()));
    let ports = Ports {
        source: Arc::new(KubeDesiredState::new(client.clone())),
        credentials: secrets.clone(),
        connector: Arc::new(RestConnector {
            timeout: Duration::from_secs(args.request_timeout_secs),
            accept_invalid_certs: args.accept_invalid_certs,
            ..RestConnector::default()
        }),
        audit: Arc::new(KubeAuditSink::new(client.clone())),
        secrets,
        sleeper: Arc::new(TokioSleeper),
    };
    let reconciler = Reconciler::new(ports, metrics, config);

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        signal.cancel();
    });

    runtime::run(client, args.namespace.clone(), reconciler, shutdown).await;

    info!("Operator shutdown complete");
    Ok(())
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let mut filter = EnvFilter::from_default_env().add_directive(level.into());
    for directive in ["hyper=warn", "kube=info", "reqwest=warn", "rustls=warn"] {
        if let Ok(d) = directive.parse() {
            filter = filter.add_directive(d);
        }
    }

    if args.log_json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

// =============================================================================
// Health Server
// =============================================================================

fn text_response(status: hyper::StatusCode, body: impl Into<hyper::Body>) -> hyper::Response<hyper::Body> {
    let mut response = hyper::Response::new(body.into());
    *response.status_mut() = status;
    response
}

async fn run_health_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/healthz" | "/livez" | "/readyz" => text_response(StatusCode::OK, "ok"),
                _ => text_response(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Internal(format!("Invalid health server address: {}", e))
    })?;

    info!("Health server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Health server error: {}", e)))?;

    Ok(())
}

// =============================================================================
// Metrics Server
// =============================================================================

async fn run_metrics_server(addr: &str) -> Result<()> {
    use hyper::service::{make_service_fn, service_fn};
    use hyper::{Body, Request, Server, StatusCode};
    use prometheus::{Encoder, TextEncoder};

    let make_svc = make_service_fn(|_conn| async {
        Ok::<_, std::convert::Infallible>(service_fn(|req: Request<Body>| async move {
            let response = match req.uri().path() {
                "/metrics" => {
                    let encoder = TextEncoder::new();
                    let metric_families = prometheus::gather();
                    let mut buffer = Vec::new();
                    match encoder.encode(&metric_families, &mut buffer) {
                        Ok(()) => {
                            let mut response = text_response(StatusCode::OK, buffer);
                            if let Ok(value) = encoder.format_type().parse() {
                                response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
                            }
                            response
                        }
                        Err(e) => text_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
                    }
                }
                _ => text_response(StatusCode::NOT_FOUND, "not found"),
            };
            Ok::<_, std::convert::Infallible>(response)
        }))
    });

    let addr: SocketAddr = addr.parse().map_err(|e| {
        Error::Internal(format!("Invalid metrics server address: {}", e))
    })?;

    info!("Metrics server listening on {}", addr);
    Server::bind(&addr)
        .serve(make_svc)
        .await
        .map_err(|e| Error::Internal(format!("Metrics server error: {}", e)))?;

    Ok(())
}
