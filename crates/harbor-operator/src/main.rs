//! Harbor Kubernetes Operator
//!
//! This operator manages HarborCluster, Harbor and Harbor component custom
//! resources, deploying Harbor registries and their backends.

use anyhow::{Context, Result};
use clap::Parser;
use harbor_operator::api::{self, WebhookService};
use harbor_operator::config::{self, OperatorConfig};
use harbor_operator::controller;
use harbor_operator::webhook::{self, WebhookConfig};
use kube::Client;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::fmt::format::FmtSpan;

/// Harbor Kubernetes Operator
#[derive(Parser, Debug)]
#[command(name = "harbor-operator")]
#[command(about = "Kubernetes operator deploying and supervising Harbor container registries")]
#[command(version)]
struct Args {
    /// Metrics server address
    #[arg(long, env = "METRICS_ADDR", default_value = "0.0.0.0:8080")]
    metrics_addr: SocketAddr,

    /// Health probe address
    #[arg(long, env = "HEALTH_ADDR", default_value = "0.0.0.0:8081")]
    health_addr: SocketAddr,

    /// Webhook server address
    #[arg(long, env = "WEBHOOK_ADDR", default_value = "0.0.0.0:9443")]
    webhook_addr: SocketAddr,

    /// PEM certificate of the webhook server; webhooks are disabled when unset
    #[arg(long, env = "WEBHOOK_CERT_PATH", requires = "webhook_key_path")]
    webhook_cert_path: Option<PathBuf>,

    /// PEM private key of the webhook server
    #[arg(long, env = "WEBHOOK_KEY_PATH", requires = "webhook_cert_path")]
    webhook_key_path: Option<PathBuf>,

    /// Namespace to watch (empty for cluster-wide)
    #[arg(long, env = "WATCH_NAMESPACE", default_value = "")]
    namespace: String,

    /// Operator configuration file (YAML)
    #[arg(long, env = "CONFIG_FILE")]
    config: Option<PathBuf>,

    /// Only reconcile owners annotated with this class
    #[arg(long, env = "HARBOR_CLASS")]
    harbor_class: Option<String>,

    /// Maximum parallel reconciles per kind
    #[arg(long, env = "MAX_CONCURRENT_RECONCILES")]
    max_concurrent_reconciles: Option<u16>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: Level,

    /// Enable JSON log format
    #[arg(long, env = "LOG_JSON", default_value = "false")]
    log_json: bool,

    /// Print CRD YAML and exit
    #[arg(long)]
    print_crd: bool,

    /// Conversion webhook service as `namespace/name`, embedded by --print-crd
    #[arg(long, env = "WEBHOOK_SERVICE")]
    webhook_service: Option<String>,

    /// Port of the conversion webhook service
    #[arg(long, env = "WEBHOOK_SERVICE_PORT", default_value = "443")]
    webhook_service_port: i32,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if args.print_crd {
        print_crd(&args)?;
        return Ok(());
    }

    init_logging(&args)?;
    init_config(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        namespace = if args.namespace.is_empty() {
            "all"
        } else {
            &args.namespace
        },
        "Starting Harbor Kubernetes Operator"
    );

    let metrics_addr = args.metrics_addr;
    tokio::spawn(async move {
        if let Err(e) = start_metrics_server(metrics_addr).await {
            error!(error = %e, "Metrics server failed");
        }
    });

    let health_addr = args.health_addr;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_addr).await {
            error!(error = %e, "Health server failed");
        }
    });

    let cancel = CancellationToken::new();

    if let (Some(cert_path), Some(key_path)) =
        (args.webhook_cert_path.clone(), args.webhook_key_path.clone())
    {
        if rustls::crypto::aws_lc_rs::default_provider()
            .install_default()
            .is_err()
        {
            info!("TLS crypto provider already installed");
        }
        let webhook_config = WebhookConfig {
            addr: args.webhook_addr,
            cert_path,
            key_path,
        };
        let webhook_cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = webhook::serve(webhook_config, webhook_cancel).await {
                error!(error = %e, "Webhook server failed");
            }
        });
    } else {
        info!("Webhook certificate not configured, admission and conversion disabled");
    }

    let client = Client::try_default()
        .await
        .context("Failed to create Kubernetes client")?;

    let namespace = if args.namespace.is_empty() {
        None
    } else {
        Some(args.namespace.clone())
    };

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutdown requested");
            shutdown.cancel();
        }
    });

    controller::run_all(client, namespace, cancel)
        .await
        .context("Controller failed")?;

    Ok(())
}

/// Initialize logging subsystem
fn init_logging(args: &Args) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(args.log_level)
        .with_span_events(FmtSpan::CLOSE)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(false);

    if args.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(())
}

/// Load the configuration file and apply command line overrides
fn init_config(args: &Args) -> Result<()> {
    let mut operator_config = match &args.config {
        Some(path) => OperatorConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => OperatorConfig::default(),
    };
    if let Some(class) = &args.harbor_class {
        operator_config.harbor_class = class.clone();
    }
    if let Some(max) = args.max_concurrent_reconciles {
        operator_config.max_concurrent_reconciles = max.max(1);
    }

    info!(
        harbor_class = %operator_config.harbor_class,
        max_concurrent_reconciles = operator_config.max_concurrent_reconciles,
        "Loaded operator configuration"
    );
    config::init(operator_config);
    Ok(())
}

/// Start the Prometheus metrics server
async fn start_metrics_server(addr: SocketAddr) -> Result<()> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    info!(address = %addr, "Starting metrics server");

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;

    std::future::pending::<()>().await;

    Ok(())
}

/// Start the health probe server
async fn start_health_server(addr: SocketAddr) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    info!(address = %addr, "Starting health server");

    let listener = TcpListener::bind(addr)
        .await
        .context("Failed to bind health server")?;

    loop {
        let (mut socket, _) = listener.accept().await?;

        tokio::spawn(async move {
            let mut buf = [0; 1024];
            if socket.read(&mut buf).await.is_ok() {
                let response = "HTTP/1.1 200 OK\r\nContent-Length: 2\r\n\r\nOK";
                let _ = socket.write_all(response.as_bytes()).await;
            }
        });
    }
}

/// Print every CRD as a YAML stream for installation
fn print_crd(args: &Args) -> Result<()> {
    let service = match &args.webhook_service {
        Some(reference) => {
            let (namespace, name) = reference
                .split_once('/')
                .context("--webhook-service must be namespace/name")?;
            Some(WebhookService {
                namespace: namespace.to_string(),
                name: name.to_string(),
                port: args.webhook_service_port,
            })
        }
        None => None,
    };

    let crds = api::crds(service.as_ref())?;
    let mut documents = Vec::with_capacity(crds.len());
    for crd in &crds {
        documents.push(serde_yaml::to_string(crd)?);
    }
    println!("{}", documents.join("---\n"));

    Ok(())
}
