//! RingCache CLI
//!
//! Operates a distributed cache over Redis nodes.
//!
//! # Commands
//!
//! ```text
//! ringcache --node 10.0.0.1:6379 --node 10.0.0.2:6379 run       # health checker + HTTP
//! ringcache --config cache.yaml get keyword:rust
//! ringcache --config cache.yaml set keyword:rust 1300 --ttl-seconds 600
//! ringcache --config cache.yaml delete keyword:rust
//! ringcache --config cache.yaml status
//! ```

use std::convert::Infallible;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::{Parser, Subcommand};
use http_body_util::Full;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ringcache::coordinator::PrometheusExporter;
use ringcache::{CacheConfig, DistributedCache, NodeConfig};

// =============================================================================
// CLI Arguments
// =============================================================================

/// RingCache - consistent-hash distributed cache with replication
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long, env = "RINGCACHE_CONFIG")]
    config: Option<PathBuf>,

    /// Cache node as host:port (repeatable, added to the configured nodes)
    #[arg(long = "node", env = "RINGCACHE_NODES", value_delimiter = ',')]
    nodes: Vec<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Output logs as JSON
    #[arg(long, env = "LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the health checker and serve health, node status and metrics
    Run {
        /// HTTP bind address
        #[arg(long, env = "HTTP_ADDR", default_value = "0.0.0.0:9400")]
        http_addr: String,
    },
    /// Read a key
    Get { key: String },
    /// Write a key to its replicas
    Set {
        key: String,
        value: String,
        /// Expiry on the nodes
        #[arg(long)]
        ttl_seconds: Option<u64>,
    },
    /// Delete a key from its replicas
    Delete { key: String },
    /// Print node status and metrics as JSON
    Status,
}

// =============================================================================
// Main
// =============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_logging(&args)?;

    let config = load_config(&args)?;
    info!(
        nodes = config.nodes.len(),
        replication_factor = config.replication_factor,
        strategy = %config.strategy,
        "Starting RingCache"
    );

    let cache = Arc::new(DistributedCache::with_resp_backends(config)?);
    let connected = cache.connect_all().await;
    if connected == 0 {
        warn!("No cache nodes reachable");
    }

    match args.command {
        Command::Run { http_addr } => run(cache, &http_addr).await?,
        Command::Get { key } => match cache.get(&key).await? {
            Some(value) => println!("{}", String::from_utf8_lossy(&value)),
            None => println!("(nil)"),
        },
        Command::Set {
            key,
            value,
            ttl_seconds,
        } => {
            let ttl = ttl_seconds.map(Duration::from_secs);
            if cache.set(&key, value, ttl).await? {
                println!("OK");
            } else {
                println!("PARTIAL");
            }
        }
        Command::Delete { key } => {
            if cache.delete(&key).await? {
                println!("OK");
            } else {
                println!("PARTIAL");
            }
        }
        Command::Status => {
            let status = json!({
                "metrics": cache.metrics(),
                "nodes": cache.node_status(),
            });
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}

fn load_config(args: &Args) -> anyhow::Result<CacheConfig> {
    let mut config = match &args.config {
        Some(path) => CacheConfig::from_yaml_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => CacheConfig::default(),
    };

    for addr in &args.nodes {
        let node = NodeConfig::parse(addr)?;
        if config.nodes.iter().any(|n| n.node_id() == node.node_id()) {
            continue;
        }
        config.nodes.push(node);
    }
    config.validate()?;

    if config.nodes.is_empty() {
        bail!("no cache nodes configured (use --node host:port or --config)");
    }
    Ok(config)
}

// =============================================================================
// Logging Setup
// =============================================================================

fn init_logging(args: &Args) -> anyhow::Result<()> {
    let level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        .add_directive("hyper=warn".parse()?);

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
    Ok(())
}

// =============================================================================
// HTTP Server
// =============================================================================

struct ServerState {
    cache: Arc<DistributedCache>,
    exporter: PrometheusExporter,
}

async fn run(cache: Arc<DistributedCache>, addr: &str) -> anyhow::Result<()> {
    let addr: SocketAddr = addr
        .parse()
        .with_context(|| format!("invalid HTTP address {}", addr))?;

    let health = cache.spawn_health_checker();
    let state = Arc::new(ServerState {
        cache,
        exporter: PrometheusExporter::new()?,
    });

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("HTTP server listening on {}", addr);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                break;
            }
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("HTTP accept error: {}", e);
                        continue;
                    }
                };

                let io = TokioIo::new(stream);
                let state = state.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| handle(req, state.clone()));
                    if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                        debug!(%peer, "HTTP connection error: {}", e);
                    }
                });
            }
        }
    }

    if !health.shutdown().await {
        error!("Health checker did not shut down cleanly");
    }
    info!("RingCache shutdown complete");
    Ok(())
}

async fn handle(
    req: Request<hyper::body::Incoming>,
    state: Arc<ServerState>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let response = match req.uri().path() {
        "/healthz" | "/livez" => respond(StatusCode::OK, "text/plain", "ok"),
        "/readyz" => {
            if state.cache.metrics().connected_node_count > 0 {
                respond(StatusCode::OK, "text/plain", "ok")
            } else {
                respond(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "text/plain",
                    "no connected cache nodes",
                )
            }
        }
        "/nodes" => match serde_json::to_vec(&state.cache.node_status()) {
            Ok(body) => respond(StatusCode::OK, "application/json", body),
            Err(e) => respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                e.to_string(),
            ),
        },
        "/metrics" => {
            let snapshot = state.cache.metrics();
            match state
                .exporter
                .render(&snapshot, &state.cache.node_status())
            {
                Ok(text) => respond(StatusCode::OK, "text/plain; version=0.0.4", text),
                Err(e) => respond(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "text/plain",
                    e.to_string(),
                ),
            }
        }
        _ => respond(StatusCode::NOT_FOUND, "text/plain", "not found"),
    };
    Ok(response)
}

fn respond(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
