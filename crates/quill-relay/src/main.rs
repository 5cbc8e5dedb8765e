//! Quill Relay Server
//!
//! HTTP relay that streams upstream chat completions to clients.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};

use quill_core::config::load_config;
use quill_core::tracing_init::init_tracing;
use quill_relay::{AppState, UpstreamClient, build_router};

#[derive(Parser, Debug)]
#[command(name = "quill-relay")]
#[command(version, about = "Quill relay server - streams chat completions")]
struct Args {
    /// Path to a JSON settings file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Address to listen on.
    #[arg(long, env = "QUILL_LISTEN_ADDR")]
    addr: Option<SocketAddr>,

    /// Upstream chat completions endpoint.
    #[arg(long, env = "DEEPSEEK_API_URL")]
    upstream_url: Option<String>,

    /// Upstream API key.
    #[arg(long, env = "DEEPSEEK_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model used when a request does not name one.
    #[arg(long)]
    model: Option<String>,

    /// Upstream request timeout in seconds (no timeout by default).
    #[arg(long)]
    upstream_timeout_secs: Option<u64>,

    /// Output logs as JSON (for structured log aggregation).
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    init_tracing("quill_relay=info,tower_http=info", args.log_json);

    let mut config = load_config(args.config.as_deref())?.relay;
    if let Some(addr) = args.addr {
        config.listen_addr = addr;
    }
    if let Some(url) = args.upstream_url {
        config.upstream_url = url;
    }
    if let Some(key) = args.api_key.filter(|k| !k.is_empty()) {
        config.api_key = Some(key);
    }
    if let Some(model) = args.model {
        config.default_model = model;
    }
    if args.upstream_timeout_secs.is_some() {
        config.upstream_timeout_secs = args.upstream_timeout_secs;
    }

    info!(
        version = env!("CARGO_PKG_VERSION"),
        addr = %config.listen_addr,
        upstream = %config.upstream_url,
        "Starting quill-relay"
    );
    if config.api_key.is_none() {
        warn!("No upstream API key configured; chat requests will be rejected");
    }
    if let Some(secs) = config.upstream_timeout_secs {
        warn!(secs, "Upstream timeout enabled");
    }

    let state = AppState::new(UpstreamClient::new(&config)?);
    let shutdown = state.shutdown.clone();
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received shutdown signal"),
                Err(e) => {
                    warn!(error = %e, "Cannot listen for shutdown signal");
                    std::future::pending::<()>().await;
                }
            }
            shutdown.cancel();
        })
        .await?;

    info!("Relay stopped");
    Ok(())
}
