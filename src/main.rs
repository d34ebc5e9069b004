mod backend;
mod config;
mod context;
mod error;
mod metrics;
mod parser;
mod protocol;
mod query;
mod session;
mod tls;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::{TcpListener, TcpSocket};
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use config::Config;
use context::ServerContext;
use metrics::metrics;
use session::Session;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = load_or_default_config();
    let listener = bind(&config).await?;

    if let Some(metrics_addr) = config.server.metrics_addr.clone() {
        tokio::spawn(async move {
            if let Err(e) = metrics::start_metrics_server(&metrics_addr).await {
                error!(error = %e, "Metrics server failed");
            }
        });
    }

    let ctx = Arc::new(ServerContext::from_config(config)?);
    info!(
        addr = %listener.local_addr()?,
        tls = ctx.tls_enabled(),
        auth_method = ctx.config.auth.default_method.plugin_name(),
        integrations = ctx.config.integrations.len(),
        "MindsDB MySQL proxy listening"
    );

    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(v) => v,
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
                continue;
            }
        };

        let session_id = ctx.next_connection_id();
        let ctx = ctx.clone();
        metrics().record_connection_accepted();
        info!(session_id = session_id, peer = %peer_addr, "New connection");

        tokio::spawn(async move {
            let session = Session::new(ctx, session_id);
            if let Err(e) = session.run(stream).await {
                warn!(session_id = session_id, error = %e, "Session ended with error");
            } else {
                info!(session_id = session_id, "Session ended");
            }
            metrics().record_connection_closed();
        });
    }
}

/// Bind the listener; `debug` mode sets SO_REUSEADDR for quick restarts
async fn bind(config: &Config) -> anyhow::Result<TcpListener> {
    let addr: SocketAddr = tokio::net::lookup_host(config.server.addr())
        .await?
        .next()
        .ok_or_else(|| anyhow::anyhow!("no address for {}", config.server.addr()))?;

    if !config.debug {
        return Ok(TcpListener::bind(addr).await?);
    }

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(1024)?)
}

fn load_or_default_config() -> Config {
    let config_paths = ["config/proxy.toml", "proxy.toml"];

    for path in config_paths {
        match config::load_config(path) {
            Ok(config) => {
                info!(path = path, "Loaded configuration");
                return config;
            }
            Err(e) => {
                warn!(path = path, error = %e, "Failed to load config");
            }
        }
    }

    info!("Using default configuration");
    Config::default()
}
