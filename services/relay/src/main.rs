//! vhost-relay
//!
//! Host-routed TCP reverse proxy.
//!
//! This service:
//! - Accepts TCP connections on one listener
//! - Reads each connection's header region and its `Host: ` line
//! - Relays the connection to the downstream configured for that host
//! - Reloads routes when the routes file changes

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vhost_relay::proxy::{Listener, ListenerConfig, RoutingTable, SessionRegistry};
use vhost_relay::reload::{load_initial, run_reload_loop, RouteSource};
use vhost_relay::{Config, LogFormat, RoutesFile, RoutesWatcher};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to RELAY_LOG_LEVEL)
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }

    info!("Starting vhost-relay");
    info!(
        listen_addr = %config.listen_addr,
        routes_file = %config.routes_file.display(),
        max_header_bytes = config.max_header_bytes,
        "Configuration loaded"
    );

    if let Some(dir) = config.routes_file.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create routes directory {}", dir.display()))?;
    }

    let routing_table = Arc::new(RoutingTable::new());
    let registry = Arc::new(SessionRegistry::new());
    let source: Arc<dyn RouteSource> = Arc::new(RoutesFile::new(&config.routes_file));

    // A broken routes file at startup is not fatal; the next edit reloads it.
    let _ = load_initial(&routing_table, source.as_ref());

    let (_watcher, signals) = RoutesWatcher::start(&config.routes_file)
        .context("Failed to watch routes file")?;
    tokio::spawn(run_reload_loop(source, Arc::clone(&routing_table), signals));

    let mut listener_config = ListenerConfig::new(config.listen_addr);
    listener_config.max_header_bytes = config.max_header_bytes;

    let listener = Listener::bind(listener_config, routing_table, Arc::clone(&registry))
        .await
        .with_context(|| format!("Failed to bind listener on {}", config.listen_addr))?;
    let listener = Arc::new(listener);

    tokio::select! {
        result = Arc::clone(&listener).run() => {
            if let Err(e) = &result {
                error!(error = %e, "Listener error");
            }
            result.context("Listener stopped")?;
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for shutdown signal")?;
            info!(active_sessions = registry.len(), "Shutdown signal received");
        }
    }

    // Returning drops the runtime, which drops every session task.
    Ok(())
}
