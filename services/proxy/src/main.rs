//! gridgate proxy daemon.
//!
//! Wires the registry, gates, structured log, and HTTP surface
//! together, announces itself to the registry, and keeps background
//! workers (config watcher, registry pruner, self-heartbeat) running
//! until shutdown.

use std::sync::Arc;

use anyhow::Result;
use gridgate_proxy::{
    api, config,
    dispatch::{ClusterBackend, ProxyNode},
    dynconfig::{ConfigHandle, ConfigWatcher, FileConfigSource},
    local::MemoryBackend,
    state::AppState,
    AccessChecker, ProxyAnnouncement, ProxyRegistry, RequestQueueLimiter, RoleAclStore,
    StructuredLogger,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting gridgate proxy");
    info!(listen_addr = %config.listen_addr, proxy_address = %config.proxy_address, "Configuration loaded");

    let dynamic = ConfigHandle::default();
    let registry = Arc::new(ProxyRegistry::new(dynamic.clone()));
    let acl = Arc::new(RoleAclStore::new());
    let logger = Arc::new(StructuredLogger::new(dynamic.clone()));
    let limiter = Arc::new(RequestQueueLimiter::new(dynamic.clone()));
    let access = Arc::new(AccessChecker::new(Arc::clone(&acl), dynamic.clone()));

    // The cluster itself sits behind the backend seam; the in-memory
    // backend stands in until a real cluster connection is configured.
    let backend: Arc<dyn ClusterBackend> = Arc::new(MemoryBackend::new());

    let mut announcement = ProxyAnnouncement::standard(
        &config.proxy_address,
        config.monitoring_address.as_deref(),
    );
    if let Some(role) = &config.proxy_role {
        announcement = announcement.with_role(role.clone());
    }
    registry.register(announcement).await;

    let node = Arc::new(ProxyNode::new(
        &config.proxy_address,
        Arc::clone(&registry),
        access,
        Arc::clone(&limiter),
        Arc::clone(&logger),
        backend,
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Dynamic config watcher, when a source is configured.
    let watcher_handle = config.dynamic_config_path.as_ref().map(|path| {
        info!(path = %path.display(), "Watching dynamic config");
        let watcher = ConfigWatcher::new(
            dynamic.clone(),
            Box::new(FileConfigSource::new(path.clone())),
        );
        let shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move { watcher.run(shutdown_rx).await })
    });

    // Registry pruner.
    let pruner_handle = tokio::spawn({
        let registry = Arc::clone(&registry);
        let shutdown_rx = shutdown_rx.clone();
        async move { registry.run_pruner(shutdown_rx).await }
    });

    // Self-heartbeat keeps this proxy's record alive.
    let heartbeat_handle = tokio::spawn({
        let registry = Arc::clone(&registry);
        let dynamic = dynamic.clone();
        let address = config.proxy_address.clone();
        let mut shutdown_rx = shutdown_rx.clone();
        async move {
            loop {
                let period = dynamic.load().liveness_timeout() / 3;
                tokio::select! {
                    _ = tokio::time::sleep(period) => {
                        registry.heartbeat(&address).await;
                    }
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            info!("Heartbeat loop shutting down");
                            break;
                        }
                    }
                }
            }
        }
    });

    let state = AppState::new(registry, node, logger, limiter, acl, dynamic);
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    info!(addr = %config.listen_addr, "Listening for connections");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let mut shutdown_rx = shutdown_rx;
                loop {
                    if *shutdown_rx.borrow() {
                        break;
                    }
                    if shutdown_rx.changed().await.is_err() {
                        break;
                    }
                }
                info!("HTTP server shutting down");
            })
            .await
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
        result = server_handle => {
            match result {
                Ok(Ok(())) => info!("Server exited normally"),
                Ok(Err(e)) => error!(error = %e, "Server error"),
                Err(e) => error!(error = %e, "Server task panicked"),
            }
        }
    }

    let _ = shutdown_tx.send(true);

    info!("Waiting for workers to shut down...");
    let shutdown_timeout = std::time::Duration::from_secs(10);

    if let Some(handle) = watcher_handle {
        if let Err(e) = tokio::time::timeout(shutdown_timeout, handle).await {
            warn!(error = %e, "Config watcher did not shut down in time");
        }
    }
    if let Err(e) = tokio::time::timeout(shutdown_timeout, pruner_handle).await {
        warn!(error = %e, "Registry pruner did not shut down in time");
    }
    if let Err(e) = tokio::time::timeout(shutdown_timeout, heartbeat_handle).await {
        warn!(error = %e, "Heartbeat loop did not shut down in time");
    }

    info!("Proxy shutdown complete");
    Ok(())
}
