//! Main daemon command - loads configuration, rehydrates the supervisor,
//! and serves the HTTP router until a shutdown signal arrives.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum_server::tls_rustls::RustlsConfig;
use tracing::{info, warn};

use llamactld::config::Configuration;
use llamactld::persistence::PersistenceStore;
use llamactld::router::{self, AppState};
use llamactld::supervisor::Supervisor;

/// Run the main daemon.
pub async fn run(config_path: &str) -> Result<()> {
    info!("loading configuration from: {}", config_path);
    let config = Configuration::load(config_path)?;
    let config = Arc::new(config);

    info!("  server: {}:{}", config.server.host, config.server.port);
    info!("  data directory: {}", config.system.data_directory.display());
    info!("  local node: {}", config.nodes.local_node_id);

    let db_path = config.system.data_directory.join("instances.db");
    let persistence = Arc::new(PersistenceStore::open(&db_path)?);

    info!("rehydrating supervisor state...");
    let supervisor = Supervisor::new(config.clone(), persistence).await?;
    info!("supervisor ready with {} known instances", supervisor.list().len());

    supervisor.spawn_idle_reaper();
    supervisor.spawn_persistence_reconciler();
    info!("started idle reaper (every {}min) and persistence reconciler", config.instances.timeout_check_interval_minutes);

    let state = AppState {
        supervisor: supervisor.clone(),
        config: config.clone(),
    };
    let app = router::build_router(state);

    let bind_addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .expect("invalid bind address");

    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    let shutdown_supervisor = supervisor.clone();

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
        warn!("received shutdown signal, stopping instances...");
        shutdown_supervisor.shutdown().await;
        shutdown_handle.graceful_shutdown(Some(Duration::from_secs(10)));
    });

    if config.server.ssl.enabled {
        info!("starting HTTPS server on {} (tls enabled)", bind_addr);
        let tls_config = RustlsConfig::from_pem_file(&config.server.ssl.cert, &config.server.ssl.key)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load TLS config: {}", e))?;

        axum_server::bind_rustls(bind_addr, tls_config)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    } else {
        info!("starting HTTP server on {} (tls disabled)", bind_addr);
        axum_server::bind(bind_addr)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;
    }

    info!("daemon stopped");
    Ok(())
}
