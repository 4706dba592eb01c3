//! Daemon Wiring
//!
//! Builds one [`AdmissionManager`], seeds it from configuration and serves the
//! proxy, REST, JSON-RPC and metrics listeners until shutdown. Every listener
//! and the metrics exporter observe the same shutdown channel.

use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::api::{self, handlers::AppState};
use crate::config::Config;
use crate::metrics::MetricsExporter;
use crate::metrics_server;
use crate::proxy::{self, ProxyState};
use crate::rate_limit::AdmissionManager;
use crate::rpc;

/// A started daemon
pub struct DaemonHandle {
    /// Shared admission manager
    pub manager: AdmissionManager,
    pub proxy_addr: SocketAddr,
    pub rest_addr: SocketAddr,
    pub rpc_addr: SocketAddr,
    /// Absent when metrics are disabled
    pub metrics_addr: Option<SocketAddr>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<(&'static str, JoinHandle<Result<()>>)>,
}

impl DaemonHandle {
    /// Ask every listener and the exporter to stop
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Wait for every task to finish
    ///
    /// # Errors
    ///
    /// Returns the first server error encountered.
    pub async fn wait(self) -> Result<()> {
        let mut first_error = None;
        for (name, task) in self.tasks {
            let outcome = match task.await {
                Ok(result) => result,
                Err(e) => Err(anyhow::anyhow!("{} task panicked: {}", name, e)),
            };
            if let Err(e) = outcome {
                error!("{} stopped with error: {:#}", name, e);
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Bind every listener and spawn the servers
///
/// Ports of 0 bind ephemeral ports; the chosen addresses are reported on the
/// returned handle.
///
/// # Errors
///
/// Returns an error if a listener cannot be bound or the proxy cannot be
/// configured.
pub async fn start(config: &Config) -> Result<DaemonHandle> {
    let manager = AdmissionManager::new();
    for client in &config.clients {
        manager.set_config(client.clone());
    }
    if !config.clients.is_empty() {
        info!("Seeded {} client configurations", config.clients.len());
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks = Vec::new();

    let proxy_state = ProxyState::new(manager.clone(), &config.proxy)?;
    let (proxy_listener, proxy_addr) = bind("proxy", config.proxy.port).await?;
    info!(
        "Proxy listening on {} (upstream {})",
        proxy_addr,
        proxy_state.upstream()
    );
    tasks.push((
        "proxy",
        serve(
            "proxy",
            proxy_listener,
            proxy::router(proxy_state),
            shutdown_rx.clone(),
        ),
    ));

    let (rest_listener, rest_addr) = bind("REST", config.control.rest_port).await?;
    info!("REST control plane listening on {}", rest_addr);
    tasks.push((
        "rest",
        serve(
            "REST",
            rest_listener,
            api::create_router(AppState::new(manager.clone())),
            shutdown_rx.clone(),
        ),
    ));

    let (rpc_listener, rpc_addr) = bind("RPC", config.control.rpc_port).await?;
    info!("JSON-RPC control plane listening on {}", rpc_addr);
    tasks.push((
        "rpc",
        serve(
            "RPC",
            rpc_listener,
            rpc::router(manager.clone()),
            shutdown_rx.clone(),
        ),
    ));

    let metrics_addr = if config.metrics.enabled {
        let (metrics_listener, metrics_addr) = bind("metrics", config.metrics.port).await?;
        let rx = shutdown_rx.clone();
        tasks.push((
            "metrics",
            tokio::spawn(metrics_server::start_metrics_server(
                metrics_listener,
                wait_for_shutdown(rx),
            )),
        ));

        let exporter = MetricsExporter::new(
            manager.clone(),
            Duration::from_secs(config.metrics.export_interval_secs),
        );
        let rx = shutdown_rx.clone();
        tasks.push((
            "exporter",
            tokio::spawn(async move {
                exporter.run(rx).await;
                Ok(())
            }),
        ));
        Some(metrics_addr)
    } else {
        info!("Metrics disabled");
        None
    };

    Ok(DaemonHandle {
        manager,
        proxy_addr,
        rest_addr,
        rpc_addr,
        metrics_addr,
        shutdown: shutdown_tx,
        tasks,
    })
}

/// Run the daemon until Ctrl-C or SIGTERM
///
/// # Errors
///
/// Returns an error if the configuration is invalid, a listener cannot be
/// bound or a server fails.
pub async fn run(config: Config) -> Result<()> {
    config.validate()?;

    let handle = start(&config).await?;
    info!("quotagate v{} ready", env!("CARGO_PKG_VERSION"));

    shutdown_signal().await;
    info!("Shutdown signal received, draining connections");

    handle.shutdown();
    handle.wait().await?;

    info!("quotagate stopped");
    Ok(())
}

async fn bind(name: &str, port: u16) -> Result<(TcpListener, SocketAddr)> {
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {} listener on {}", name, addr))?;
    let local = listener
        .local_addr()
        .with_context(|| format!("Failed to read {} listener address", name))?;
    Ok((listener, local))
}

fn serve(
    name: &'static str,
    listener: TcpListener,
    router: Router,
    shutdown: watch::Receiver<bool>,
) -> JoinHandle<Result<()>> {
    tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(wait_for_shutdown(shutdown))
            .await
            .with_context(|| format!("{} server error", name))
    })
}

fn wait_for_shutdown(mut rx: watch::Receiver<bool>) -> impl Future<Output = ()> + Send + 'static {
    async move {
        let _ = rx.wait_for(|stop| *stop).await;
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::ClientConfig;

    fn ephemeral_config() -> Config {
        let mut config = Config::default();
        config.proxy.port = 0;
        config.control.rest_port = 0;
        config.control.rpc_port = 0;
        config.metrics.port = 0;
        config
    }

    #[tokio::test]
    async fn test_start_seeds_clients_and_stops() {
        let mut config = ephemeral_config();
        config.clients = vec![ClientConfig::new("demo-client", Some(60), Some(1000))];

        let handle = start(&config).await.unwrap();
        assert_eq!(
            handle.manager.get_config("demo-client"),
            Some(ClientConfig::new("demo-client", Some(60), Some(1000)))
        );
        assert!(handle.metrics_addr.is_some());
        assert_ne!(handle.proxy_addr.port(), 0);

        handle.shutdown();
        tokio::time::timeout(Duration::from_secs(5), handle.wait())
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_metrics_disabled() {
        let mut config = ephemeral_config();
        config.metrics.enabled = false;

        let handle = start(&config).await.unwrap();
        assert!(handle.metrics_addr.is_none());

        handle.shutdown();
        handle.wait().await.unwrap();
    }

    #[tokio::test]
    async fn test_run_rejects_invalid_config() {
        let mut config = Config::default();
        config.logging.level = "loud".to_string();
        assert!(run(config).await.is_err());
    }
}
