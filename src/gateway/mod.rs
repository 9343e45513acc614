//! Bridge daemon mode -- the always-on process that serves the gateway's
//! WebSocket connection.
//!
//! Named `gateway` for historical reasons in this codebase; don't confuse it
//! with the media gateway, which is the external caller this process talks
//! to over that WebSocket connection.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::Config;
use crate::outbound::OutboundCoordinator;
use crate::registry::SessionRegistry;
use crate::server::{build_router, AppState};

/// Daemon-level settings layered on top of [`Config`]; these govern how the
/// process itself is bound and served, not the bridge's call-handling
/// behavior.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_tls")]
    pub tls: bool,
}

fn default_tls() -> bool {
    false
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self { tls: default_tls() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayState {
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl std::fmt::Display for GatewayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GatewayState::Stopped => write!(f, "Stopped"),
            GatewayState::Starting => write!(f, "Starting"),
            GatewayState::Running => write!(f, "Running"),
            GatewayState::Stopping => write!(f, "Stopping"),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct GatewayStats {
    pub state: String,
    pub uptime_secs: u64,
    pub bind: String,
    pub port: u16,
    pub active_calls: usize,
    pub max_concurrent_calls: u32,
}

/// The bridge daemon: owns the shared registry/outbound-coordinator state
/// and serves the gateway-facing WebSocket listener until shut down.
pub struct Gateway {
    bridge_config: Arc<Config>,
    daemon_config: GatewayConfig,
    state: Arc<Mutex<GatewayState>>,
    started_at: Arc<Mutex<Option<std::time::Instant>>>,
    app_state: Arc<AppState>,
    shutdown_tx: Option<tokio::sync::broadcast::Sender<()>>,
}

impl Gateway {
    pub fn new(bridge_config: Config) -> Self {
        Self::with_daemon_config(bridge_config, GatewayConfig::default())
    }

    pub fn with_daemon_config(bridge_config: Config, daemon_config: GatewayConfig) -> Self {
        let bridge_config = Arc::new(bridge_config);
        let registry = Arc::new(SessionRegistry::new(bridge_config.max_concurrent_calls as usize));
        let outbound = Arc::new(OutboundCoordinator::new());
        let app_state = Arc::new(AppState::new(bridge_config.clone(), registry, outbound));

        Self {
            bridge_config,
            daemon_config,
            state: Arc::new(Mutex::new(GatewayState::Stopped)),
            started_at: Arc::new(Mutex::new(None)),
            app_state,
            shutdown_tx: None,
        }
    }

    pub fn app_state(&self) -> Arc<AppState> {
        self.app_state.clone()
    }

    /// Starts serving in the background and returns once the listener is
    /// bound; does not block for the lifetime of the server.
    pub async fn start(&mut self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state != GatewayState::Stopped {
            anyhow::bail!("gateway is not stopped (current state: {})", *state);
        }
        *state = GatewayState::Starting;
        drop(state);

        let addr: SocketAddr = format!("{}:{}", self.bridge_config.serve.bind, self.bridge_config.serve.port)
            .parse()
            .context("invalid bind address")?;
        info!(%addr, path = %self.bridge_config.serve.path, tls = self.daemon_config.tls, "starting bridge listener");

        let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
        self.shutdown_tx = Some(shutdown_tx.clone());
        *self.started_at.lock().await = Some(std::time::Instant::now());

        let router = build_router(self.app_state.clone());
        let tls = self.daemon_config.tls;
        let mut shutdown_rx = shutdown_tx.subscribe();

        tokio::spawn(async move {
            let result = if tls {
                serve_tls(router, addr, &mut shutdown_rx).await
            } else {
                serve_plain(router, addr, &mut shutdown_rx).await
            };
            if let Err(e) = result {
                warn!("bridge listener error: {e}");
            }
        });

        *self.state.lock().await = GatewayState::Running;
        info!("bridge daemon running");
        Ok(())
    }

    pub async fn stop(&mut self) -> Result<()> {
        let mut state = self.state.lock().await;
        if *state != GatewayState::Running {
            return Ok(());
        }
        *state = GatewayState::Stopping;
        drop(state);

        info!("stopping bridge daemon");
        if let Some(tx) = &self.shutdown_tx {
            let _ = tx.send(());
        }
        *self.state.lock().await = GatewayState::Stopped;
        info!("bridge daemon stopped");
        Ok(())
    }

    pub async fn stats(&self) -> GatewayStats {
        let state = self.state.lock().await;
        let uptime = self
            .started_at
            .lock()
            .await
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0);

        GatewayStats {
            state: format!("{}", *state),
            uptime_secs: uptime,
            bind: self.bridge_config.serve.bind.clone(),
            port: self.bridge_config.serve.port,
            active_calls: self.app_state.registry.count(),
            max_concurrent_calls: self.bridge_config.max_concurrent_calls,
        }
    }

    /// Runs until Ctrl+C, then shuts down gracefully.
    pub async fn run(&mut self) -> Result<()> {
        self.start().await?;
        info!(
            "listening for the media gateway on {}:{}{}",
            self.bridge_config.serve.bind, self.bridge_config.serve.port, self.bridge_config.serve.path
        );
        tokio::signal::ctrl_c().await?;
        info!("received shutdown signal");
        self.stop().await
    }
}

async fn serve_plain(
    router: axum::Router,
    addr: SocketAddr,
    shutdown_rx: &mut tokio::sync::broadcast::Receiver<()>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await.context("failed to bind listener")?;
    let service = router.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, service)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.recv().await;
        })
        .await
        .context("server error")
}

/// Serves over a self-signed certificate for local testing; production
/// deployments are expected to terminate TLS in front of the bridge instead.
async fn serve_tls(
    router: axum::Router,
    addr: SocketAddr,
    shutdown_rx: &mut tokio::sync::broadcast::Receiver<()>,
) -> Result<()> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()])
        .context("failed to generate self-signed certificate")?;
    let config = axum_server::tls_rustls::RustlsConfig::from_der(
        vec![cert.cert.der().to_vec()],
        cert.signing_key.serialize_der(),
    )
    .await
    .context("failed to build TLS config")?;

    let service = router.into_make_service_with_connect_info::<SocketAddr>();
    let handle = axum_server::Handle::new();
    let shutdown_handle = handle.clone();
    tokio::spawn(async move {
        let _ = shutdown_rx.recv().await;
        shutdown_handle.graceful_shutdown(Some(std::time::Duration::from_secs(5)));
    });

    axum_server::bind_rustls(addr, config)
        .handle(handle)
        .serve(service)
        .await
        .context("TLS server error")
}
