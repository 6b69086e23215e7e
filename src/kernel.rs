//! The kernel: owns every collaborator (C1–C8 plus the in-process C10) and
//! runs the registry+admin listener, the reverse-proxy listener, and the
//! orchestrator's event loop as sibling supervised tasks, racing `SIGTERM`
//! and `SIGUSR1` for shutdown and config reload.

use std::{net::SocketAddr, sync::Arc};

use tokio::{
    net::TcpListener,
    sync::{mpsc, RwLock},
};
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use crate::{
    admin::{self, AdminState},
    auth::{token_store::TokenStore, AuthService},
    backup::BackupService,
    config::GordonConfig,
    control::inprocess::InProcessControlPlane,
    engine::{docker::DockerEngine, ContainerEngine},
    error::GordonResult,
    events::OrchestratorEvent,
    log,
    orchestrator::Orchestrator,
    proxy::{self, router::RoutingTable},
    registry::{self, rate_limit::RateLimiter, store::Store, RegistryState},
    secrets::{FileSecretsBackend, SecretsBackend},
};

const EVENT_CHANNEL_CAPACITY: usize = 256;
const DOCKER_BASE_URL: &str = "http://localhost:2375";
const RECONCILE_TICK: std::time::Duration = std::time::Duration::from_secs(30);

/// Owns every long-lived collaborator and the three listener tasks.
pub struct Kernel {
    config: Arc<RwLock<GordonConfig>>,
    registry_addr: SocketAddr,
    proxy_addr: SocketAddr,
    registry_router: axum::Router,
    proxy_router: axum::Router,
    orchestrator: Arc<Orchestrator>,
    events_rx: mpsc::Receiver<OrchestratorEvent>,
    events_tx: mpsc::Sender<OrchestratorEvent>,
    store: Arc<Store>,
    _log_guard: WorkerGuard,
    pub control: Arc<InProcessControlPlane>,
}

impl Kernel {
    /// Builds a kernel from a loaded configuration, wiring C1–C8 and the
    /// in-process C10 over it.
    pub async fn build(config: GordonConfig) -> GordonResult<Self> {
        let data_dir = std::path::PathBuf::from(&config.server.data_dir);
        tokio::fs::create_dir_all(&data_dir).await?;

        let (non_blocking, log_guard) = log::init_file_appender(&data_dir);
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::try_from_env("GORDON_LOG").unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
            .with_writer(non_blocking)
            .try_init()
            .ok();

        let store = Arc::new(Store::open(data_dir.join("registry")).await?);
        let tokens = Arc::new(TokenStore::load(data_dir.join("tokens.json")).await?);
        let auth = Arc::new(AuthService::new(
            config.registry_auth.token_secret.clone(),
            tokens,
            config.registry_auth.password_hash.clone(),
        ));
        let secrets: Arc<dyn SecretsBackend> = Arc::new(FileSecretsBackend::new(&data_dir));
        let engine: Arc<dyn ContainerEngine> = Arc::new(DockerEngine::new(DOCKER_BASE_URL));
        let routes = Arc::new(RoutingTable::new());
        let backups = Arc::new(BackupService::new(
            engine.clone(),
            &data_dir,
            &config.backups.dir,
            config.backups.keep,
        ));

        let registry_addr: SocketAddr = format!("0.0.0.0:{}", config.server.registry_port).parse().map_err(|e| crate::error::GordonError::custom(e))?;
        let proxy_addr: SocketAddr = format!("0.0.0.0:{}", config.server.port).parse().map_err(|e| crate::error::GordonError::custom(e))?;

        let (events_tx, events_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let config = Arc::new(RwLock::new(config));

        let orchestrator = Orchestrator::new(engine.clone(), secrets.clone(), routes.clone(), config.clone());

        let registry_state = Arc::new(RegistryState {
            store: store.clone(),
            rate_limiter: RateLimiter::new(config.read().await.rate_limit),
            auth: auth.clone(),
            trusted_proxies: config.read().await.trusted_proxies.clone(),
            events: events_tx.clone(),
        });

        let admin_state = Arc::new(AdminState {
            config: config.clone(),
            store: store.clone(),
            auth: auth.clone(),
            routes: routes.clone(),
            engine: engine.clone(),
            secrets: secrets.clone(),
            orchestrator: orchestrator.clone(),
            backups,
            events: events_tx.clone(),
            log_path: log::rotating::log_file_path(&data_dir),
        });

        let control = Arc::new(InProcessControlPlane::new(admin_state.clone()));

        let registry_router = registry::router(registry_state).merge(admin::router(admin_state));
        let proxy_state = proxy::ProxyState::new(routes, config.read().await.trusted_proxies.clone());
        let proxy_router = axum::Router::new().fallback(proxy::handle).with_state(proxy_state);

        Ok(Kernel {
            config,
            registry_addr,
            proxy_addr,
            registry_router,
            proxy_router,
            orchestrator,
            events_rx,
            events_tx,
            store,
            _log_guard: log_guard,
            control,
        })
    }

    /// Runs the registry+admin listener, the proxy listener, and the
    /// orchestrator's event loop until `SIGTERM` or `SIGUSR1` (reload).
    /// Returns once a graceful shutdown completes.
    pub async fn run(self) -> GordonResult<()> {
        let Kernel {
            config,
            registry_addr,
            proxy_addr,
            registry_router,
            proxy_router,
            orchestrator,
            mut events_rx,
            events_tx,
            store,
            _log_guard,
            control: _,
        } = self;

        let registry_listener = TcpListener::bind(registry_addr).await?;
        let proxy_listener = TcpListener::bind(proxy_addr).await?;
        info!(%registry_addr, %proxy_addr, "gordon listening");

        let registry_task = tokio::spawn(
            axum::serve(registry_listener, registry_router.into_make_service_with_connect_info::<SocketAddr>()).into_future(),
        );
        let proxy_task = tokio::spawn(
            axum::serve(proxy_listener, proxy_router.into_make_service_with_connect_info::<SocketAddr>()).into_future(),
        );

        let orchestrator_for_run = orchestrator.clone();
        let orchestrator_task = tokio::spawn(async move { orchestrator_for_run.run(events_rx).await });

        let tick_tx = events_tx.clone();
        let tick_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(RECONCILE_TICK);
            loop {
                interval.tick().await;
                if tick_tx.send(OrchestratorEvent::Tick).await.is_err() {
                    break;
                }
            }
        });

        let gc_store = store.clone();
        let gc_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(600));
            loop {
                interval.tick().await;
                if let Err(e) = gc_store.gc_idle_uploads().await {
                    warn!(error = %e, "upload gc failed");
                }
            }
        });

        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        let mut sigusr1 = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::user_defined1())?;

        loop {
            tokio::select! {
                _ = sigterm.recv() => {
                    info!("SIGTERM received, shutting down");
                    break;
                }
                _ = sigusr1.recv() => {
                    info!("SIGUSR1 received, reloading config");
                    let data_dir = config.read().await.server.data_dir.clone();
                    let path = std::path::Path::new(&data_dir).join("gordon.toml");
                    if path.exists() {
                        match GordonConfig::load(Some(&path)) {
                            Ok(reloaded) => {
                                *config.write().await = reloaded;
                                let _ = events_tx.send(OrchestratorEvent::Config(crate::events::ConfigChanged::Reloaded)).await;
                            }
                            Err(e) => warn!(error = %e, "reload failed"),
                        }
                    }
                }
                result = &mut registry_task => {
                    warn!(?result, "registry listener exited");
                    break;
                }
                result = &mut proxy_task => {
                    warn!(?result, "proxy listener exited");
                    break;
                }
            }
        }

        registry_task.abort();
        proxy_task.abort();
        orchestrator_task.abort();
        tick_task.abort();
        gc_task.abort();
        Ok(())
    }
}
