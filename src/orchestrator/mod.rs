//! Deploy orchestrator (C7): the event-driven reconciler that turns a
//! registry push, a config change, or an admin command into container
//! lifecycle operations against C6, with an atomic route swap into C8's
//! routing table. Grounded on
//! `mbr-container-registry-rs/src/container_orchestrator.rs`'s
//! `RegistryHooks::on_manifest_uploaded` -> `synchronize_container_state`
//! flow and `monocore/lib/orchestration/orchestrator.rs`'s worker
//! bookkeeping style.

pub mod state_machine;

use std::{
    collections::HashMap,
    net::{IpAddr, Ipv4Addr, SocketAddr},
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{info, warn};

use crate::{
    config::GordonConfig,
    engine::{ContainerEngine, ContainerStatus, CreateSpec, PullAuth, DEFAULT_CONTAINER_PORT},
    error::GordonResult,
    events::{AdminCommand, ConfigChanged, OrchestratorEvent},
    proxy::{
        health::wait_until_healthy,
        router::{RouteTarget, RoutingTable},
    },
    secrets::SecretsBackend,
};

pub use state_machine::DeployState;

/// Default readiness timeout before a newly started container is swapped in
/// regardless of health (spec §4.7).
pub const DEFAULT_READINESS_TIMEOUT: Duration = Duration::from_secs(30);
/// Default graceful-stop grace period before SIGKILL.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(10);

const HEALTH_PROBE_PATH: &str = "/";
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);
const HEALTH_PROBE_INTERVAL: Duration = Duration::from_millis(500);

#[derive(Default)]
struct DomainSlot {
    generation: AtomicU64,
    running: AtomicBool,
}

/// Owns the container engine, secrets backend, routing table, and live
/// config, and drives per-domain deploys from the orchestrator event queue.
pub struct Orchestrator {
    engine: Arc<dyn ContainerEngine>,
    secrets: Arc<dyn SecretsBackend>,
    routes: Arc<RoutingTable>,
    config: Arc<RwLock<GordonConfig>>,
    readiness_timeout: Duration,
    stop_grace: Duration,
    slots: Mutex<HashMap<String, Arc<DomainSlot>>>,
    status: RwLock<HashMap<String, DeployState>>,
}

impl Orchestrator {
    /// Builds an orchestrator over the given collaborators.
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        secrets: Arc<dyn SecretsBackend>,
        routes: Arc<RoutingTable>,
        config: Arc<RwLock<GordonConfig>>,
    ) -> Arc<Self> {
        Arc::new(Orchestrator {
            engine,
            secrets,
            routes,
            config,
            readiness_timeout: DEFAULT_READINESS_TIMEOUT,
            stop_grace: DEFAULT_STOP_GRACE,
            slots: Mutex::new(HashMap::new()),
            status: RwLock::new(HashMap::new()),
        })
    }

    /// Current deploy state per domain, for the admin `/status` endpoint.
    pub async fn statuses(&self) -> HashMap<String, DeployState> {
        self.status.read().await.clone()
    }

    /// Drains `events` until the channel closes, dispatching each to the
    /// right reconciliation action. Intended to run as its own task for the
    /// lifetime of the kernel.
    pub async fn run(self: Arc<Self>, mut events: mpsc::Receiver<OrchestratorEvent>) {
        while let Some(event) = events.recv().await {
            match event {
                OrchestratorEvent::Push(push) => {
                    let routes = self.config.read().await.routes.clone();
                    for route in routes {
                        if state_machine::route_matches_push(&route.image, &push.name, &push.tag) {
                            self.clone().enqueue_deploy(route.domain);
                        }
                    }
                }
                OrchestratorEvent::Config(ConfigChanged::Route(domain)) => {
                    self.clone().enqueue_deploy(domain);
                }
                OrchestratorEvent::Config(ConfigChanged::Reloaded) => {
                    self.clone().reconcile().await;
                }
                OrchestratorEvent::Admin(AdminCommand::DeployNow { domain }) => {
                    self.clone().enqueue_deploy(domain);
                }
                OrchestratorEvent::Admin(AdminCommand::Restart { domain, with_attachments }) => {
                    let orchestrator = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = orchestrator.restart(&domain, with_attachments).await {
                            warn!(domain, error = %e, "restart failed");
                        }
                    });
                }
                OrchestratorEvent::Tick => {
                    self.clone().reprobe_health().await;
                }
            }
        }
    }

    /// Reconciles config against reality (reload, §4.7): starts routes with
    /// no running container, removes containers for deleted routes. Never
    /// restarts an already-running container.
    pub async fn reconcile(self: Arc<Self>) {
        let config = self.config.read().await.clone();
        let running = match self.engine.list().await {
            Ok(containers) => containers,
            Err(e) => {
                warn!(error = %e, "reconcile: failed to list containers");
                return;
            }
        };

        let route_domains: std::collections::HashSet<_> =
            config.routes.iter().map(|r| r.domain.clone()).collect();

        for route in &config.routes {
            let has_running = running
                .iter()
                .any(|c| c.domain == route.domain && c.status == ContainerStatus::Running);
            if !has_running {
                self.clone().enqueue_deploy(route.domain.clone());
            }
        }

        for container in &running {
            if !route_domains.contains(&container.domain) {
                info!(domain = %container.domain, "reconcile: removing container for deleted route");
                let _ = self.engine.stop(&container.id, self.stop_grace.as_secs() as u32).await;
                let _ = self.engine.remove(&container.id).await;
                self.routes.remove(&container.domain).await;
            }
        }
    }

    async fn reprobe_health(self: Arc<Self>) {
        let snapshot = self.routes.snapshot().await;
        for (domain, target) in snapshot.iter() {
            let result = wait_until_healthy(
                target.addr,
                HEALTH_PROBE_PATH,
                HEALTH_PROBE_TIMEOUT,
                HEALTH_PROBE_INTERVAL,
                Duration::ZERO,
            )
            .await;
            self.routes.set_healthy(domain, result.healthy).await;
        }
    }

    /// Enqueues a deploy for `domain`, coalescing with any deploy already in
    /// flight for that domain (single-flight, latest wins — §4.7).
    pub fn enqueue_deploy(self: Arc<Self>, domain: String) {
        tokio::spawn(async move {
            let slot = {
                let mut slots = self.slots.lock().await;
                slots.entry(domain.clone()).or_insert_with(|| Arc::new(DomainSlot::default())).clone()
            };
            slot.generation.fetch_add(1, Ordering::SeqCst);

            if slot.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
                return;
            }

            loop {
                let generation_before = slot.generation.load(Ordering::SeqCst);
                if let Err(e) = self.deploy(&domain).await {
                    warn!(domain = %domain, error = %e, "deploy failed");
                    self.status.write().await.insert(domain.clone(), DeployState::Failed(e.to_string()));
                }
                let generation_after = slot.generation.load(Ordering::SeqCst);
                if generation_after == generation_before {
                    slot.running.store(false, Ordering::SeqCst);
                    break;
                }
            }
        });
    }

    /// Runs the full deploy state machine for `domain`: pull, create, start,
    /// wait for health, swap the route, then retire the previous container.
    async fn deploy(&self, domain: &str) -> GordonResult<()> {
        let config = self.config.read().await.clone();
        let Some(route) = config.route_for(domain).cloned() else {
            return Ok(());
        };

        self.set_status(domain, DeployState::Pulling).await;
        self.engine.pull(&route.image, &PullAuth::default()).await?;

        let network = if config.network_isolation.enabled {
            Some(route.network.clone().unwrap_or_else(|| format!("{}-{}", config.network_isolation.prefix, sanitize(domain))))
        } else {
            route.network.clone()
        };
        if let Some(network) = &network {
            self.engine.ensure_network(network).await?;
        }

        for attachment in config.attachments_for(domain) {
            self.deploy_attachment(attachment, &network).await?;
        }

        let env = self.secrets.get(domain, None).await?;
        self.set_status(domain, DeployState::Creating).await;
        let new_id = self
            .engine
            .create(&CreateSpec {
                domain: domain.to_string(),
                image: route.image.clone(),
                env,
                network: network.clone(),
                labels: HashMap::new(),
                ports: HashMap::new(),
                restart_policy: "unless-stopped".to_string(),
            })
            .await?;

        self.set_status(domain, DeployState::Starting).await;
        self.engine.start(&new_id).await?;

        let addr = self.container_address(&new_id).await;
        let probe = wait_until_healthy(
            addr,
            HEALTH_PROBE_PATH,
            HEALTH_PROBE_TIMEOUT,
            HEALTH_PROBE_INTERVAL,
            self.readiness_timeout,
        )
        .await;

        self.set_status(domain, DeployState::Swapping).await;
        self.routes
            .set(
                domain,
                RouteTarget {
                    addr,
                    healthy: probe.healthy,
                },
            )
            .await;

        self.retire_previous_containers(domain, &new_id).await;

        self.set_status(domain, DeployState::Done).await;
        Ok(())
    }

    async fn deploy_attachment(
        &self,
        attachment: &crate::config::AttachmentConfig,
        network: &Option<String>,
    ) -> GordonResult<()> {
        let network = network.clone().unwrap_or_else(|| attachment.network.clone());
        self.engine.ensure_network(&network).await?;
        self.engine.pull(&attachment.image, &PullAuth::default()).await?;

        let env = self.secrets.get(&attachment.target, Some(&attachment.image)).await?;
        let id = self
            .engine
            .create(&CreateSpec {
                domain: attachment.target.clone(),
                image: attachment.image.clone(),
                env,
                network: Some(network),
                labels: HashMap::from([("gordon.attachment".to_string(), attachment.image.clone())]),
                ports: HashMap::new(),
                restart_policy: "unless-stopped".to_string(),
            })
            .await?;
        self.engine.start(&id).await
    }

    /// Stops and removes every container labelled for `domain` other than
    /// `keep_id`. Discovery goes through the engine's label listing rather
    /// than local bookkeeping so it survives a restart.
    async fn retire_previous_containers(&self, domain: &str, keep_id: &str) {
        let Ok(containers) = self.engine.list().await else {
            return;
        };
        for container in containers {
            if container.domain == domain && container.id != keep_id {
                let _ = self.engine.stop(&container.id, self.stop_grace.as_secs() as u32).await;
                let _ = self.engine.remove(&container.id).await;
            }
        }
    }

    async fn container_address(&self, id: &str) -> SocketAddr {
        let fallback = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), DEFAULT_CONTAINER_PORT);
        match self.engine.inspect(id).await {
            Ok(record) => record
                .ip
                .map(|ip| SocketAddr::new(ip, DEFAULT_CONTAINER_PORT))
                .unwrap_or(fallback),
            Err(_) => fallback,
        }
    }

    async fn set_status(&self, domain: &str, state: DeployState) {
        self.status.write().await.insert(domain.to_string(), state);
    }

    /// Restarts the container(s) for `domain` in place (no pull, no image
    /// change): stop then start. When `with_attachments` is set, attachments
    /// are recreated first, on the route's network.
    pub async fn restart(&self, domain: &str, with_attachments: bool) -> GordonResult<()> {
        let config = self.config.read().await.clone();

        if with_attachments {
            let network = config.route_for(domain).and_then(|r| r.network.clone());
            for attachment in config.attachments_for(domain) {
                self.deploy_attachment(attachment, &network).await?;
            }
        }

        let containers = self.engine.list().await?;
        for container in containers {
            if container.domain == domain {
                self.engine.stop(&container.id, self.stop_grace.as_secs() as u32).await?;
                self.engine.start(&container.id).await?;
            }
        }
        Ok(())
    }
}

fn sanitize(domain: &str) -> String {
    domain.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '-' }).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::RouteConfig, engine::fake::FakeEngine, secrets::FileSecretsBackend};
    use tempfile::tempdir;

    async fn harness(routes: Vec<RouteConfig>) -> (Arc<Orchestrator>, Arc<FakeEngine>) {
        let engine = Arc::new(FakeEngine::new());
        let dir = tempdir().unwrap();
        let secrets = Arc::new(FileSecretsBackend::new(dir.path()));
        let table = Arc::new(RoutingTable::new());
        let mut config = GordonConfig::default();
        config.routes = routes;
        let orchestrator = Orchestrator::new(engine.clone(), secrets, table, Arc::new(RwLock::new(config)));
        (orchestrator, engine)
    }

    #[tokio::test]
    async fn deploy_creates_and_starts_a_container() {
        let (orchestrator, engine) = harness(vec![RouteConfig {
            domain: "app.example.com".to_string(),
            image: "app:latest".to_string(),
            network: None,
        }])
        .await;

        orchestrator.deploy("app.example.com").await.unwrap();

        let containers = engine.snapshot();
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].status, ContainerStatus::Running);
        assert_eq!(containers[0].domain, "app.example.com");
    }

    #[tokio::test]
    async fn deploy_for_unknown_domain_is_a_no_op() {
        let (orchestrator, engine) = harness(vec![]).await;
        orchestrator.deploy("nope.example.com").await.unwrap();
        assert!(engine.snapshot().is_empty());
    }

    #[tokio::test]
    async fn redeploy_retires_the_previous_container() {
        let (orchestrator, engine) = harness(vec![RouteConfig {
            domain: "app.example.com".to_string(),
            image: "app:latest".to_string(),
            network: None,
        }])
        .await;

        orchestrator.deploy("app.example.com").await.unwrap();
        orchestrator.deploy("app.example.com").await.unwrap();

        let containers = engine.snapshot();
        assert_eq!(containers.iter().filter(|c| c.status == ContainerStatus::Running).count(), 1);
    }

    #[tokio::test]
    async fn reconcile_removes_containers_for_deleted_routes() {
        let (orchestrator, engine) = harness(vec![RouteConfig {
            domain: "app.example.com".to_string(),
            image: "app:latest".to_string(),
            network: None,
        }])
        .await;
        orchestrator.deploy("app.example.com").await.unwrap();

        orchestrator.config.write().await.routes.clear();
        orchestrator.clone().reconcile().await;

        assert!(engine.snapshot().is_empty());
    }

    #[test]
    fn sanitize_replaces_non_alphanumeric() {
        assert_eq!(sanitize("app.example.com"), "app-example-com");
    }
}
