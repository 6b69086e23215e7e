//! In-process control plane: calls straight into C4–C7 without going
//! through HTTP. Refuses to operate when `auth.enabled = true` — in that
//! configuration only a token-bearing [`super::remote::RemoteControlPlane`]
//! client may act, even from the same host (§9, decided).

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use serde_json::json;

use crate::{
    admin::AdminState,
    backup::{BackupJob, DbKind},
    config::{AttachmentConfig, RouteConfig},
    engine::{ImageRecord, LogOptions},
    error::{GordonError, GordonResult},
    events::{AdminCommand, ConfigChanged, OrchestratorEvent},
};

use super::{ControlPlane, PruneResult};

/// Wraps the same shared state the admin HTTP router uses.
pub struct InProcessControlPlane {
    state: Arc<AdminState>,
}

impl InProcessControlPlane {
    /// Builds an in-process control plane over `state`. Does not check
    /// `auth.enabled` itself — every method does, since the flag can change
    /// at runtime via `/admin/reload`.
    pub fn new(state: Arc<AdminState>) -> Self {
        InProcessControlPlane { state }
    }

    async fn guard(&self) -> GordonResult<()> {
        if self.state.config.read().await.auth.enabled {
            return Err(GordonError::InProcessControlPlaneRefused);
        }
        Ok(())
    }
}

#[async_trait]
impl ControlPlane for InProcessControlPlane {
    async fn status(&self) -> GordonResult<serde_json::Value> {
        self.guard().await?;
        let config = self.state.config.read().await;
        let statuses = self.state.orchestrator.statuses().await;
        Ok(json!({
            "routes": config.routes.len(),
            "attachments": config.attachments.len(),
            "proxy_port": config.server.port,
            "registry_port": config.server.registry_port,
            "auth_enabled": config.auth.enabled,
            "containers": statuses.into_iter().map(|(d, s)| (d, s.to_string())).collect::<HashMap<_, _>>(),
        }))
    }

    async fn health(&self) -> GordonResult<serde_json::Value> {
        self.guard().await?;
        let snapshot = self.state.routes.snapshot().await;
        Ok(json!(snapshot
            .iter()
            .map(|(domain, target)| json!({ "domain": domain, "healthy": target.healthy, "addr": target.addr.to_string() }))
            .collect::<Vec<_>>()))
    }

    async fn list_routes(&self) -> GordonResult<Vec<RouteConfig>> {
        self.guard().await?;
        Ok(self.state.config.read().await.routes.clone())
    }

    async fn create_route(&self, route: RouteConfig) -> GordonResult<()> {
        self.guard().await?;
        {
            let mut config = self.state.config.write().await;
            if config.route_for(&route.domain).is_some() {
                return Err(GordonError::Conflict(format!("route already exists: {}", route.domain)));
            }
            config.routes.push(route.clone());
            config.validate()?;
            config.persist_routes_snapshot()?;
        }
        self.state.orchestrator.clone().enqueue_deploy(route.domain);
        Ok(())
    }

    async fn get_route(&self, domain: &str) -> GordonResult<RouteConfig> {
        self.guard().await?;
        self.state
            .config
            .read()
            .await
            .route_for(domain)
            .cloned()
            .ok_or_else(|| GordonError::RouteNotFound(domain.to_string()))
    }

    async fn delete_route(&self, domain: &str) -> GordonResult<()> {
        self.guard().await?;
        {
            let mut config = self.state.config.write().await;
            let before = config.routes.len();
            config.routes.retain(|r| r.domain != domain);
            if config.routes.len() == before {
                return Err(GordonError::RouteNotFound(domain.to_string()));
            }
            config.persist_routes_snapshot()?;
        }
        self.state.routes.remove(domain).await;
        let _ = self.state.events.send(OrchestratorEvent::Config(ConfigChanged::Reloaded)).await;
        Ok(())
    }

    async fn list_attachments(&self) -> GordonResult<Vec<AttachmentConfig>> {
        self.guard().await?;
        Ok(self.state.config.read().await.attachments.clone())
    }

    async fn create_attachment(&self, attachment: AttachmentConfig) -> GordonResult<()> {
        self.guard().await?;
        {
            let mut config = self.state.config.write().await;
            config.attachments.push(attachment.clone());
            if let Err(e) = config.validate() {
                config.attachments.retain(|a| !(a.target == attachment.target && a.image == attachment.image));
                return Err(e);
            }
            config.persist_routes_snapshot()?;
        }
        self.state.orchestrator.clone().enqueue_deploy(attachment.target);
        Ok(())
    }

    async fn delete_attachment(&self, target: &str, image: &str) -> GordonResult<()> {
        self.guard().await?;
        let mut config = self.state.config.write().await;
        let before = config.attachments.len();
        config.attachments.retain(|a| !(a.target == target && a.image == image));
        if config.attachments.len() == before {
            return Err(GordonError::NotFound(format!("attachment {image} on {target}")));
        }
        config.persist_routes_snapshot()
    }

    async fn get_secrets(&self, domain: &str) -> GordonResult<HashMap<String, String>> {
        self.guard().await?;
        self.state.secrets.get(domain, None).await
    }

    async fn set_secrets(&self, domain: &str, values: HashMap<String, String>) -> GordonResult<()> {
        self.guard().await?;
        self.state.secrets.set(domain, None, values).await
    }

    async fn delete_secret(&self, domain: &str, key: &str) -> GordonResult<()> {
        self.guard().await?;
        self.state.secrets.delete(domain, None, Some(key)).await
    }

    async fn reload(&self) -> GordonResult<()> {
        self.guard().await?;
        let data_dir = self.state.config.read().await.server.data_dir.clone();
        let path = std::path::Path::new(&data_dir).join("gordon.toml");
        let new_config = crate::config::GordonConfig::load(path.exists().then_some(path.as_path()))?;
        *self.state.config.write().await = new_config;
        let _ = self.state.events.send(OrchestratorEvent::Config(ConfigChanged::Reloaded)).await;
        Ok(())
    }

    async fn deploy(&self, domain: &str) -> GordonResult<()> {
        self.guard().await?;
        let _ = self
            .state
            .events
            .send(OrchestratorEvent::Admin(AdminCommand::DeployNow { domain: domain.to_string() }))
            .await;
        self.state.orchestrator.clone().enqueue_deploy(domain.to_string());
        Ok(())
    }

    async fn restart(&self, domain: &str, with_attachments: bool) -> GordonResult<()> {
        self.guard().await?;
        self.state.orchestrator.restart(domain, with_attachments).await
    }

    async fn tags(&self, repository: &str) -> GordonResult<Vec<String>> {
        self.guard().await?;
        self.state.store.list_tags(repository).await
    }

    async fn logs(&self, lines: Option<u32>) -> GordonResult<Vec<String>> {
        self.guard().await?;
        Ok(crate::log::tail_lines(&self.state.log_path, lines).await)
    }

    async fn container_logs(&self, domain: &str, lines: Option<u32>) -> GordonResult<Vec<String>> {
        self.guard().await?;
        let containers = self.state.engine.list().await?;
        let container = containers
            .into_iter()
            .find(|c| c.domain == domain)
            .ok_or_else(|| GordonError::RouteNotFound(domain.to_string()))?;
        self.state
            .engine
            .logs(&container.id, LogOptions { tail: lines, follow: false })
            .await
    }

    async fn list_backups(&self, domain: &str) -> GordonResult<Vec<BackupJob>> {
        self.guard().await?;
        self.state.backups.list(domain).await
    }

    async fn run_backup(&self, domain: &str) -> GordonResult<BackupJob> {
        self.guard().await?;
        let config = self.state.config.read().await;
        let attachment = config
            .attachments_for(domain)
            .into_iter()
            .find(|a| DbKind::detect(&a.image).is_some())
            .cloned()
            .ok_or_else(|| GordonError::NotFound(format!("no database attachment for {domain}")))?;
        drop(config);

        let containers = self.state.engine.list().await?;
        let container = containers
            .into_iter()
            .find(|c| c.domain == attachment.target)
            .ok_or_else(|| GordonError::RouteNotFound(attachment.target.clone()))?;

        self.state.backups.run(domain, &attachment, &container.id).await
    }

    async fn list_images(&self) -> GordonResult<Vec<ImageRecord>> {
        self.guard().await?;
        self.state.engine.list_images().await
    }

    async fn prune_images(&self) -> GordonResult<PruneResult> {
        self.guard().await?;
        let reclaimed_bytes = self.state.engine.prune_images().await?;
        let keep = self.state.config.read().await.registry.retention_keep;
        let tags_removed = self.state.store.prune_all_repositories(keep).await?;
        Ok(PruneResult { reclaimed_bytes, tags_removed })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        auth::{token_store::TokenStore, AuthService},
        backup::BackupService,
        config::GordonConfig,
        engine::fake::FakeEngine,
        orchestrator::Orchestrator,
        proxy::router::RoutingTable,
        secrets::FileSecretsBackend,
    };
    use tempfile::tempdir;
    use tokio::sync::{mpsc, RwLock};

    async fn harness(auth_enabled: bool) -> InProcessControlPlane {
        let dir = tempdir().unwrap();
        let engine = Arc::new(FakeEngine::new());
        let secrets = Arc::new(FileSecretsBackend::new(dir.path()));
        let routes = Arc::new(RoutingTable::new());
        let mut config = GordonConfig::default();
        config.server.data_dir = dir.path().to_string_lossy().into_owned();
        config.auth.enabled = auth_enabled;
        let config = Arc::new(RwLock::new(config));
        let orchestrator = Orchestrator::new(engine.clone(), secrets.clone(), routes.clone(), config.clone());
        let tokens = Arc::new(TokenStore::load(dir.path().join("tokens.json")).await.unwrap());
        let auth = Arc::new(AuthService::new("test-secret", tokens, None));
        let backups = Arc::new(BackupService::new(engine.clone(), dir.path(), "", 10));
        let (tx, _rx) = mpsc::channel(16);

        InProcessControlPlane::new(Arc::new(AdminState {
            config,
            store: Arc::new(crate::registry::store::Store::open(dir.path().join("registry")).await.unwrap()),
            auth,
            routes,
            engine,
            secrets,
            orchestrator,
            backups,
            events: tx,
            log_path: dir.path().join("gordon.log"),
        }))
    }

    #[tokio::test]
    async fn refuses_every_operation_when_auth_enabled() {
        let plane = harness(true).await;
        assert!(matches!(plane.status().await, Err(GordonError::InProcessControlPlaneRefused)));
        assert!(matches!(plane.list_routes().await, Err(GordonError::InProcessControlPlaneRefused)));
    }

    #[tokio::test]
    async fn create_then_list_route_round_trips() {
        let plane = harness(false).await;
        plane
            .create_route(RouteConfig {
                domain: "app.example.com".to_string(),
                image: "reg.example.com/app:latest".to_string(),
                network: None,
            })
            .await
            .unwrap();

        let routes = plane.list_routes().await.unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].domain, "app.example.com");
    }

    #[tokio::test]
    async fn deleting_unknown_route_is_not_found() {
        let plane = harness(false).await;
        let err = plane.delete_route("nope.example.com").await.unwrap_err();
        assert!(matches!(err, GordonError::RouteNotFound(_)));
    }
}
