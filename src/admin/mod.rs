//! Admin API (C9): the JSON control surface the CLI's remote client and any
//! other operator tooling talk to. Grounded on `registry/protocol.rs`'s
//! axum router/state/bearer-scope shape, generalized from registry scopes
//! to the four admin resource names (`routes`, `secrets`, `config`,
//! `status`) named in the scope model.

pub mod handlers;
pub mod sse;

use std::{path::PathBuf, sync::Arc};

use axum::{
    extract::State,
    http::HeaderMap,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use tokio::sync::{mpsc, RwLock};

use crate::{
    auth::{
        scope::{Scope, ScopeType},
        AuthService,
    },
    backup::BackupService,
    config::GordonConfig,
    engine::ContainerEngine,
    error::{GordonError, GordonResult},
    events::OrchestratorEvent,
    orchestrator::Orchestrator,
    proxy::router::RoutingTable,
    registry::store::Store,
    secrets::SecretsBackend,
};

/// Shared state for every `/admin/*` handler.
pub struct AdminState {
    pub config: Arc<RwLock<GordonConfig>>,
    pub store: Arc<Store>,
    pub auth: Arc<AuthService>,
    pub routes: Arc<RoutingTable>,
    pub engine: Arc<dyn ContainerEngine>,
    pub secrets: Arc<dyn SecretsBackend>,
    pub orchestrator: Arc<Orchestrator>,
    pub backups: Arc<BackupService>,
    pub events: mpsc::Sender<OrchestratorEvent>,
    pub log_path: PathBuf,
}

/// Builds the `/admin/*` router over `state`.
pub fn router(state: Arc<AdminState>) -> Router {
    Router::new()
        .route("/admin/status", get(handlers::status))
        .route("/admin/health", get(handlers::health))
        .route(
            "/admin/routes",
            get(handlers::list_routes).post(handlers::create_route),
        )
        .route(
            "/admin/routes/{domain}",
            get(handlers::get_route).put(handlers::put_route).delete(handlers::delete_route),
        )
        .route("/admin/routes/{domain}/attachments", get(handlers::route_attachments))
        .route("/admin/networks", get(handlers::networks))
        .route(
            "/admin/attachments",
            get(handlers::list_attachments).post(handlers::create_attachment),
        )
        .route("/admin/attachments/{target}", get(handlers::attachments_for_target))
        .route("/admin/attachments/{target}/{image}", axum::routing::delete(handlers::delete_attachment))
        .route(
            "/admin/secrets/{domain}",
            get(handlers::get_secrets).post(handlers::set_secrets),
        )
        .route("/admin/secrets/{domain}/{key}", axum::routing::delete(handlers::delete_secret))
        .route(
            "/admin/secrets/{domain}/attachments/{svc}",
            post(handlers::set_attachment_secrets).delete(handlers::delete_attachment_secrets),
        )
        .route(
            "/admin/secrets/{domain}/attachments/{svc}/{key}",
            axum::routing::delete(handlers::delete_attachment_secret),
        )
        .route("/admin/reload", post(handlers::reload))
        .route("/admin/deploy/{domain}", post(handlers::deploy))
        .route("/admin/restart/{domain}", post(handlers::restart))
        .route("/admin/tags/{*repo}", get(handlers::tags))
        .route("/admin/logs", get(handlers::logs))
        .route("/admin/logs/{domain}", get(handlers::container_logs))
        .route(
            "/admin/backups",
            get(handlers::list_all_backups).post(handlers::run_backup_no_domain),
        )
        .route(
            "/admin/backups/{domain}",
            get(handlers::list_backups).post(handlers::run_backup),
        )
        .route("/admin/images", get(handlers::list_images))
        .route("/admin/images/prune", post(handlers::prune_images))
        .route("/admin/auth/verify", get(handlers::verify_token))
        .layer(middleware::from_fn_with_state(state.clone(), auth_layer))
        .with_state(state)
}

async fn auth_layer(State(state): State<Arc<AdminState>>, req: axum::extract::Request, next: Next) -> Response {
    let enabled = state.config.read().await.auth.enabled;
    if !enabled {
        return next.run(req).await;
    }
    let (resource, action) = resource_for_path(req.uri().path(), req.method());
    if let Err(e) = require_admin_scope(&state, req.headers(), resource, action).await {
        return e.into_response();
    }
    next.run(req).await
}

/// Maps a request's path/method onto one of the four admin scope resources
/// (§ GLOSSARY "Scope"). Read-only `GET`s request `read`; everything else
/// requests `write`.
fn resource_for_path(path: &str, method: &axum::http::Method) -> (&'static str, &'static str) {
    let action = if method == axum::http::Method::GET { "read" } else { "write" };
    let resource = if path.starts_with("/admin/secrets") || path.starts_with("/admin/backups") {
        "secrets"
    } else if path.starts_with("/admin/reload") {
        "config"
    } else if path.starts_with("/admin/status")
        || path.starts_with("/admin/health")
        || path.starts_with("/admin/tags")
        || path.starts_with("/admin/logs")
        || path.starts_with("/admin/auth/verify")
    {
        "status"
    } else {
        "routes"
    };
    (resource, action)
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers.get("authorization")?.to_str().ok()?.strip_prefix("Bearer ")
}

/// Validates a bearer token against `admin:<resource>:<action>`, the same
/// shape `registry::protocol::require_scope` enforces for repositories.
pub async fn require_admin_scope(state: &AdminState, headers: &HeaderMap, resource: &str, action: &str) -> GordonResult<crate::auth::token_store::AuthToken> {
    let token = extract_bearer(headers).ok_or_else(|| GordonError::Unauthorized("missing bearer token".to_string()))?;
    let record = state.auth.validate(token).await?;
    let requested = Scope {
        type_: ScopeType::Admin,
        name: resource.to_string(),
        actions: vec![action.to_string()],
    };
    if crate::auth::scope::any_satisfies(&record.scopes, &requested) {
        Ok(record)
    } else {
        Err(GordonError::Forbidden(format!("missing scope admin:{resource}:{action}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_requests_map_to_read_action() {
        assert_eq!(resource_for_path("/admin/routes", &axum::http::Method::GET), ("routes", "read"));
    }

    #[test]
    fn mutating_requests_map_to_write_action() {
        assert_eq!(resource_for_path("/admin/routes", &axum::http::Method::POST), ("routes", "write"));
    }

    #[test]
    fn secrets_and_backups_share_the_secrets_resource() {
        assert_eq!(resource_for_path("/admin/secrets/app.example.com", &axum::http::Method::GET).0, "secrets");
        assert_eq!(resource_for_path("/admin/backups/app.example.com", &axum::http::Method::POST).0, "secrets");
    }

    #[test]
    fn reload_maps_to_config_resource() {
        assert_eq!(resource_for_path("/admin/reload", &axum::http::Method::POST).0, "config");
    }
}
