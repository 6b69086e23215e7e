//! Handler functions for every `/admin/*` route. Each mutation of the
//! route/attachment config persists `data_dir/routes.json` immediately
//! (`GordonConfig::persist_routes_snapshot`) so a restart sees it without
//! `gordon.toml` having changed.

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{
    admin::AdminState,
    config::{AttachmentConfig, RouteConfig},
    control::PruneResult,
    engine::LogOptions,
    error::{GordonError, GordonResult},
    events::{AdminCommand, ConfigChanged, OrchestratorEvent},
};

use super::sse;

#[derive(Serialize)]
pub struct StatusResponse {
    routes: usize,
    attachments: usize,
    proxy_port: u16,
    registry_port: u16,
    auth_enabled: bool,
    containers: HashMap<String, String>,
}

pub async fn status(State(state): State<Arc<AdminState>>) -> Response {
    let config = state.config.read().await;
    let statuses = state.orchestrator.statuses().await;
    Json(StatusResponse {
        routes: config.routes.len(),
        attachments: config.attachments.len(),
        proxy_port: config.server.port,
        registry_port: config.server.registry_port,
        auth_enabled: config.auth.enabled,
        containers: statuses.into_iter().map(|(domain, state)| (domain, state.to_string())).collect(),
    })
    .into_response()
}

#[derive(Serialize)]
pub struct RouteHealth {
    domain: String,
    healthy: bool,
    addr: String,
}

pub async fn health(State(state): State<Arc<AdminState>>) -> Response {
    let snapshot = state.routes.snapshot().await;
    let health: Vec<RouteHealth> = snapshot
        .iter()
        .map(|(domain, target)| RouteHealth {
            domain: domain.clone(),
            healthy: target.healthy,
            addr: target.addr.to_string(),
        })
        .collect();
    Json(health).into_response()
}

pub async fn list_routes(State(state): State<Arc<AdminState>>) -> Response {
    Json(state.config.read().await.routes.clone()).into_response()
}

pub async fn create_route(State(state): State<Arc<AdminState>>, Json(route): Json<RouteConfig>) -> Response {
    {
        let mut config = state.config.write().await;
        if config.route_for(&route.domain).is_some() {
            return GordonError::Conflict(format!("route already exists: {}", route.domain)).into_response();
        }
        config.routes.push(route.clone());
        if let Err(e) = config.validate() {
            config.routes.retain(|r| r.domain != route.domain);
            return e.into_response();
        }
        if let Err(e) = config.persist_routes_snapshot() {
            return e.into_response();
        }
    }
    state.orchestrator.clone().enqueue_deploy(route.domain.clone());
    (StatusCode::CREATED, Json(route)).into_response()
}

pub async fn get_route(State(state): State<Arc<AdminState>>, Path(domain): Path<String>, Query(query): Query<HashMap<String, String>>) -> Response {
    let config = state.config.read().await;
    let Some(route) = config.route_for(&domain).cloned() else {
        return GordonError::RouteNotFound(domain).into_response();
    };
    if query.get("detailed").map(String::as_str) == Some("true") {
        let statuses = state.orchestrator.statuses().await;
        let target = state.routes.lookup(&domain).await;
        return Json(json!({
            "route": route,
            "deploy_state": statuses.get(&domain).map(|s| s.to_string()),
            "target": target.map(|t| t.addr.to_string()),
            "attachments": config.attachments_for(&domain),
        }))
        .into_response();
    }
    Json(route).into_response()
}

pub async fn put_route(State(state): State<Arc<AdminState>>, Path(domain): Path<String>, Json(mut route): Json<RouteConfig>) -> Response {
    route.domain = domain.clone();
    {
        let mut config = state.config.write().await;
        if config.route_for(&domain).is_none() {
            return GordonError::RouteNotFound(domain).into_response();
        }
        config.routes.retain(|r| r.domain != domain);
        config.routes.push(route.clone());
        if let Err(e) = config.validate() {
            return e.into_response();
        }
        if let Err(e) = config.persist_routes_snapshot() {
            return e.into_response();
        }
    }
    state.orchestrator.clone().enqueue_deploy(domain);
    Json(route).into_response()
}

pub async fn delete_route(State(state): State<Arc<AdminState>>, Path(domain): Path<String>) -> Response {
    {
        let mut config = state.config.write().await;
        let before = config.routes.len();
        config.routes.retain(|r| r.domain != domain);
        if config.routes.len() == before {
            return GordonError::RouteNotFound(domain).into_response();
        }
        if let Err(e) = config.persist_routes_snapshot() {
            return e.into_response();
        }
    }
    state.routes.remove(&domain).await;
    let _ = state.events.send(OrchestratorEvent::Config(ConfigChanged::Reloaded)).await;
    StatusCode::NO_CONTENT.into_response()
}

pub async fn route_attachments(State(state): State<Arc<AdminState>>, Path(domain): Path<String>) -> Response {
    let config = state.config.read().await;
    let attachments: Vec<AttachmentConfig> = config.attachments_for(&domain).into_iter().cloned().collect();
    Json(attachments).into_response()
}

#[derive(Serialize)]
pub struct NetworkInfo {
    name: String,
}

pub async fn networks(State(state): State<Arc<AdminState>>) -> Response {
    let config = state.config.read().await;
    let mut names: Vec<String> = config.routes.iter().filter_map(|r| r.network.clone()).collect();
    names.extend(config.attachments.iter().map(|a| a.network.clone()));
    if config.network_isolation.enabled {
        for route in &config.routes {
            if route.network.is_none() {
                names.push(format!("{}-{}", config.network_isolation.prefix, sanitize(&route.domain)));
            }
        }
    }
    names.sort();
    names.dedup();
    Json(names.into_iter().map(|name| NetworkInfo { name }).collect::<Vec<_>>()).into_response()
}

fn sanitize(domain: &str) -> String {
    domain.chars().map(|c| if c.is_ascii_alphanumeric() { c } else { '-' }).collect()
}

pub async fn list_attachments(State(state): State<Arc<AdminState>>) -> Response {
    Json(state.config.read().await.attachments.clone()).into_response()
}

pub async fn create_attachment(State(state): State<Arc<AdminState>>, Json(attachment): Json<AttachmentConfig>) -> Response {
    {
        let mut config = state.config.write().await;
        config.attachments.push(attachment.clone());
        if let Err(e) = config.validate() {
            config.attachments.retain(|a| !(a.target == attachment.target && a.image == attachment.image));
            return e.into_response();
        }
        if let Err(e) = config.persist_routes_snapshot() {
            return e.into_response();
        }
    }
    state.orchestrator.clone().enqueue_deploy(attachment.target.clone());
    (StatusCode::CREATED, Json(attachment)).into_response()
}

pub async fn attachments_for_target(State(state): State<Arc<AdminState>>, Path(target): Path<String>) -> Response {
    let config = state.config.read().await;
    Json(config.attachments_for(&target).into_iter().cloned().collect::<Vec<_>>()).into_response()
}

pub async fn delete_attachment(State(state): State<Arc<AdminState>>, Path((target, image)): Path<(String, String)>) -> Response {
    let mut config = state.config.write().await;
    let before = config.attachments.len();
    config.attachments.retain(|a| !(a.target == target && a.image == image));
    if config.attachments.len() == before {
        return GordonError::NotFound(format!("attachment {image} on {target}")).into_response();
    }
    match config.persist_routes_snapshot() {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn get_secrets(State(state): State<Arc<AdminState>>, Path(domain): Path<String>) -> Response {
    match state.secrets.get(&domain, None).await {
        Ok(values) => Json(values).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn set_secrets(State(state): State<Arc<AdminState>>, Path(domain): Path<String>, Json(values): Json<HashMap<String, String>>) -> Response {
    match state.secrets.set(&domain, None, values).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn delete_secret(State(state): State<Arc<AdminState>>, Path((domain, key)): Path<(String, String)>) -> Response {
    match state.secrets.delete(&domain, None, Some(&key)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn set_attachment_secrets(State(state): State<Arc<AdminState>>, Path((domain, svc)): Path<(String, String)>, Json(values): Json<HashMap<String, String>>) -> Response {
    match state.secrets.set(&domain, Some(&svc), values).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn delete_attachment_secrets(State(state): State<Arc<AdminState>>, Path((domain, svc)): Path<(String, String)>) -> Response {
    match state.secrets.delete(&domain, Some(&svc), None).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn delete_attachment_secret(State(state): State<Arc<AdminState>>, Path((domain, svc, key)): Path<(String, String, String)>) -> Response {
    match state.secrets.delete(&domain, Some(&svc), Some(&key)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn reload(State(state): State<Arc<AdminState>>) -> Response {
    let data_dir = state.config.read().await.server.data_dir.clone();
    let path = std::path::Path::new(&data_dir).join("gordon.toml");
    let path = path.exists().then_some(path);
    match crate::config::GordonConfig::load(path.as_deref()) {
        Ok(new_config) => {
            *state.config.write().await = new_config;
            let _ = state.events.send(OrchestratorEvent::Config(ConfigChanged::Reloaded)).await;
            StatusCode::NO_CONTENT.into_response()
        }
        Err(e) => e.into_response(),
    }
}

pub async fn deploy(State(state): State<Arc<AdminState>>, Path(domain): Path<String>) -> Response {
    let _ = state.events.send(OrchestratorEvent::Admin(AdminCommand::DeployNow { domain: domain.clone() })).await;
    state.orchestrator.clone().enqueue_deploy(domain);
    StatusCode::ACCEPTED.into_response()
}

#[derive(Deserialize)]
pub struct RestartQuery {
    #[serde(default)]
    attachments: bool,
}

pub async fn restart(State(state): State<Arc<AdminState>>, Path(domain): Path<String>, Query(query): Query<RestartQuery>) -> Response {
    match state.orchestrator.restart(&domain, query.attachments).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Serialize)]
pub struct TagsResponse {
    name: String,
    tags: Vec<String>,
}

pub async fn tags(State(state): State<Arc<AdminState>>, Path(repo): Path<String>) -> Response {
    match state.store.list_tags(&repo).await {
        Ok(tags) => Json(TagsResponse { name: repo, tags }).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Deserialize)]
pub struct LogsQuery {
    lines: Option<u32>,
    #[serde(default)]
    follow: bool,
}

pub async fn logs(State(state): State<Arc<AdminState>>, Query(query): Query<LogsQuery>) -> Response {
    if query.follow {
        return sse::follow_process_logs(state.log_path.clone()).into_response();
    }
    let lines = crate::log::tail_lines(&state.log_path, query.lines).await;
    Json(lines).into_response()
}

pub async fn container_logs(State(state): State<Arc<AdminState>>, Path(domain): Path<String>, Query(query): Query<LogsQuery>) -> Response {
    let Ok(containers) = state.engine.list().await else {
        return GordonError::RouteNotFound(domain).into_response();
    };
    let Some(container) = containers.into_iter().find(|c| c.domain == domain) else {
        return GordonError::RouteNotFound(domain).into_response();
    };
    match state
        .engine
        .logs(
            &container.id,
            LogOptions {
                tail: query.lines,
                follow: query.follow,
            },
        )
        .await
    {
        Ok(lines) => Json(lines).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn list_backups(State(state): State<Arc<AdminState>>, Path(domain): Path<String>) -> Response {
    match state.backups.list(&domain).await {
        Ok(jobs) => Json(jobs).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn list_all_backups(State(state): State<Arc<AdminState>>) -> Response {
    let domains: Vec<String> = state.config.read().await.routes.iter().map(|r| r.domain.clone()).collect();
    let mut all = Vec::new();
    for domain in domains {
        if let Ok(jobs) = state.backups.list(&domain).await {
            all.extend(jobs);
        }
    }
    Json(all).into_response()
}

async fn run_backup_for_domain(state: &AdminState, domain: &str) -> GordonResult<crate::backup::BackupJob> {
    let config = state.config.read().await;
    let attachment = config
        .attachments_for(domain)
        .into_iter()
        .find(|a| crate::backup::DbKind::detect(&a.image).is_some())
        .cloned()
        .ok_or_else(|| GordonError::NotFound(format!("no database attachment for {domain}")))?;
    drop(config);

    let containers = state.engine.list().await?;
    let container = containers
        .into_iter()
        .find(|c| c.domain == attachment.target)
        .ok_or_else(|| GordonError::RouteNotFound(attachment.target.clone()))?;

    state.backups.run(domain, &attachment, &container.id).await
}

pub async fn run_backup(State(state): State<Arc<AdminState>>, Path(domain): Path<String>) -> Response {
    match run_backup_for_domain(&state, &domain).await {
        Ok(job) => Json(job).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn run_backup_no_domain(State(state): State<Arc<AdminState>>) -> Response {
    let domains: Vec<String> = state.config.read().await.routes.iter().map(|r| r.domain.clone()).collect();
    let mut jobs = Vec::new();
    for domain in domains {
        if let Ok(job) = run_backup_for_domain(&state, &domain).await {
            jobs.push(job);
        }
    }
    Json(jobs).into_response()
}

pub async fn list_images(State(state): State<Arc<AdminState>>) -> Response {
    match state.engine.list_images().await {
        Ok(images) => Json(images).into_response(),
        Err(e) => e.into_response(),
    }
}

pub async fn prune_images(State(state): State<Arc<AdminState>>) -> Response {
    let reclaimed_bytes = match state.engine.prune_images().await {
        Ok(bytes) => bytes,
        Err(e) => return e.into_response(),
    };
    let keep = state.config.read().await.registry.retention_keep;
    let tags_removed = match state.store.prune_all_repositories(keep).await {
        Ok(removed) => removed,
        Err(e) => return e.into_response(),
    };
    Json(PruneResult { reclaimed_bytes, tags_removed }).into_response()
}

#[derive(Serialize)]
pub struct VerifyResponse {
    subject: String,
    scopes: Vec<String>,
    expires_at: Option<i64>,
}

pub async fn verify_token(State(state): State<Arc<AdminState>>, headers: HeaderMap) -> Response {
    let enabled = state.config.read().await.auth.enabled;
    if !enabled {
        return Json(VerifyResponse {
            subject: "anonymous".to_string(),
            scopes: vec![],
            expires_at: None,
        })
        .into_response();
    }
    match super::require_admin_scope(&state, &headers, "status", "read").await {
        Ok(record) => Json(VerifyResponse {
            subject: record.subject,
            scopes: record.scopes.iter().map(|s| s.to_string()).collect(),
            expires_at: record.expires_at,
        })
        .into_response(),
        Err(e) => e.into_response(),
    }
}

