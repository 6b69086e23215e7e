//! Docker Registry v2 HTTP surface (C2): chunked blob uploads, manifest
//! read/write, tag listing, and token issuance, guarded by global/per-IP
//! rate limiting and bearer-scoped auth. Grounded on
//! `mbr-container-registry-rs/src/registry.rs`'s handler-per-route shape
//! and `monocore/lib/server/api.rs`'s axum router/extension-state pattern.

use std::{net::SocketAddr, sync::Arc};

use axum::{
    body::Body,
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::io::ReaderStream;

use crate::{
    auth::{
        scope::{Scope, ScopeType},
        AuthService,
    },
    error::{ErrorKind, GordonError, GordonResult},
    events::{OrchestratorEvent, RegistryPush},
    net::client_ip,
    registry::{
        digest::Digest,
        rate_limit::RateLimiter,
        store::{Manifest, Reference, Store},
    },
};

/// Shared state for every `/v2/*` handler.
pub struct RegistryState {
    pub store: Arc<Store>,
    pub rate_limiter: RateLimiter,
    pub auth: Arc<AuthService>,
    pub trusted_proxies: Vec<IpNetwork>,
    pub events: mpsc::Sender<OrchestratorEvent>,
}

/// Builds the `/v2/*` router over `state`.
pub fn router(state: Arc<RegistryState>) -> Router {
    Router::new()
        .route("/v2/", get(ping))
        .route("/v2/token", get(token))
        .route(
            "/v2/{*tail}",
            get(dispatch_get)
                .head(dispatch_head)
                .put(dispatch_put)
                .patch(dispatch_patch)
                .post(dispatch_post),
        )
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit_layer))
        .with_state(state)
}

async fn rate_limit_layer(
    State(state): State<Arc<RegistryState>>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    req: axum::extract::Request,
    next: Next,
) -> Response {
    let ip = client_ip(peer, req.headers(), &state.trusted_proxies);
    if !state.rate_limiter.allow(ip).await {
        return too_many_requests();
    }
    next.run(req).await
}

fn too_many_requests() -> Response {
    let mut resp = error_response(ErrorKind::TooManyRequests, "rate limit exceeded");
    resp.headers_mut().insert(
        "retry-after",
        crate::registry::rate_limit::RETRY_AFTER_SECS.to_string().parse().unwrap(),
    );
    resp
}

fn error_response(kind: ErrorKind, message: &str) -> Response {
    let status = match kind {
        ErrorKind::NameInvalid | ErrorKind::TagInvalid | ErrorKind::DigestInvalid | ErrorKind::BlobUploadInvalid | ErrorKind::ManifestInvalid | ErrorKind::SizeInvalid => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::UploadUnknown | ErrorKind::ManifestUnknown | ErrorKind::BlobUnknown | ErrorKind::NotFound => {
            StatusCode::NOT_FOUND
        }
        ErrorKind::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
        ErrorKind::Forbidden => StatusCode::FORBIDDEN,
        ErrorKind::Conflict => StatusCode::CONFLICT,
        ErrorKind::EngineUnavailable | ErrorKind::ImagePullFailed | ErrorKind::DeployTimeout => {
            StatusCode::SERVICE_UNAVAILABLE
        }
        ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    let body = json!({
        "errors": [{ "code": kind.code(), "message": message }]
    });
    (
        status,
        [("docker-distribution-api-version", "registry/2.0")],
        Json(body),
    )
        .into_response()
}

impl IntoResponse for GordonError {
    fn into_response(self) -> Response {
        error_response(self.kind(), &self.to_string())
    }
}

async fn ping() -> impl IntoResponse {
    (
        StatusCode::OK,
        [("docker-distribution-api-version", "registry/2.0")],
        "{}",
    )
}

#[derive(Deserialize)]
struct TokenQuery {
    scope: Option<Vec<String>>,
}

#[derive(Serialize)]
struct TokenResponse {
    token: String,
}

async fn token(
    State(state): State<Arc<RegistryState>>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Response {
    let subject = match extract_basic_auth(&headers) {
        Some((user, pass)) => match state.auth.verify_password(&pass).await {
            Ok(true) => Some(user),
            _ => None,
        },
        None => None,
    };

    let requested = query.scope.unwrap_or_default();
    match state.auth.registry_token(subject.as_deref(), &requested).await {
        Ok(jwt) => Json(TokenResponse { token: jwt }).into_response(),
        Err(e) => e.into_response(),
    }
}

fn extract_basic_auth(headers: &HeaderMap) -> Option<(String, String)> {
    let raw = headers.get("authorization")?.to_str().ok()?;
    let encoded = raw.strip_prefix("Basic ")?;
    let decoded = STANDARD.decode(encoded).ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let (user, pass) = decoded.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

fn extract_bearer(headers: &HeaderMap) -> Option<&str> {
    headers.get("authorization")?.to_str().ok()?.strip_prefix("Bearer ")
}

async fn require_scope(state: &RegistryState, headers: &HeaderMap, name: &str, action: &str) -> GordonResult<()> {
    let token = extract_bearer(headers).ok_or_else(|| GordonError::Unauthorized("missing bearer token".to_string()))?;
    let record = state.auth.validate(token).await?;
    let requested = Scope {
        type_: ScopeType::Repository,
        name: name.to_string(),
        actions: vec![action.to_string()],
    };
    if crate::auth::scope::any_satisfies(&record.scopes, &requested) {
        Ok(())
    } else {
        Err(GordonError::Forbidden(format!("missing scope repository:{name}:{action}")))
    }
}

/// `/v2/{name}/manifests/{ref}`, `/v2/{name}/blobs/{digest}`,
/// `/v2/{name}/blobs/uploads/` and `/v2/{name}/blobs/uploads/{uuid}` are all
/// under one wildcard tail so repository names may themselves contain `/`.
fn split_tail(tail: &str) -> Option<(String, &'static str, String)> {
    for marker in ["/manifests/", "/blobs/uploads/", "/blobs/"] {
        if let Some(idx) = tail.rfind(marker) {
            let name = tail[..idx].to_string();
            let rest = tail[idx + marker.len()..].to_string();
            let kind = match marker {
                "/manifests/" => "manifests",
                "/blobs/uploads/" => "uploads",
                _ => "blobs",
            };
            return Some((name, kind, rest));
        }
    }
    None
}

async fn dispatch_get(
    State(state): State<Arc<RegistryState>>,
    headers: HeaderMap,
    Path(tail): Path<String>,
) -> Response {
    if let Some(name) = tail.strip_suffix("/tags/list") {
        return list_tags(state, name.to_string()).await;
    }

    let Some((name, kind, rest)) = split_tail(&tail) else {
        return GordonError::NameInvalid(tail).into_response();
    };

    match kind {
        "manifests" => get_manifest(state, headers, name, rest).await,
        "blobs" => get_blob(state, headers, name, rest).await,
        _ => GordonError::NotFound(tail).into_response(),
    }
}

async fn dispatch_head(
    State(state): State<Arc<RegistryState>>,
    headers: HeaderMap,
    Path(tail): Path<String>,
) -> Response {
    let Some((name, kind, rest)) = split_tail(&tail) else {
        return GordonError::NameInvalid(tail).into_response();
    };
    match kind {
        "manifests" => head_manifest(state, headers, name, rest).await,
        "blobs" => head_blob(state, name, rest).await,
        _ => GordonError::NotFound(tail).into_response(),
    }
}

async fn dispatch_put(
    State(state): State<Arc<RegistryState>>,
    headers: HeaderMap,
    Path(tail): Path<String>,
    Query(query): Query<std::collections::HashMap<String, String>>,
    body: axum::body::Bytes,
) -> Response {
    let Some((name, kind, rest)) = split_tail(&tail) else {
        return GordonError::NameInvalid(tail).into_response();
    };
    match kind {
        "manifests" => put_manifest(state, headers, name, rest, body).await,
        "uploads" => finalize_upload(state, headers, name, rest, query, body).await,
        _ => GordonError::NotFound(tail).into_response(),
    }
}

async fn dispatch_patch(
    State(state): State<Arc<RegistryState>>,
    headers: HeaderMap,
    Path(tail): Path<String>,
    body: axum::body::Bytes,
) -> Response {
    let Some((name, kind, rest)) = split_tail(&tail) else {
        return GordonError::NameInvalid(tail).into_response();
    };
    if kind != "uploads" {
        return GordonError::NotFound(tail).into_response();
    }
    append_chunk(state, headers, name, rest, body).await
}

async fn dispatch_post(
    State(state): State<Arc<RegistryState>>,
    headers: HeaderMap,
    Path(tail): Path<String>,
) -> Response {
    if let Some(name) = tail.strip_suffix("/blobs/uploads/") {
        start_upload(state, headers, name.to_string()).await
    } else {
        GordonError::NotFound(tail).into_response()
    }
}

async fn get_manifest(state: Arc<RegistryState>, headers: HeaderMap, name: String, reference: String) -> Response {
    if let Err(e) = require_scope(&state, &headers, &name, "pull").await {
        return e.into_response();
    }
    let reference: Reference = match reference.parse() {
        Ok(r) => r,
        Err(e) => return GordonError::from(e).into_response(),
    };
    match state.store.get_manifest(&name, &reference).await {
        Ok((bytes, media_type)) => {
            let digest = Digest::of(&bytes);
            (
                StatusCode::OK,
                [
                    ("content-type", media_type),
                    ("docker-content-digest", digest.to_string()),
                    ("docker-distribution-api-version".to_string(), "registry/2.0".to_string()),
                ],
                bytes,
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn head_manifest(state: Arc<RegistryState>, headers: HeaderMap, name: String, reference: String) -> Response {
    if let Err(e) = require_scope(&state, &headers, &name, "pull").await {
        return e.into_response();
    }
    let reference: Reference = match reference.parse() {
        Ok(r) => r,
        Err(e) => return GordonError::from(e).into_response(),
    };
    match state.store.get_manifest(&name, &reference).await {
        Ok((bytes, media_type)) => {
            let digest = Digest::of(&bytes);
            (
                StatusCode::OK,
                [
                    ("content-type", media_type),
                    ("docker-content-digest", digest.to_string()),
                    ("content-length".to_string(), bytes.len().to_string()),
                ],
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn put_manifest(
    state: Arc<RegistryState>,
    headers: HeaderMap,
    name: String,
    reference: String,
    body: axum::body::Bytes,
) -> Response {
    if let Err(e) = require_scope(&state, &headers, &name, "push").await {
        return e.into_response();
    }
    let reference: Reference = match reference.parse() {
        Ok(r) => r,
        Err(e) => return GordonError::from(e).into_response(),
    };
    let media_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/vnd.oci.image.manifest.v1+json")
        .to_string();

    let manifest = Manifest {
        name: name.clone(),
        media_type,
        bytes: body.to_vec(),
    };

    match state.store.put_manifest(&name, &reference, manifest).await {
        Ok(digest) => {
            if let Reference::Tag(tag) = &reference {
                let _ = state
                    .events
                    .send(OrchestratorEvent::Push(RegistryPush {
                        name: name.clone(),
                        tag: tag.clone(),
                        digest: digest.clone(),
                    }))
                    .await;
            }
            (
                StatusCode::CREATED,
                [
                    ("location", format!("/v2/{name}/manifests/{digest}")),
                    ("docker-content-digest", digest.to_string()),
                ],
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn get_blob(state: Arc<RegistryState>, headers: HeaderMap, name: String, digest: String) -> Response {
    if let Err(e) = require_scope(&state, &headers, &name, "pull").await {
        return e.into_response();
    }
    let digest: Digest = match digest.parse() {
        Ok(d) => d,
        Err(e) => return GordonError::from(e).into_response(),
    };
    match state.store.get_blob_path(&digest).await {
        Ok(path) => match tokio::fs::File::open(&path).await {
            Ok(file) => {
                let stream = ReaderStream::new(file);
                (
                    StatusCode::OK,
                    [("docker-content-digest", digest.to_string())],
                    Body::from_stream(stream),
                )
                    .into_response()
            }
            Err(e) => GordonError::from(e).into_response(),
        },
        Err(e) => e.into_response(),
    }
}

async fn head_blob(state: Arc<RegistryState>, name: String, digest: String) -> Response {
    let digest: Digest = match digest.parse() {
        Ok(d) => d,
        Err(e) => return GordonError::from(e).into_response(),
    };
    let _ = name;
    match state.store.get_blob_path(&digest).await {
        Ok(path) => {
            let len = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
            (
                StatusCode::OK,
                [
                    ("docker-content-digest", digest.to_string()),
                    ("content-length".to_string(), len.to_string()),
                ],
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    }
}

async fn start_upload(state: Arc<RegistryState>, headers: HeaderMap, name: String) -> Response {
    if let Err(e) = require_scope(&state, &headers, &name, "push").await {
        return e.into_response();
    }
    match state.store.start_upload(&name).await {
        Ok(uuid) => (
            StatusCode::ACCEPTED,
            [
                ("location", format!("/v2/{name}/blobs/uploads/{uuid}")),
                ("range", "0-0".to_string()),
                ("docker-upload-uuid", uuid.to_string()),
            ],
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

async fn append_chunk(
    state: Arc<RegistryState>,
    headers: HeaderMap,
    name: String,
    uuid: String,
    body: axum::body::Bytes,
) -> Response {
    if let Err(e) = require_scope(&state, &headers, &name, "push").await {
        return e.into_response();
    }
    let uuid = match uuid::Uuid::parse_str(&uuid) {
        Ok(u) => u,
        Err(_) => return GordonError::BlobUploadInvalid(format!("bad upload uuid: {uuid}")).into_response(),
    };
    match state.store.append_chunk(uuid, &body).await {
        Ok(total) => {
            let range = if total == 0 {
                None
            } else {
                Some(format!("0-{}", total - 1))
            };
            let mut resp = (
                StatusCode::ACCEPTED,
                [("docker-upload-uuid", uuid.to_string())],
            )
                .into_response();
            if let Some(range) = range {
                resp.headers_mut().insert("range", range.parse().unwrap());
            }
            resp
        }
        Err(e) => e.into_response(),
    }
}

async fn finalize_upload(
    state: Arc<RegistryState>,
    headers: HeaderMap,
    name: String,
    uuid: String,
    query: std::collections::HashMap<String, String>,
    body: axum::body::Bytes,
) -> Response {
    if let Err(e) = require_scope(&state, &headers, &name, "push").await {
        return e.into_response();
    }
    let uuid = match uuid::Uuid::parse_str(&uuid) {
        Ok(u) => u,
        Err(_) => return GordonError::BlobUploadInvalid(format!("bad upload uuid: {uuid}")).into_response(),
    };
    let Some(digest) = query.get("digest") else {
        return GordonError::DigestMismatch {
            expected: "<missing>".to_string(),
            computed: "<none>".to_string(),
        }
        .into_response();
    };
    let digest: Digest = match digest.parse() {
        Ok(d) => d,
        Err(e) => return GordonError::from(e).into_response(),
    };

    if !body.is_empty() {
        if let Err(e) = state.store.append_chunk(uuid, &body).await {
            return e.into_response();
        }
    }

    match state.store.finish_upload(uuid, &digest).await {
        Ok(()) => (
            StatusCode::CREATED,
            [
                ("location", format!("/v2/{name}/blobs/{digest}")),
                ("docker-content-digest", digest.to_string()),
            ],
        )
            .into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Serialize)]
struct TagsListResponse {
    name: String,
    tags: Vec<String>,
}

async fn list_tags(state: Arc<RegistryState>, name: String) -> Response {
    match state.store.list_tags(&name).await {
        Ok(tags) => Json(TagsListResponse { name, tags }).into_response(),
        Err(e) => e.into_response(),
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_tail_recognizes_manifests() {
        let (name, kind, rest) = split_tail("app/sub/manifests/latest").unwrap();
        assert_eq!(name, "app/sub");
        assert_eq!(kind, "manifests");
        assert_eq!(rest, "latest");
    }

    #[test]
    fn split_tail_recognizes_blob_uploads() {
        let (name, kind, rest) = split_tail("app/blobs/uploads/abc-123").unwrap();
        assert_eq!(name, "app");
        assert_eq!(kind, "uploads");
        assert_eq!(rest, "abc-123");
    }

    #[test]
    fn split_tail_recognizes_blobs() {
        let (name, kind, rest) = split_tail("app/blobs/sha256:aa").unwrap();
        assert_eq!(name, "app");
        assert_eq!(kind, "blobs");
        assert_eq!(rest, "sha256:aa");
    }

    #[test]
    fn extract_basic_auth_decodes_header() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", "Basic YWxpY2U6c2VjcmV0".parse().unwrap());
        let (user, pass) = extract_basic_auth(&headers).unwrap();
        assert_eq!(user, "alice");
        assert_eq!(pass, "secret");
    }
}
