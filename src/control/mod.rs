//! Control plane (C10): one capability trait covering every operation the
//! CLI needs, with two implementations — [`inprocess::InProcessControlPlane`]
//! (direct calls into C4–C7, used when `auth.enabled = false`) and
//! [`remote::RemoteControlPlane`] (an HTTP client against another
//! instance's admin API). Grounded on the redesign note in §9 ("a single
//! `ControlPlane` trait... so the CLI never branches on local vs. remote").

pub mod inprocess;
pub mod remote;

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    backup::BackupJob,
    config::{AttachmentConfig, RouteConfig},
    engine::ImageRecord,
    error::GordonResult,
};

/// The combined result of an `/admin/images/prune` call: the engine's
/// runtime (dangling-image) prune plus the registry's per-repository tag
/// retention prune.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PruneResult {
    /// Bytes reclaimed by the runtime prune.
    pub reclaimed_bytes: u64,
    /// Tags removed by the registry retention prune.
    pub tags_removed: usize,
}

/// Every operation the CLI (or another admin client) can perform, whether
/// the target is this process or a remote one.
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Route/attachment counts, ports, flags, and per-domain deploy state.
    async fn status(&self) -> GordonResult<Value>;
    /// Per-route health.
    async fn health(&self) -> GordonResult<Value>;

    async fn list_routes(&self) -> GordonResult<Vec<RouteConfig>>;
    async fn create_route(&self, route: RouteConfig) -> GordonResult<()>;
    async fn get_route(&self, domain: &str) -> GordonResult<RouteConfig>;
    async fn delete_route(&self, domain: &str) -> GordonResult<()>;

    async fn list_attachments(&self) -> GordonResult<Vec<AttachmentConfig>>;
    async fn create_attachment(&self, attachment: AttachmentConfig) -> GordonResult<()>;
    async fn delete_attachment(&self, target: &str, image: &str) -> GordonResult<()>;

    async fn get_secrets(&self, domain: &str) -> GordonResult<HashMap<String, String>>;
    async fn set_secrets(&self, domain: &str, values: HashMap<String, String>) -> GordonResult<()>;
    async fn delete_secret(&self, domain: &str, key: &str) -> GordonResult<()>;

    /// Re-reads `gordon.toml` + the routes snapshot and reconciles.
    async fn reload(&self) -> GordonResult<()>;
    /// Forces a deploy for `domain` regardless of its current image digest.
    async fn deploy(&self, domain: &str) -> GordonResult<()>;
    /// Restarts the container(s) for `domain` in place.
    async fn restart(&self, domain: &str, with_attachments: bool) -> GordonResult<()>;

    async fn tags(&self, repository: &str) -> GordonResult<Vec<String>>;

    async fn logs(&self, lines: Option<u32>) -> GordonResult<Vec<String>>;
    async fn container_logs(&self, domain: &str, lines: Option<u32>) -> GordonResult<Vec<String>>;

    async fn list_backups(&self, domain: &str) -> GordonResult<Vec<BackupJob>>;
    async fn run_backup(&self, domain: &str) -> GordonResult<BackupJob>;

    async fn list_images(&self) -> GordonResult<Vec<ImageRecord>>;
    /// Runs both prune scopes: the engine's runtime/dangling-image prune
    /// and the registry's "keep latest + K previous" tag retention prune.
    async fn prune_images(&self) -> GordonResult<PruneResult>;
}
