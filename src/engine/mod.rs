//! Container controller (C6): the capability seam the orchestrator (C7)
//! deploys through. Production wires [`docker::DockerEngine`]; tests wire
//! a fake. This is the redesign named in §9 ("Module-level Docker client
//! singleton: replace with a Container-engine capability injected into the
//! controller").

pub mod docker;

use std::{collections::HashMap, net::IpAddr};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GordonResult;

/// The container port Gordon assumes every route's primary container
/// serves HTTP on, absent a per-route override in the deploy spec.
pub const DEFAULT_CONTAINER_PORT: u16 = 80;

/// Runtime status of a container, as tracked by C6/C7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    /// `docker create` has run, `docker start` has not.
    Creating,
    /// Running.
    Running,
    /// Stopped but not removed.
    Stopped,
    /// No longer exists on the engine.
    Gone,
}

/// A container record as reported by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Engine-assigned container id.
    pub id: String,
    /// The `gordon.domain` label value.
    pub domain: String,
    /// The image reference the container was created from.
    pub image: String,
    /// Current status.
    pub status: ContainerStatus,
    /// Network the container is attached to.
    pub network: Option<String>,
    /// The container's IP address on its attached network, if known.
    pub ip: Option<IpAddr>,
}

/// Parameters for [`ContainerEngine::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateSpec {
    /// Route domain; becomes the `gordon.domain` label.
    pub domain: String,
    /// Image reference to create the container from.
    pub image: String,
    /// Environment variables to inject.
    pub env: HashMap<String, String>,
    /// Network to attach to, if any.
    pub network: Option<String>,
    /// Extra labels beyond `gordon.domain`.
    pub labels: HashMap<String, String>,
    /// Published ports, `container_port -> host_port`.
    pub ports: HashMap<u16, u16>,
    /// Docker restart policy name (`no`, `always`, `unless-stopped`, ...).
    pub restart_policy: String,
}

/// Options for [`ContainerEngine::logs`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LogOptions {
    /// Return only the last N lines (`None` = all available).
    pub tail: Option<u32>,
    /// Whether to keep streaming new lines (admin `/logs` SSE support).
    pub follow: bool,
}

/// Credentials used to authenticate a pull against the registry.
#[derive(Debug, Clone, Default)]
pub struct PullAuth {
    /// Username, if any.
    pub username: Option<String>,
    /// Password or token, if any.
    pub password: Option<String>,
}

/// A locally cached image, as reported by the engine's image list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Engine-assigned image id.
    pub id: String,
    /// Repo:tag references pointing at this image.
    pub tags: Vec<String>,
    /// Size on disk, in bytes.
    pub size: u64,
}

/// Label applied to every container Gordon creates, used to discover
/// managed containers on startup reconciliation.
pub const DOMAIN_LABEL: &str = "gordon.domain";

/// The capability set the orchestrator needs from the container engine.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    /// Pulls `image_ref`, retrying transient failures with exponential
    /// backoff (handled by the implementation).
    async fn pull(&self, image_ref: &str, auth: &PullAuth) -> GordonResult<()>;

    /// Creates (but does not start) a container, returning its id.
    async fn create(&self, spec: &CreateSpec) -> GordonResult<String>;

    /// Starts a previously created container.
    async fn start(&self, id: &str) -> GordonResult<()>;

    /// Stops a running container, sending SIGTERM and waiting up to
    /// `grace_timeout_secs` before SIGKILL.
    async fn stop(&self, id: &str, grace_timeout_secs: u32) -> GordonResult<()>;

    /// Removes a stopped container.
    async fn remove(&self, id: &str) -> GordonResult<()>;

    /// Fetches the current record for a container.
    async fn inspect(&self, id: &str) -> GordonResult<ContainerRecord>;

    /// Fetches recent log lines (and optionally keeps streaming).
    async fn logs(&self, id: &str, opts: LogOptions) -> GordonResult<Vec<String>>;

    /// Ensures a bridge network named `name` exists.
    async fn ensure_network(&self, name: &str) -> GordonResult<()>;

    /// Lists every container carrying the [`DOMAIN_LABEL`].
    async fn list(&self) -> GordonResult<Vec<ContainerRecord>>;

    /// Lists locally cached images (admin `/images`).
    async fn list_images(&self) -> GordonResult<Vec<ImageRecord>>;

    /// Removes dangling/unused images, returning bytes reclaimed (admin
    /// `/images/prune`).
    async fn prune_images(&self) -> GordonResult<u64>;

    /// Runs `cmd` to completion inside a running container and returns its
    /// combined stdout/stderr. Used by the backup job runner to invoke
    /// `pg_dump`/`mysqldump`/`redis-cli --rdb` inside an attachment.
    async fn exec(&self, id: &str, cmd: Vec<String>) -> GordonResult<Vec<u8>>;
}

#[cfg(test)]
pub mod fake {
    //! An in-memory [`ContainerEngine`] fake used by orchestrator tests.
    //! Grounded on the trait-seam redesign note in §9 ("tests supply a
    //! fake").

    use super::*;
    use std::sync::Mutex;

    /// A fake engine tracking containers purely in memory.
    #[derive(Default)]
    pub struct FakeEngine {
        containers: Mutex<HashMap<String, ContainerRecord>>,
        pub fail_pull_for: Mutex<Option<String>>,
        next_id: Mutex<u64>,
        pub exec_log: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl FakeEngine {
        /// Creates an empty fake engine.
        pub fn new() -> Self {
            Self::default()
        }

        /// Snapshot of all tracked containers, for assertions.
        pub fn snapshot(&self) -> Vec<ContainerRecord> {
            self.containers.lock().unwrap().values().cloned().collect()
        }
    }

    #[async_trait]
    impl ContainerEngine for FakeEngine {
        async fn pull(&self, image_ref: &str, _auth: &PullAuth) -> GordonResult<()> {
            if self.fail_pull_for.lock().unwrap().as_deref() == Some(image_ref) {
                return Err(crate::error::GordonError::ImagePullFailed(image_ref.to_string()));
            }
            Ok(())
        }

        async fn create(&self, spec: &CreateSpec) -> GordonResult<String> {
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            let id = format!("fake-{}", *next_id);
            self.containers.lock().unwrap().insert(
                id.clone(),
                ContainerRecord {
                    id: id.clone(),
                    domain: spec.domain.clone(),
                    image: spec.image.clone(),
                    status: ContainerStatus::Creating,
                    network: spec.network.clone(),
                    ip: Some("127.0.0.1".parse().unwrap()),
                },
            );
            Ok(id)
        }

        async fn start(&self, id: &str) -> GordonResult<()> {
            let mut containers = self.containers.lock().unwrap();
            let record = containers
                .get_mut(id)
                .ok_or_else(|| crate::error::GordonError::NotFound(id.to_string()))?;
            record.status = ContainerStatus::Running;
            Ok(())
        }

        async fn stop(&self, id: &str, _grace_timeout_secs: u32) -> GordonResult<()> {
            let mut containers = self.containers.lock().unwrap();
            if let Some(record) = containers.get_mut(id) {
                record.status = ContainerStatus::Stopped;
            }
            Ok(())
        }

        async fn remove(&self, id: &str) -> GordonResult<()> {
            self.containers.lock().unwrap().remove(id);
            Ok(())
        }

        async fn inspect(&self, id: &str) -> GordonResult<ContainerRecord> {
            self.containers
                .lock()
                .unwrap()
                .get(id)
                .cloned()
                .ok_or_else(|| crate::error::GordonError::NotFound(id.to_string()))
        }

        async fn logs(&self, _id: &str, _opts: LogOptions) -> GordonResult<Vec<String>> {
            Ok(vec![])
        }

        async fn ensure_network(&self, _name: &str) -> GordonResult<()> {
            Ok(())
        }

        async fn list(&self) -> GordonResult<Vec<ContainerRecord>> {
            Ok(self.snapshot())
        }

        async fn list_images(&self) -> GordonResult<Vec<ImageRecord>> {
            Ok(vec![])
        }

        async fn prune_images(&self) -> GordonResult<u64> {
            Ok(0)
        }

        async fn exec(&self, id: &str, cmd: Vec<String>) -> GordonResult<Vec<u8>> {
            self.exec_log.lock().unwrap().push((id.to_string(), cmd));
            Ok(b"fake-dump-output".to_vec())
        }
    }
}
