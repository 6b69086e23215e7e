//! [`super::ContainerEngine`] implementation talking to the local Docker
//! Engine API over HTTP. Grounded on the retrying HTTP client pattern
//! (`reqwest` wrapped in `reqwest-middleware` + `reqwest-retry`) used for
//! image pulls.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{GordonError, GordonResult};

use super::{ContainerEngine, ContainerRecord, ContainerStatus, CreateSpec, ImageRecord, LogOptions, PullAuth, DOMAIN_LABEL};

const MAX_RETRIES: u32 = 3;

/// Talks to the Docker Engine API at `base_url` (e.g.
/// `http://localhost:2375` for a TCP-exposed daemon, or a local proxy in
/// front of `/var/run/docker.sock`).
pub struct DockerEngine {
    base_url: String,
    client: ClientWithMiddleware,
}

impl DockerEngine {
    /// Creates an engine handle pointed at `base_url`, with exponential
    /// backoff retry on transient (connect/5xx) failures.
    pub fn new(base_url: impl Into<String>) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);
        let client = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        DockerEngine {
            base_url: base_url.into(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn ok_or_engine_error(resp: reqwest::Response) -> GordonResult<reqwest::Response> {
        if resp.status().is_success() {
            Ok(resp)
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(GordonError::EngineUnavailable(format!("{status}: {body}")))
        }
    }
}

#[derive(Deserialize)]
struct InspectResponse {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "State")]
    state: InspectState,
    #[serde(rename = "Config")]
    config: InspectConfig,
    #[serde(rename = "NetworkSettings")]
    network_settings: InspectNetworkSettings,
}

#[derive(Deserialize)]
struct InspectNetworkSettings {
    #[serde(rename = "IPAddress")]
    ip_address: String,
    #[serde(rename = "Networks")]
    networks: std::collections::HashMap<String, InspectNetwork>,
}

#[derive(Deserialize)]
struct InspectNetwork {
    #[serde(rename = "IPAddress")]
    ip_address: String,
}

#[derive(Deserialize)]
struct InspectState {
    #[serde(rename = "Running")]
    running: bool,
}

#[derive(Deserialize)]
struct InspectConfig {
    #[serde(rename = "Image")]
    image: String,
    #[serde(rename = "Labels")]
    labels: Option<std::collections::HashMap<String, String>>,
}

#[derive(Serialize)]
struct CreateContainerBody {
    #[serde(rename = "Image")]
    image: String,
    #[serde(rename = "Env")]
    env: Vec<String>,
    #[serde(rename = "Labels")]
    labels: std::collections::HashMap<String, String>,
    #[serde(rename = "HostConfig")]
    host_config: HostConfig,
}

#[derive(Serialize)]
struct HostConfig {
    #[serde(rename = "NetworkMode")]
    network_mode: Option<String>,
    #[serde(rename = "RestartPolicy")]
    restart_policy: RestartPolicy,
    #[serde(rename = "PortBindings")]
    port_bindings: std::collections::HashMap<String, Vec<PortBinding>>,
}

#[derive(Serialize)]
struct RestartPolicy {
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Serialize)]
struct PortBinding {
    #[serde(rename = "HostPort")]
    host_port: String,
}

#[async_trait]
impl ContainerEngine for DockerEngine {
    async fn pull(&self, image_ref: &str, auth: &PullAuth) -> GordonResult<()> {
        let mut req = self
            .client
            .post(self.url(&format!("/images/create?fromImage={image_ref}")));

        if auth.username.is_some() || auth.password.is_some() {
            let auth_json = json!({
                "username": auth.username.clone().unwrap_or_default(),
                "password": auth.password.clone().unwrap_or_default(),
            });
            req = req.header("X-Registry-Auth", STANDARD.encode(auth_json.to_string()));
        }

        let resp = req
            .send()
            .await
            .map_err(|e| GordonError::ImagePullFailed(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            let status = resp.status();
            Err(GordonError::ImagePullFailed(format!("{image_ref}: {status}")))
        }
    }

    async fn create(&self, spec: &CreateSpec) -> GordonResult<String> {
        let mut labels = spec.labels.clone();
        labels.insert(DOMAIN_LABEL.to_string(), spec.domain.clone());

        let port_bindings = spec
            .ports
            .iter()
            .map(|(container_port, host_port)| {
                (
                    format!("{container_port}/tcp"),
                    vec![PortBinding {
                        host_port: host_port.to_string(),
                    }],
                )
            })
            .collect();

        let body = CreateContainerBody {
            image: spec.image.clone(),
            env: spec
                .env
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect(),
            labels,
            host_config: HostConfig {
                network_mode: spec.network.clone(),
                restart_policy: RestartPolicy {
                    name: spec.restart_policy.clone(),
                },
                port_bindings,
            },
        };

        let resp = self
            .client
            .post(self.url("/containers/create"))
            .json(&body)
            .send()
            .await
            .map_err(|e| GordonError::EngineUnavailable(e.to_string()))?;
        let resp = Self::ok_or_engine_error(resp).await?;

        #[derive(Deserialize)]
        struct CreateResponse {
            #[serde(rename = "Id")]
            id: String,
        }
        let parsed: CreateResponse = resp.json().await?;
        Ok(parsed.id)
    }

    async fn start(&self, id: &str) -> GordonResult<()> {
        let resp = self
            .client
            .post(self.url(&format!("/containers/{id}/start")))
            .send()
            .await
            .map_err(|e| GordonError::EngineUnavailable(e.to_string()))?;
        if resp.status().is_success() || resp.status() == StatusCode::NOT_MODIFIED {
            Ok(())
        } else {
            Self::ok_or_engine_error(resp).await.map(|_| ())
        }
    }

    async fn stop(&self, id: &str, grace_timeout_secs: u32) -> GordonResult<()> {
        let resp = self
            .client
            .post(self.url(&format!("/containers/{id}/stop?t={grace_timeout_secs}")))
            .timeout(Duration::from_secs(u64::from(grace_timeout_secs) + 5))
            .send()
            .await
            .map_err(|e| GordonError::EngineUnavailable(e.to_string()))?;
        if resp.status().is_success() || resp.status() == StatusCode::NOT_MODIFIED {
            Ok(())
        } else {
            Self::ok_or_engine_error(resp).await.map(|_| ())
        }
    }

    async fn remove(&self, id: &str) -> GordonResult<()> {
        let resp = self
            .client
            .delete(self.url(&format!("/containers/{id}?force=true")))
            .send()
            .await
            .map_err(|e| GordonError::EngineUnavailable(e.to_string()))?;
        if resp.status().is_success() || resp.status() == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Self::ok_or_engine_error(resp).await.map(|_| ())
        }
    }

    async fn inspect(&self, id: &str) -> GordonResult<ContainerRecord> {
        let resp = self
            .client
            .get(self.url(&format!("/containers/{id}/json")))
            .send()
            .await
            .map_err(|e| GordonError::EngineUnavailable(e.to_string()))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Err(GordonError::NotFound(id.to_string()));
        }
        let resp = Self::ok_or_engine_error(resp).await?;
        let parsed: InspectResponse = resp.json().await?;

        let domain = parsed
            .config
            .labels
            .as_ref()
            .and_then(|labels| labels.get(DOMAIN_LABEL))
            .cloned()
            .unwrap_or_default();

        let ip_address = parsed
            .network_settings
            .networks
            .values()
            .map(|n| n.ip_address.clone())
            .find(|ip| !ip.is_empty())
            .unwrap_or(parsed.network_settings.ip_address);

        Ok(ContainerRecord {
            id: parsed.id,
            domain,
            image: parsed.config.image,
            status: if parsed.state.running {
                ContainerStatus::Running
            } else {
                ContainerStatus::Stopped
            },
            network: None,
            ip: ip_address.parse().ok(),
        })
    }

    async fn logs(&self, id: &str, opts: LogOptions) -> GordonResult<Vec<String>> {
        let tail = opts.tail.map(|n| n.to_string()).unwrap_or_else(|| "all".to_string());
        let resp = self
            .client
            .get(self.url(&format!(
                "/containers/{id}/logs?stdout=true&stderr=true&tail={tail}"
            )))
            .send()
            .await
            .map_err(|e| GordonError::EngineUnavailable(e.to_string()))?;
        let resp = Self::ok_or_engine_error(resp).await?;
        let body = resp.text().await?;
        Ok(body.lines().map(str::to_string).collect())
    }

    async fn ensure_network(&self, name: &str) -> GordonResult<()> {
        let inspect = self
            .client
            .get(self.url(&format!("/networks/{name}")))
            .send()
            .await
            .map_err(|e| GordonError::EngineUnavailable(e.to_string()))?;
        if inspect.status().is_success() {
            return Ok(());
        }

        let resp = self
            .client
            .post(self.url("/networks/create"))
            .json(&json!({ "Name": name, "Driver": "bridge" }))
            .send()
            .await
            .map_err(|e| GordonError::EngineUnavailable(e.to_string()))?;
        Self::ok_or_engine_error(resp).await.map(|_| ())
    }

    async fn list(&self) -> GordonResult<Vec<ContainerRecord>> {
        let filters = json!({ "label": [DOMAIN_LABEL] }).to_string();
        let resp = self
            .client
            .get(self.url("/containers/json"))
            .query(&[("all", "true"), ("filters", filters.as_str())])
            .send()
            .await
            .map_err(|e| GordonError::EngineUnavailable(e.to_string()))?;
        let resp = Self::ok_or_engine_error(resp).await?;

        #[derive(Deserialize)]
        struct ListEntry {
            #[serde(rename = "Id")]
            id: String,
            #[serde(rename = "Image")]
            image: String,
            #[serde(rename = "State")]
            state: String,
            #[serde(rename = "Labels")]
            labels: std::collections::HashMap<String, String>,
            #[serde(rename = "NetworkSettings")]
            network_settings: ListNetworkSettings,
        }

        #[derive(Deserialize)]
        struct ListNetworkSettings {
            #[serde(rename = "Networks")]
            networks: std::collections::HashMap<String, InspectNetwork>,
        }

        let entries: Vec<ListEntry> = resp.json().await?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                let ip = entry
                    .network_settings
                    .networks
                    .values()
                    .map(|n| n.ip_address.clone())
                    .find(|ip| !ip.is_empty())
                    .and_then(|ip| ip.parse().ok());
                ContainerRecord {
                    id: entry.id,
                    domain: entry.labels.get(DOMAIN_LABEL).cloned().unwrap_or_default(),
                    image: entry.image,
                    status: if entry.state == "running" {
                        ContainerStatus::Running
                    } else {
                        ContainerStatus::Stopped
                    },
                    network: None,
                    ip,
                }
            })
            .collect())
    }

    async fn list_images(&self) -> GordonResult<Vec<ImageRecord>> {
        let resp = self
            .client
            .get(self.url("/images/json"))
            .send()
            .await
            .map_err(|e| GordonError::EngineUnavailable(e.to_string()))?;
        let resp = Self::ok_or_engine_error(resp).await?;

        #[derive(Deserialize)]
        struct ImageEntry {
            #[serde(rename = "Id")]
            id: String,
            #[serde(rename = "RepoTags")]
            repo_tags: Option<Vec<String>>,
            #[serde(rename = "Size")]
            size: u64,
        }

        let entries: Vec<ImageEntry> = resp.json().await?;
        Ok(entries
            .into_iter()
            .map(|entry| ImageRecord {
                id: entry.id,
                tags: entry.repo_tags.unwrap_or_default(),
                size: entry.size,
            })
            .collect())
    }

    async fn prune_images(&self) -> GordonResult<u64> {
        let resp = self
            .client
            .post(self.url("/images/prune"))
            .send()
            .await
            .map_err(|e| GordonError::EngineUnavailable(e.to_string()))?;
        let resp = Self::ok_or_engine_error(resp).await?;

        #[derive(Deserialize)]
        struct PruneResponse {
            #[serde(rename = "SpaceReclaimed")]
            space_reclaimed: u64,
        }
        let parsed: PruneResponse = resp.json().await?;
        Ok(parsed.space_reclaimed)
    }

    async fn exec(&self, id: &str, cmd: Vec<String>) -> GordonResult<Vec<u8>> {
        #[derive(Deserialize)]
        struct ExecCreateResponse {
            #[serde(rename = "Id")]
            id: String,
        }

        let resp = self
            .client
            .post(self.url(&format!("/containers/{id}/exec")))
            .json(&json!({ "Cmd": cmd, "AttachStdout": true, "AttachStderr": true }))
            .send()
            .await
            .map_err(|e| GordonError::EngineUnavailable(e.to_string()))?;
        let resp = Self::ok_or_engine_error(resp).await?;
        let exec: ExecCreateResponse = resp.json().await?;

        let resp = self
            .client
            .post(self.url(&format!("/exec/{}/start", exec.id)))
            .json(&json!({ "Detach": false, "Tty": false }))
            .send()
            .await
            .map_err(|e| GordonError::EngineUnavailable(e.to_string()))?;
        let resp = Self::ok_or_engine_error(resp).await?;
        let raw = resp.bytes().await?;
        Ok(demux_stream(&raw))
    }
}

/// Strips the Docker exec/attach stream's 8-byte frame headers
/// (1-byte stream type, 3 reserved, 4-byte big-endian length), concatenating
/// every frame's payload regardless of stdout/stderr origin.
fn demux_stream(raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len());
    let mut pos = 0;
    while pos + 8 <= raw.len() {
        let len = u32::from_be_bytes([raw[pos + 4], raw[pos + 5], raw[pos + 6], raw[pos + 7]]) as usize;
        pos += 8;
        let end = (pos + len).min(raw.len());
        out.extend_from_slice(&raw[pos..end]);
        pos = end;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn docker_engine_builds_with_base_url() {
        let engine = DockerEngine::new("http://localhost:2375");
        assert_eq!(engine.base_url, "http://localhost:2375");
    }

    #[test]
    fn demux_stream_strips_frame_headers() {
        let mut raw = Vec::new();
        raw.extend_from_slice(&[1, 0, 0, 0]);
        raw.extend_from_slice(&5u32.to_be_bytes());
        raw.extend_from_slice(b"hello");
        raw.extend_from_slice(&[2, 0, 0, 0]);
        raw.extend_from_slice(&6u32.to_be_bytes());
        raw.extend_from_slice(b" world");
        assert_eq!(demux_stream(&raw), b"hello world");
    }
}
