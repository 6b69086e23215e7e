//! Remote control plane: an HTTP client against another instance's
//! `/admin/*` API. Grounded on `engine::docker::DockerEngine`'s
//! `reqwest-middleware` + `reqwest-retry` client construction — the same
//! exponential-backoff policy, retrying only transport failures and 5xx
//! responses, never 4xx (§9's "one shared retry/backoff policy object").

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    backup::BackupJob,
    config::{AttachmentConfig, RouteConfig},
    engine::ImageRecord,
    error::{GordonError, GordonResult},
};

use super::{ControlPlane, PruneResult};

const MAX_RETRIES: u32 = 3;

/// Talks to a Gordon instance's admin API at `base_url` with a bearer
/// token.
pub struct RemoteControlPlane {
    base_url: String,
    token: String,
    client: ClientWithMiddleware,
}

impl RemoteControlPlane {
    /// Builds a client against `base_url` (e.g. `http://host:5000`),
    /// authenticating every request with `token`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(MAX_RETRIES);
        let client = ClientBuilder::new(reqwest::Client::new())
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();
        RemoteControlPlane {
            base_url: base_url.into(),
            token: token.into(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> GordonResult<T> {
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Self::status_error(status, body));
        }
        Ok(resp.json::<T>().await?)
    }

    async fn expect_success(resp: reqwest::Response) -> GordonResult<()> {
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let body = resp.text().await.unwrap_or_default();
        Err(Self::status_error(status, body))
    }

    fn status_error(status: StatusCode, body: String) -> GordonError {
        match status {
            StatusCode::UNAUTHORIZED => GordonError::Unauthorized(body),
            StatusCode::FORBIDDEN => GordonError::Forbidden(body),
            StatusCode::NOT_FOUND => GordonError::NotFound(body),
            StatusCode::CONFLICT => GordonError::Conflict(body),
            _ => GordonError::EngineUnavailable(format!("{status}: {body}")),
        }
    }

    fn get(&self, path: &str) -> reqwest_middleware::RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(&self.token)
    }

    fn post(&self, path: &str) -> reqwest_middleware::RequestBuilder {
        self.client.post(self.url(path)).bearer_auth(&self.token)
    }

    fn delete(&self, path: &str) -> reqwest_middleware::RequestBuilder {
        self.client.delete(self.url(path)).bearer_auth(&self.token)
    }
}

#[async_trait]
impl ControlPlane for RemoteControlPlane {
    async fn status(&self) -> GordonResult<Value> {
        let resp = self.get("/admin/status").send().await?;
        Self::decode(resp).await
    }

    async fn health(&self) -> GordonResult<Value> {
        let resp = self.get("/admin/health").send().await?;
        Self::decode(resp).await
    }

    async fn list_routes(&self) -> GordonResult<Vec<RouteConfig>> {
        let resp = self.get("/admin/routes").send().await?;
        Self::decode(resp).await
    }

    async fn create_route(&self, route: RouteConfig) -> GordonResult<()> {
        let resp = self.post("/admin/routes").json(&route).send().await?;
        Self::expect_success(resp).await
    }

    async fn get_route(&self, domain: &str) -> GordonResult<RouteConfig> {
        let resp = self.get(&format!("/admin/routes/{domain}")).send().await?;
        Self::decode(resp).await
    }

    async fn delete_route(&self, domain: &str) -> GordonResult<()> {
        let resp = self.delete(&format!("/admin/routes/{domain}")).send().await?;
        Self::expect_success(resp).await
    }

    async fn list_attachments(&self) -> GordonResult<Vec<AttachmentConfig>> {
        let resp = self.get("/admin/attachments").send().await?;
        Self::decode(resp).await
    }

    async fn create_attachment(&self, attachment: AttachmentConfig) -> GordonResult<()> {
        let resp = self.post("/admin/attachments").json(&attachment).send().await?;
        Self::expect_success(resp).await
    }

    async fn delete_attachment(&self, target: &str, image: &str) -> GordonResult<()> {
        let resp = self.delete(&format!("/admin/attachments/{target}/{image}")).send().await?;
        Self::expect_success(resp).await
    }

    async fn get_secrets(&self, domain: &str) -> GordonResult<HashMap<String, String>> {
        let resp = self.get(&format!("/admin/secrets/{domain}")).send().await?;
        Self::decode(resp).await
    }

    async fn set_secrets(&self, domain: &str, values: HashMap<String, String>) -> GordonResult<()> {
        let resp = self.post(&format!("/admin/secrets/{domain}")).json(&values).send().await?;
        Self::expect_success(resp).await
    }

    async fn delete_secret(&self, domain: &str, key: &str) -> GordonResult<()> {
        let resp = self.delete(&format!("/admin/secrets/{domain}/{key}")).send().await?;
        Self::expect_success(resp).await
    }

    async fn reload(&self) -> GordonResult<()> {
        let resp = self.post("/admin/reload").send().await?;
        Self::expect_success(resp).await
    }

    async fn deploy(&self, domain: &str) -> GordonResult<()> {
        let resp = self.post(&format!("/admin/deploy/{domain}")).send().await?;
        Self::expect_success(resp).await
    }

    async fn restart(&self, domain: &str, with_attachments: bool) -> GordonResult<()> {
        let resp = self
            .post(&format!("/admin/restart/{domain}?attachments={with_attachments}"))
            .send()
            .await?;
        Self::expect_success(resp).await
    }

    async fn tags(&self, repository: &str) -> GordonResult<Vec<String>> {
        #[derive(serde::Deserialize)]
        struct TagsResponse {
            tags: Vec<String>,
        }
        let resp = self.get(&format!("/admin/tags/{repository}")).send().await?;
        Ok(Self::decode::<TagsResponse>(resp).await?.tags)
    }

    async fn logs(&self, lines: Option<u32>) -> GordonResult<Vec<String>> {
        let path = match lines {
            Some(n) => format!("/admin/logs?lines={n}"),
            None => "/admin/logs".to_string(),
        };
        let resp = self.get(&path).send().await?;
        Self::decode(resp).await
    }

    async fn container_logs(&self, domain: &str, lines: Option<u32>) -> GordonResult<Vec<String>> {
        let path = match lines {
            Some(n) => format!("/admin/logs/{domain}?lines={n}"),
            None => format!("/admin/logs/{domain}"),
        };
        let resp = self.get(&path).send().await?;
        Self::decode(resp).await
    }

    async fn list_backups(&self, domain: &str) -> GordonResult<Vec<BackupJob>> {
        let resp = self.get(&format!("/admin/backups/{domain}")).send().await?;
        Self::decode(resp).await
    }

    async fn run_backup(&self, domain: &str) -> GordonResult<BackupJob> {
        let resp = self.post(&format!("/admin/backups/{domain}")).send().await?;
        Self::decode(resp).await
    }

    async fn list_images(&self) -> GordonResult<Vec<ImageRecord>> {
        let resp = self.get("/admin/images").send().await?;
        Self::decode(resp).await
    }

    async fn prune_images(&self) -> GordonResult<PruneResult> {
        let resp = self.post("/admin/images/prune").send().await?;
        Self::decode(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_maps_common_codes() {
        assert!(matches!(
            RemoteControlPlane::status_error(StatusCode::UNAUTHORIZED, String::new()),
            GordonError::Unauthorized(_)
        ));
        assert!(matches!(
            RemoteControlPlane::status_error(StatusCode::NOT_FOUND, String::new()),
            GordonError::NotFound(_)
        ));
        assert!(matches!(
            RemoteControlPlane::status_error(StatusCode::BAD_GATEWAY, String::new()),
            GordonError::EngineUnavailable(_)
        ));
    }
}
