//! Secrets service (C5): per-domain and per-attachment env maps.
//!
//! Only the file-backed default backend is implemented here — `pass`/SOPS
//! integrations are named in the Non-goals/out-of-scope collaborators list
//! — but the trait is shaped so another backend can slot in without
//! touching C6/C7.

use std::{collections::HashMap, path::PathBuf};

use async_trait::async_trait;
use tokio::fs;

use crate::error::GordonResult;

/// A pluggable secrets backend.
#[async_trait]
pub trait SecretsBackend: Send + Sync {
    /// Reads the secret map for `domain` (and, if given, `attachment`).
    async fn get(&self, domain: &str, attachment: Option<&str>) -> GordonResult<HashMap<String, String>>;

    /// Atomically replaces the secret map for `domain`/`attachment`.
    async fn set(&self, domain: &str, attachment: Option<&str>, values: HashMap<String, String>) -> GordonResult<()>;

    /// Deletes a single key, or the whole map if `key` is `None`.
    async fn delete(&self, domain: &str, attachment: Option<&str>, key: Option<&str>) -> GordonResult<()>;
}

/// File-backed secrets: env files under `data_dir/env/<domain>[.<attachment>].env`.
pub struct FileSecretsBackend {
    root: PathBuf,
}

impl FileSecretsBackend {
    /// Creates a backend rooted at `<data_dir>/env`.
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        FileSecretsBackend {
            root: data_dir.into().join("env"),
        }
    }

    fn path_for(&self, domain: &str, attachment: Option<&str>) -> PathBuf {
        match attachment {
            Some(attachment) => self.root.join(format!("{domain}.{attachment}.env")),
            None => self.root.join(format!("{domain}.env")),
        }
    }

    fn encode(values: &HashMap<String, String>) -> String {
        let mut keys: Vec<_> = values.keys().collect();
        keys.sort();
        keys.into_iter()
            .map(|k| format!("{k}={}", values[k]))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn decode(raw: &str) -> HashMap<String, String> {
        raw.lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

#[async_trait]
impl SecretsBackend for FileSecretsBackend {
    async fn get(&self, domain: &str, attachment: Option<&str>) -> GordonResult<HashMap<String, String>> {
        let path = self.path_for(domain, attachment);
        match fs::read_to_string(&path).await {
            Ok(raw) => Ok(Self::decode(&raw)),
            Err(_) => Ok(HashMap::new()),
        }
    }

    async fn set(&self, domain: &str, attachment: Option<&str>, values: HashMap<String, String>) -> GordonResult<()> {
        fs::create_dir_all(&self.root).await?;
        let path = self.path_for(domain, attachment);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, Self::encode(&values)).await?;
        fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn delete(&self, domain: &str, attachment: Option<&str>, key: Option<&str>) -> GordonResult<()> {
        let path = self.path_for(domain, attachment);
        match key {
            None => {
                fs::remove_file(&path).await.ok();
                Ok(())
            }
            Some(key) => {
                let mut values = self.get(domain, attachment).await?;
                values.remove(key);
                self.set(domain, attachment, values).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let backend = FileSecretsBackend::new(dir.path());

        let mut values = HashMap::new();
        values.insert("DATABASE_URL".to_string(), "postgres://x".to_string());
        backend.set("app.example.com", None, values.clone()).await.unwrap();

        let read_back = backend.get("app.example.com", None).await.unwrap();
        assert_eq!(read_back, values);
    }

    #[tokio::test]
    async fn attachment_secrets_are_isolated_from_domain_secrets() {
        let dir = tempdir().unwrap();
        let backend = FileSecretsBackend::new(dir.path());

        let mut domain_values = HashMap::new();
        domain_values.insert("A".to_string(), "1".to_string());
        backend.set("app.example.com", None, domain_values).await.unwrap();

        let mut attachment_values = HashMap::new();
        attachment_values.insert("B".to_string(), "2".to_string());
        backend
            .set("app.example.com", Some("postgres"), attachment_values)
            .await
            .unwrap();

        assert!(backend.get("app.example.com", None).await.unwrap().contains_key("A"));
        assert!(backend
            .get("app.example.com", Some("postgres"))
            .await
            .unwrap()
            .contains_key("B"));
    }

    #[tokio::test]
    async fn delete_single_key_preserves_others() {
        let dir = tempdir().unwrap();
        let backend = FileSecretsBackend::new(dir.path());

        let mut values = HashMap::new();
        values.insert("A".to_string(), "1".to_string());
        values.insert("B".to_string(), "2".to_string());
        backend.set("app.example.com", None, values).await.unwrap();

        backend.delete("app.example.com", None, Some("A")).await.unwrap();
        let remaining = backend.get("app.example.com", None).await.unwrap();
        assert!(!remaining.contains_key("A"));
        assert!(remaining.contains_key("B"));
    }

    #[tokio::test]
    async fn missing_domain_returns_empty_map() {
        let dir = tempdir().unwrap();
        let backend = FileSecretsBackend::new(dir.path());
        assert!(backend.get("nope.example.com", None).await.unwrap().is_empty());
    }
}
