//! Config / route model (C4): the authoritative in-memory view of routes,
//! attachments, external routes, feature flags, and secrets backend
//! selection, plus the TOML file + environment-variable layering that
//! produces it.

use std::{collections::HashMap, path::Path, sync::LazyLock};

use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};

use crate::{error::GordonResult, registry::rate_limit::RateLimitConfig};

/// The embedded default configuration, used when no `gordon.toml` exists.
pub const DEFAULT_CONFIG_TOML: &str = include_str!("default.toml");

/// Default location for the data directory when `$HOME` is resolvable.
pub static DEFAULT_DATA_DIR: LazyLock<String> = LazyLock::new(|| {
    dirs::data_dir()
        .map(|d| d.join("gordon").to_string_lossy().into_owned())
        .unwrap_or_else(|| "/var/lib/gordon".to_string())
});

/// `server.*` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Reverse proxy listen port.
    pub port: u16,
    /// Registry + admin listen port.
    pub registry_port: u16,
    /// Hostname the registry is reachable at (used in image references).
    pub registry_domain: String,
    /// Root directory for all persisted state.
    pub data_dir: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            port: 80,
            registry_port: 5000,
            registry_domain: "localhost".to_string(),
            data_dir: DEFAULT_DATA_DIR.clone(),
        }
    }
}

/// `auto_route.*` settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoRouteConfig {
    /// Whether pushing an image for an unconfigured domain auto-creates a route.
    pub enabled: bool,
}

/// `network_isolation.*` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkIsolationConfig {
    /// Whether each route gets its own bridge network.
    pub enabled: bool,
    /// Network name prefix.
    pub prefix: String,
}

impl Default for NetworkIsolationConfig {
    fn default() -> Self {
        NetworkIsolationConfig {
            enabled: false,
            prefix: "gordon".to_string(),
        }
    }
}

/// Pluggable secrets backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretsBackendKind {
    /// Plaintext file-backed env maps (the only backend implemented here).
    #[default]
    Unsafe,
    /// GPG-encrypted `pass` tree (out of scope; name reserved).
    Pass,
    /// SOPS-encrypted tree (out of scope; name reserved).
    Sops,
}

/// `auth.*` settings (admin API authentication).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Whether the admin API requires a bearer token. When `true`, the
    /// in-process control plane refuses to run (C10).
    pub enabled: bool,
    /// Which secrets backend mediates credential storage.
    pub secrets_backend: SecretsBackendKind,
}

/// Registry authentication mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RegistryAuthType {
    /// Single shared bcrypt-hashed password.
    #[default]
    Password,
    /// Pre-shared token secret (no password prompt).
    Token,
}

/// `registry_auth.*` settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryAuthConfig {
    /// See [`RegistryAuthType`].
    #[serde(rename = "type")]
    pub type_: RegistryAuthType,
    /// HS256 signing secret for registry tokens.
    pub token_secret: String,
    /// Bcrypt hash of the registry password, when `type = password`.
    pub password_hash: Option<String>,
}

/// A single configured route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Unique hostname.
    pub domain: String,
    /// Registry-qualified image reference, e.g. `reg.example.com/app:latest`.
    pub image: String,
    /// Optional dedicated network name.
    #[serde(default)]
    pub network: Option<String>,
}

/// A sidecar container declaration owned by a route or a named network
/// group (§ GLOSSARY "Attachment"). Must run on a non-default bridge
/// network so it gets DNS resolution from the primary container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentConfig {
    /// The route domain or network group this attachment belongs to.
    pub target: String,
    /// Image reference, e.g. `postgres:16`.
    pub image: String,
    /// Network name the attachment and its target share. Must not be the
    /// Docker default bridge.
    pub network: String,
}

/// The on-disk shape of `data_dir/routes.json`, as written by
/// [`GordonConfig::persist_routes_snapshot`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct RoutesSnapshot {
    routes: Vec<RouteConfig>,
    attachments: Vec<AttachmentConfig>,
    external_routes: HashMap<String, String>,
}

/// `backups.*` settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupsConfig {
    /// Directory backup archives are written to, relative to `data_dir`.
    pub dir: String,
    /// How many historical backups to retain per domain.
    pub keep: u32,
}

/// `registry.*` settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// How many non-`latest` tags to keep per repository on registry
    /// prune, beyond `latest` itself (sorted by creation time descending).
    pub retention_keep: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig { retention_keep: 5 }
    }
}

/// The full, validated Gordon configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GordonConfig {
    /// See [`ServerConfig`].
    pub server: ServerConfig,
    /// See [`AutoRouteConfig`].
    pub auto_route: AutoRouteConfig,
    /// See [`NetworkIsolationConfig`].
    pub network_isolation: NetworkIsolationConfig,
    /// See [`AuthConfig`].
    pub auth: AuthConfig,
    /// See [`RegistryAuthConfig`].
    pub registry_auth: RegistryAuthConfig,
    /// CIDRs whose traffic is trusted to set `X-Forwarded-For`/`X-Real-IP`.
    pub trusted_proxies: Vec<IpNetwork>,
    /// See [`crate::registry::rate_limit::RateLimitConfig`].
    pub rate_limit: RateLimitConfig,
    /// Statically configured routes (in addition to any created via the
    /// admin API).
    pub routes: Vec<RouteConfig>,
    /// Sidecar containers attached to routes or network groups.
    pub attachments: Vec<AttachmentConfig>,
    /// Passthrough proxy targets: hostname -> upstream URL. Proxy-only;
    /// never participate in reload/deploy (§9 Open Questions, decided).
    pub external_routes: HashMap<String, String>,
    /// See [`BackupsConfig`].
    pub backups: BackupsConfig,
    /// See [`RegistryConfig`].
    pub registry: RegistryConfig,
}

impl GordonConfig {
    /// Loads configuration from `path` if it exists, otherwise from the
    /// embedded default. Environment variables prefixed `GORDON_` override
    /// a handful of well-known scalar fields after parsing (ambient
    /// `dotenvy` + TOML layering). The
    /// `routes.json` snapshot under `data_dir`, if present, overlays
    /// `routes`/`attachments`/`external_routes` before validation — it
    /// records admin-API mutations made since the file was last read.
    pub fn load(path: Option<&Path>) -> GordonResult<Self> {
        let raw = match path {
            Some(path) if path.exists() => std::fs::read_to_string(path)?,
            _ => DEFAULT_CONFIG_TOML.to_string(),
        };

        let mut config: GordonConfig = toml::from_str(&raw)?;
        config.apply_env_overrides();
        config.apply_routes_snapshot();
        config.validate()?;
        Ok(config)
    }

    fn routes_snapshot_path(&self) -> std::path::PathBuf {
        Path::new(&self.server.data_dir).join("routes.json")
    }

    fn apply_routes_snapshot(&mut self) {
        let Ok(raw) = std::fs::read_to_string(self.routes_snapshot_path()) else {
            return;
        };
        if let Ok(snapshot) = serde_json::from_str::<RoutesSnapshot>(&raw) {
            self.routes = snapshot.routes;
            self.attachments = snapshot.attachments;
            self.external_routes = snapshot.external_routes;
        }
    }

    /// Writes the current routes/attachments/external_routes to
    /// `data_dir/routes.json`, called after every admin-API mutation so a
    /// restart picks up changes made without touching `gordon.toml`.
    pub fn persist_routes_snapshot(&self) -> GordonResult<()> {
        let snapshot = RoutesSnapshot {
            routes: self.routes.clone(),
            attachments: self.attachments.clone(),
            external_routes: self.external_routes.clone(),
        };
        std::fs::create_dir_all(&self.server.data_dir)?;
        std::fs::write(self.routes_snapshot_path(), serde_json::to_vec_pretty(&snapshot)?)?;
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(port) = std::env::var("GORDON_PORT") {
            if let Ok(port) = port.parse() {
                self.server.port = port;
            }
        }
        if let Ok(data_dir) = std::env::var("GORDON_DATA_DIR") {
            self.server.data_dir = data_dir;
        }
        if let Ok(domain) = std::env::var("GORDON_REGISTRY_DOMAIN") {
            self.server.registry_domain = domain;
        }
    }

    /// Validates cross-field invariants, collecting every violation rather
    /// than failing on the first.
    pub fn validate(&self) -> GordonResult<()> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push("server.port must be nonzero".to_string());
        }
        if self.server.registry_port == 0 {
            errors.push("server.registry_port must be nonzero".to_string());
        }

        let mut seen_domains = std::collections::HashSet::new();
        for route in &self.routes {
            if !seen_domains.insert(route.domain.clone()) {
                errors.push(format!("duplicate route domain: {}", route.domain));
            }
            if route.image.rsplit_once(':').is_none() {
                errors.push(format!("route image missing a tag: {}", route.image));
            }
        }

        const DEFAULT_BRIDGE_NAMES: &[&str] = &["bridge", ""];
        for attachment in &self.attachments {
            if DEFAULT_BRIDGE_NAMES.contains(&attachment.network.as_str()) {
                errors.push(format!(
                    "attachment {} on {} must not use the default bridge network",
                    attachment.image, attachment.target
                ));
            }
        }

        if errors.is_empty() {
            crate::error::Ok(())
        } else {
            Err(crate::error::GordonError::ConfigValidationErrors(errors))
        }
    }

    /// Finds the configured route for `domain`, if any.
    pub fn route_for(&self, domain: &str) -> Option<&RouteConfig> {
        self.routes.iter().find(|r| r.domain == domain)
    }

    /// Attachments declared for `target` (a route domain or network group).
    pub fn attachments_for(&self, target: &str) -> Vec<&AttachmentConfig> {
        self.attachments.iter().filter(|a| a.target == target).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_default_parses_and_validates() {
        let config: GordonConfig = toml::from_str(DEFAULT_CONFIG_TOML).unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn duplicate_route_domains_fail_validation() {
        let mut config = GordonConfig::default();
        config.routes.push(RouteConfig {
            domain: "app.example.com".to_string(),
            image: "reg.example.com/app:latest".to_string(),
            network: None,
        });
        config.routes.push(RouteConfig {
            domain: "app.example.com".to_string(),
            image: "reg.example.com/app:prod".to_string(),
            network: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_port_fails_validation() {
        let mut config = GordonConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn attachment_on_default_bridge_fails_validation() {
        let mut config = GordonConfig::default();
        config.attachments.push(AttachmentConfig {
            target: "app.example.com".to_string(),
            image: "postgres:16".to_string(),
            network: "bridge".to_string(),
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn attachment_on_named_network_passes_validation() {
        let mut config = GordonConfig::default();
        config.attachments.push(AttachmentConfig {
            target: "app.example.com".to_string(),
            image: "postgres:16".to_string(),
            network: "gordon-app".to_string(),
        });
        assert!(config.validate().is_ok());
    }

    #[test]
    fn routes_snapshot_round_trips_through_persist_and_apply() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = GordonConfig::default();
        config.server.data_dir = dir.path().to_string_lossy().into_owned();
        config.routes.push(RouteConfig {
            domain: "app.example.com".to_string(),
            image: "reg.example.com/app:latest".to_string(),
            network: None,
        });
        config.persist_routes_snapshot().unwrap();

        let mut reloaded = GordonConfig::default();
        reloaded.server.data_dir = config.server.data_dir.clone();
        reloaded.apply_routes_snapshot();
        assert_eq!(reloaded.routes, config.routes);
    }
}
