//! Auth service (C3): JWT issue/validate, bcrypt password verification,
//! scope model, and the token store.

pub mod jwt;
pub mod scope;
pub mod token_store;

use std::{net::SocketAddr, sync::Arc};

use rand::Rng;
use uuid::Uuid;

use crate::{
    auth::{
        jwt::JwtCodec,
        scope::{Scope, ScopeType},
        token_store::{AuthToken, TokenStore},
    },
    error::{GordonError, GordonResult},
    net::is_loopback,
};

/// Default TTL for an authenticated Docker registry token (5 minutes).
pub const REGISTRY_TOKEN_TTL_AUTHENTICATED_SECS: i64 = 300;
/// Default TTL for an anonymous Docker registry token (1 minute).
pub const REGISTRY_TOKEN_TTL_ANONYMOUS_SECS: i64 = 60;

/// The auth service: owns the signing key, the token index, and the
/// startup-minted internal loopback credential.
pub struct AuthService {
    jwt: JwtCodec,
    tokens: Arc<TokenStore>,
    internal_username: String,
    internal_password: String,
    password_hash: Option<String>,
}

impl AuthService {
    /// Builds an auth service. `password_hash` is the bcrypt hash loaded
    /// from the secrets backend for `registry_auth.type = password`.
    pub fn new(signing_secret: impl Into<Vec<u8>>, tokens: Arc<TokenStore>, password_hash: Option<String>) -> Self {
        AuthService {
            jwt: JwtCodec::new(signing_secret),
            tokens,
            internal_username: "gordon-internal".to_string(),
            internal_password: generate_internal_password(),
            password_hash,
        }
    }

    /// The internal loopback credential minted at startup (for components
    /// running on the same host, e.g. the attachment/backup subprocess).
    pub fn internal_credential(&self) -> (&str, &str) {
        (&self.internal_username, &self.internal_password)
    }

    /// Accepts the internal credential only when `peer` is loopback. Never
    /// consults the `Host` header.
    pub fn check_internal_credential(&self, username: &str, password: &str, peer: SocketAddr) -> bool {
        is_loopback(peer) && username == self.internal_username && password == self.internal_password
    }

    /// Verifies a plaintext password against the configured bcrypt hash.
    /// Runs off the async executor since bcrypt is CPU-bound.
    pub async fn verify_password(&self, password: &str) -> GordonResult<bool> {
        let Some(hash) = self.password_hash.clone() else {
            return Ok(false);
        };
        let password = password.to_string();
        tokio::task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(GordonError::from)?
            .map_err(GordonError::from)
    }

    /// Issues a new token, persisting its record and returning `(jti, jwt)`.
    pub async fn generate(&self, subject: &str, scopes: Vec<Scope>, ttl_secs: i64) -> GordonResult<(Uuid, String)> {
        let jti = Uuid::new_v4();
        let jwt = self.jwt.encode(jti, subject, &scopes, ttl_secs)?;

        let issued_at = chrono::Utc::now().timestamp();
        self.tokens
            .insert(AuthToken {
                id: jti,
                subject: subject.to_string(),
                scopes,
                expires_at: if ttl_secs == 0 { None } else { Some(issued_at + ttl_secs) },
                revoked: false,
                issued_at,
            })
            .await?;

        Ok((jti, jwt))
    }

    /// Verifies signature, expiry, and revocation status, returning the
    /// stored record on success.
    pub async fn validate(&self, token: &str) -> GordonResult<AuthToken> {
        let claims = self.jwt.decode(token)?;
        let record = self
            .tokens
            .get(claims.jti)
            .await
            .ok_or_else(|| GordonError::Unauthorized("unknown token".to_string()))?;

        if record.revoked {
            return Err(GordonError::Unauthorized("token revoked".to_string()));
        }

        Ok(record)
    }

    /// Flips the revoked flag for a single token.
    pub async fn revoke(&self, id: Uuid) -> GordonResult<bool> {
        self.tokens.revoke(id).await
    }

    /// Revokes every known token.
    pub async fn revoke_all(&self) -> GordonResult<()> {
        self.tokens.revoke_all().await
    }

    /// Lists all token records (no JWT material).
    pub async fn list_tokens(&self) -> Vec<AuthToken> {
        self.tokens.list().await
    }

    /// Implements the Docker registry `/v2/token` endpoint's scope
    /// filtering and TTL selection.
    pub async fn registry_token(
        &self,
        subject: Option<&str>,
        requested: &[String],
    ) -> GordonResult<String> {
        let mut scopes: Vec<Scope> = requested
            .iter()
            .filter_map(|raw| raw.parse::<Scope>().ok())
            .filter(|s| s.type_ == ScopeType::Repository)
            .collect();

        if scopes.is_empty() {
            scopes.push(Scope {
                type_: ScopeType::Repository,
                name: "*".to_string(),
                actions: vec!["pull".to_string()],
            });
        }

        let (subject, ttl) = match subject {
            Some(sub) => (sub.to_string(), REGISTRY_TOKEN_TTL_AUTHENTICATED_SECS),
            None => ("anonymous".to_string(), REGISTRY_TOKEN_TTL_ANONYMOUS_SECS),
        };

        let (_, jwt) = self.generate(&subject, scopes, ttl).await?;
        Ok(jwt)
    }
}

fn generate_internal_password() -> String {
    const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
    let mut rng = rand::thread_rng();
    (0..32).map(|_| CHARSET[rng.gen_range(0..CHARSET.len())] as char).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn service() -> AuthService {
        let dir = tempdir().unwrap();
        let tokens = Arc::new(TokenStore::load(dir.path().join("tokens.json")).await.unwrap());
        AuthService::new("test-secret", tokens, None)
    }

    #[tokio::test]
    async fn revoked_token_fails_validate_even_with_valid_signature() {
        let service = service().await;
        let (jti, jwt) = service
            .generate(
                "alice",
                vec![Scope {
                    type_: ScopeType::Admin,
                    name: "*".to_string(),
                    actions: vec!["*".to_string()],
                }],
                0,
            )
            .await
            .unwrap();

        assert!(service.validate(&jwt).await.is_ok());
        service.revoke(jti).await.unwrap();
        assert!(service.validate(&jwt).await.is_err());
    }

    #[tokio::test]
    async fn zero_ttl_token_has_no_expiry() {
        let service = service().await;
        let (_, jwt) = service.generate("bob", vec![], 0).await.unwrap();
        let record = service.validate(&jwt).await.unwrap();
        assert!(record.expires_at.is_none());
    }

    #[tokio::test]
    async fn registry_token_defaults_to_pull_all_when_no_scope_matches() {
        let service = service().await;
        let jwt = service.registry_token(None, &["repository:".to_string()]).await.unwrap();
        let claims = service.jwt.decode(&jwt).unwrap();
        let scopes = JwtCodec::scopes_of(&claims);
        assert_eq!(scopes.len(), 1);
        assert_eq!(scopes[0].name, "*");
        assert_eq!(scopes[0].actions, vec!["pull".to_string()]);
    }

    #[tokio::test]
    async fn internal_credential_rejected_on_non_loopback_peer() {
        let service = service().await;
        let (user, pass) = service.internal_credential();
        let (user, pass) = (user.to_string(), pass.to_string());

        let loopback: SocketAddr = "127.0.0.1:9999".parse().unwrap();
        let remote: SocketAddr = "10.0.0.5:9999".parse().unwrap();

        assert!(service.check_internal_credential(&user, &pass, loopback));
        assert!(!service.check_internal_credential(&user, &pass, remote));
    }
}
