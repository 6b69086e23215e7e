//! Persisted index of issued tokens (`data_dir/tokens.json`). The signed
//! JWT is the wire form; this store only ever holds metadata plus the
//! revocation flag, never JWT material.

use std::{collections::HashMap, path::PathBuf};

use serde::{Deserialize, Serialize};
use tokio::{fs, sync::RwLock};
use uuid::Uuid;

use crate::{auth::scope::Scope, error::GordonResult};

/// A record of an issued [`crate::auth::jwt`] token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthToken {
    /// Unique token id (the JWT's `jti`).
    pub id: Uuid,
    /// The principal this token was issued to.
    pub subject: String,
    /// Scopes granted to this token.
    pub scopes: Vec<Scope>,
    /// Expiry as a unix timestamp; `None` means non-expiring.
    pub expires_at: Option<i64>,
    /// Whether this token has been explicitly revoked.
    pub revoked: bool,
    /// Issue time as a unix timestamp.
    pub issued_at: i64,
}

#[derive(Default, Serialize, Deserialize)]
struct TokenIndex {
    tokens: HashMap<Uuid, AuthToken>,
}

/// The on-disk token index, guarded by a single writer lock (ambient
/// persistence pattern shared with the config and secrets stores).
pub struct TokenStore {
    path: PathBuf,
    index: RwLock<TokenIndex>,
}

impl TokenStore {
    /// Loads (or initializes) the token index at `path`.
    pub async fn load(path: impl Into<PathBuf>) -> GordonResult<Self> {
        let path = path.into();
        let index = match fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(_) => TokenIndex::default(),
        };
        Ok(TokenStore {
            path,
            index: RwLock::new(index),
        })
    }

    async fn persist(&self, index: &TokenIndex) -> GordonResult<()> {
        let bytes = serde_json::to_vec_pretty(index)?;
        let tmp = self.path.with_extension("tmp");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }

    /// Inserts a new token record.
    pub async fn insert(&self, token: AuthToken) -> GordonResult<()> {
        let mut index = self.index.write().await;
        index.tokens.insert(token.id, token);
        self.persist(&index).await
    }

    /// Looks up a token record by id.
    pub async fn get(&self, id: Uuid) -> Option<AuthToken> {
        self.index.read().await.tokens.get(&id).cloned()
    }

    /// Flips the `revoked` flag for a single token.
    pub async fn revoke(&self, id: Uuid) -> GordonResult<bool> {
        let mut index = self.index.write().await;
        let Some(token) = index.tokens.get_mut(&id) else {
            return Ok(false);
        };
        token.revoked = true;
        self.persist(&index).await?;
        Ok(true)
    }

    /// Revokes every known token.
    pub async fn revoke_all(&self) -> GordonResult<()> {
        let mut index = self.index.write().await;
        for token in index.tokens.values_mut() {
            token.revoked = true;
        }
        self.persist(&index).await
    }

    /// Returns every token record (no JWT material).
    pub async fn list(&self) -> Vec<AuthToken> {
        self.index.read().await.tokens.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::scope::ScopeType;
    use tempfile::tempdir;

    fn sample(id: Uuid) -> AuthToken {
        AuthToken {
            id,
            subject: "alice".to_string(),
            scopes: vec![Scope {
                type_: ScopeType::Admin,
                name: "*".to_string(),
                actions: vec!["*".to_string()],
            }],
            expires_at: None,
            revoked: false,
            issued_at: 0,
        }
    }

    #[tokio::test]
    async fn revoked_token_is_reflected_in_lookup() {
        let dir = tempdir().unwrap();
        let store = TokenStore::load(dir.path().join("tokens.json")).await.unwrap();
        let id = Uuid::new_v4();
        store.insert(sample(id)).await.unwrap();

        assert!(!store.get(id).await.unwrap().revoked);
        assert!(store.revoke(id).await.unwrap());
        assert!(store.get(id).await.unwrap().revoked);
    }

    #[tokio::test]
    async fn revoking_unknown_id_returns_false() {
        let dir = tempdir().unwrap();
        let store = TokenStore::load(dir.path().join("tokens.json")).await.unwrap();
        assert!(!store.revoke(Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn persists_across_reload() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("tokens.json");
        let id = Uuid::new_v4();
        {
            let store = TokenStore::load(&path).await.unwrap();
            store.insert(sample(id)).await.unwrap();
        }
        let reloaded = TokenStore::load(&path).await.unwrap();
        assert!(reloaded.get(id).await.is_some());
    }
}
