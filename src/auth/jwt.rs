//! HS256 JWT issuance and validation for the admin API.

use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    auth::scope::{format_scopes, parse_scopes, Scope},
    error::{GordonError, GordonResult},
};

/// JWT claims. `exp` is omitted from the token entirely when the token is
/// non-expiring (`exp = 0` in the token-generation request).
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (principal the token was issued to).
    pub sub: String,
    /// Space-joined scope strings.
    pub scopes: String,
    /// Issued-at, unix seconds.
    pub iat: i64,
    /// Expiry, unix seconds. Absent means non-expiring.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    /// The token id, matching a [`crate::auth::token_store::AuthToken::id`].
    pub jti: Uuid,
}

/// Signs and verifies JWTs with a single HS256 secret.
pub struct JwtCodec {
    secret: Vec<u8>,
}

impl JwtCodec {
    /// Creates a codec using `secret` as the HMAC key.
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        JwtCodec {
            secret: secret.into(),
        }
    }

    /// Encodes a signed JWT for `(subject, scopes)`, expiring `ttl_secs`
    /// seconds from now. `ttl_secs == 0` produces a non-expiring token.
    pub fn encode(
        &self,
        jti: Uuid,
        subject: &str,
        scopes: &[Scope],
        ttl_secs: i64,
    ) -> GordonResult<String> {
        let iat = chrono::Utc::now().timestamp();
        let exp = if ttl_secs == 0 {
            None
        } else {
            Some(iat + ttl_secs)
        };

        let claims = Claims {
            sub: subject.to_string(),
            scopes: format_scopes(scopes),
            iat,
            exp,
            jti,
        };

        let mut validation_free_header = Header::default();
        validation_free_header.alg = jsonwebtoken::Algorithm::HS256;

        encode(
            &validation_free_header,
            &claims,
            &EncodingKey::from_secret(&self.secret),
        )
        .map_err(GordonError::from)
    }

    /// Decodes and signature-verifies `token`, without consulting the
    /// revocation store (callers must separately check `jti` against the
    /// [`crate::auth::token_store::TokenStore`]).
    pub fn decode(&self, token: &str) -> GordonResult<Claims> {
        let mut validation = Validation::new(jsonwebtoken::Algorithm::HS256);
        // `exp` is optional on non-expiring tokens; jsonwebtoken requires
        // explicitly opting out of mandatory expiry validation.
        validation.required_spec_claims.remove("exp");
        validation.validate_exp = true;

        let data = decode::<Claims>(token, &DecodingKey::from_secret(&self.secret), &validation)
            .map_err(GordonError::from)?;
        Ok(data.claims)
    }

    /// Parses the scopes carried by already-decoded `claims`.
    pub fn scopes_of(claims: &Claims) -> Vec<Scope> {
        parse_scopes(&claims.scopes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::scope::ScopeType;

    fn admin_scope() -> Scope {
        Scope {
            type_: ScopeType::Admin,
            name: "*".to_string(),
            actions: vec!["*".to_string()],
        }
    }

    #[test]
    fn non_expiring_token_has_no_exp_claim_and_decodes() {
        let codec = JwtCodec::new("secret");
        let jti = Uuid::new_v4();
        let jwt = codec.encode(jti, "alice", &[admin_scope()], 0).unwrap();
        let claims = codec.decode(&jwt).unwrap();
        assert!(claims.exp.is_none());
        assert_eq!(claims.jti, jti);
    }

    #[test]
    fn expiring_token_round_trips() {
        let codec = JwtCodec::new("secret");
        let jti = Uuid::new_v4();
        let jwt = codec.encode(jti, "bob", &[admin_scope()], 300).unwrap();
        let claims = codec.decode(&jwt).unwrap();
        assert!(claims.exp.is_some());
        assert_eq!(JwtCodec::scopes_of(&claims), vec![admin_scope()]);
    }

    #[test]
    fn wrong_secret_fails_to_decode() {
        let codec = JwtCodec::new("secret");
        let other = JwtCodec::new("other-secret");
        let jwt = codec.encode(Uuid::new_v4(), "eve", &[admin_scope()], 0).unwrap();
        assert!(other.decode(&jwt).is_err());
    }
}
