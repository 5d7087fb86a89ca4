// Stateless bearer tokens and the guard in front of protected actions
//
// Tokens are never revoked. A token stays valid until it expires, even
// after the user disconnects or logs in elsewhere.

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::str::FromStr;

use crate::error::{AuthError, ChatError};
use crate::msgserver::session::SessionContext;

pub const DEFAULT_TOKEN_VALIDITY_HOURS: i64 = 24;

/// JWT claims
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User id, as a string
    pub sub: String,
    /// Display name
    pub name: String,
    pub iat: i64,
    pub exp: i64,
}

impl Claims {
    pub fn user_id(&self) -> Result<i64, AuthError> {
        self.sub.parse().map_err(|_| AuthError::Invalid)
    }
}

/// Issues and verifies tokens with a shared secret
pub struct TokenManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    algorithm: Algorithm,
    validity: Duration,
}

impl TokenManager {
    /// Only the HMAC family is accepted since keys come from a shared secret
    pub fn new(secret: &str, algorithm: &str, validity: Duration) -> Result<Self, AuthError> {
        let algorithm = Algorithm::from_str(algorithm)
            .map_err(|_| AuthError::UnsupportedAlgorithm(algorithm.to_string()))?;
        if !matches!(algorithm, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512) {
            return Err(AuthError::UnsupportedAlgorithm(format!("{:?}", algorithm)));
        }

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            algorithm,
            validity,
        })
    }

    /// HS256 with a 24 hour validity window
    pub fn with_secret(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            algorithm: Algorithm::HS256,
            validity: Duration::hours(DEFAULT_TOKEN_VALIDITY_HOURS),
        }
    }

    pub fn validity(&self) -> Duration {
        self.validity
    }

    /// Mint a token for a freshly authenticated user
    pub fn issue(&self, user_id: i64, name: &str) -> Result<String, ChatError> {
        self.issue_with_validity(user_id, name, self.validity)
    }

    pub fn issue_with_validity(
        &self,
        user_id: i64,
        name: &str,
        validity: Duration,
    ) -> Result<String, ChatError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            name: name.to_string(),
            iat: now.timestamp(),
            exp: (now + validity).timestamp(),
        };

        encode(&Header::new(self.algorithm), &claims, &self.encoding_key)
            .map_err(ChatError::internal)
    }

    /// Check signature and expiry
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let mut validation = Validation::new(self.algorithm);
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp", "sub"]);

        decode::<Claims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid,
            })
    }
}

/// Guard for actions registered with `requires_auth`.
///
/// Reads `token` from the raw request, verifies it and attaches the user id
/// to the session. The caller invokes the handler only on `Ok`.
pub fn authorize(
    tokens: &TokenManager,
    session: &mut SessionContext,
    raw: &Value,
) -> Result<Claims, ChatError> {
    let token = raw
        .get("token")
        .and_then(Value::as_str)
        .filter(|token| !token.is_empty())
        .ok_or(AuthError::MissingToken)?;

    let claims = tokens.verify(token).map_err(|e| {
        tracing::debug!("Session {} presented a bad token: {}", session.id(), e);
        AuthError::Invalid
    })?;
    let user_id = claims.user_id()?;

    session.set_user(user_id);
    Ok(claims)
}

/// Server-side digest of the client's password hash
pub fn digest_password(password_hash: &str) -> String {
    hex::encode(Sha256::digest(password_hash.as_bytes()))
}
