use crate::{entities::customer, errors::ServiceError, AppState};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use uuid::Uuid;

/// JWT claims for a storefront customer session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Customer id
    pub sub: Uuid,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and validates customer bearer tokens.
pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_lifetime: Duration,
}

impl AuthService {
    pub fn new(jwt_secret: &str, token_lifetime: Duration) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            token_lifetime,
        }
    }

    pub fn issue_token(&self, customer: &customer::Model) -> Result<String, ServiceError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: customer.id,
            email: customer.email.clone(),
            iat: now,
            exp: now + self.token_lifetime.as_secs() as i64,
        };
        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::AuthError(format!("failed to sign token: {}", e)))
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims, ServiceError> {
        decode::<Claims>(token, &self.decoding_key, &Validation::default())
            .map(|data| data.claims)
            .map_err(|_| ServiceError::AuthError("invalid or expired token".to_string()))
    }
}

/// Password hash formats accepted at login. New hashes are always Argon2id;
/// the legacy scheme survives only for verification of accounts created
/// before the migration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordScheme {
    Argon2,
    LegacySha256,
}

impl PasswordScheme {
    /// Detects the scheme from the stored hash's format marker.
    pub fn detect(stored: &str) -> Option<Self> {
        if stored.starts_with("$argon2") {
            Some(PasswordScheme::Argon2)
        } else if stored.len() == 64 && stored.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(PasswordScheme::LegacySha256)
        } else {
            None
        }
    }
}

/// Result of verifying a password against a stored hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordMatch {
    pub valid: bool,
    /// True when the stored hash uses a legacy scheme and should be replaced
    /// with a current-scheme hash on successful login.
    pub needs_rehash: bool,
}

/// Hashes a password with the current scheme (Argon2id, PHC format).
pub fn hash_password(password: &str) -> Result<String, ServiceError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ServiceError::InternalError(format!("password hashing failed: {}", e)))
}

/// Verifies a password against a stored hash of any supported scheme.
pub fn verify_password(password: &str, stored: &str) -> Result<PasswordMatch, ServiceError> {
    match PasswordScheme::detect(stored) {
        Some(PasswordScheme::Argon2) => {
            let parsed = PasswordHash::new(stored).map_err(|e| {
                ServiceError::InternalError(format!("stored hash is malformed: {}", e))
            })?;
            let valid = Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok();
            Ok(PasswordMatch {
                valid,
                needs_rehash: false,
            })
        }
        Some(PasswordScheme::LegacySha256) => {
            let digest = hex::encode(Sha256::digest(password.as_bytes()));
            let valid = constant_time_eq(&digest, stored);
            Ok(PasswordMatch {
                valid,
                needs_rehash: valid,
            })
        }
        None => Ok(PasswordMatch {
            valid: false,
            needs_rehash: false,
        }),
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}

/// Extractor for routes that require a logged-in customer.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub customer_id: Uuid,
    pub email: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = AppState::from_ref(state);

        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| ServiceError::AuthError("missing bearer token".to_string()))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| ServiceError::AuthError("missing bearer token".to_string()))?
            .trim();

        let claims = state.services.auth.validate_token(token)?;

        Ok(AuthenticatedUser {
            customer_id: claims.sub,
            email: claims.email,
        })
    }
}

/// Extractor for routes that accept both guests and logged-in customers
/// (checkout supports guest orders). A present-but-invalid token is still
/// rejected rather than silently downgraded to a guest.
#[derive(Debug, Clone)]
pub struct MaybeAuthenticatedUser(pub Option<AuthenticatedUser>);

#[async_trait]
impl<S> FromRequestParts<S> for MaybeAuthenticatedUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        if parts.headers.get(header::AUTHORIZATION).is_none() {
            return Ok(MaybeAuthenticatedUser(None));
        }
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        Ok(MaybeAuthenticatedUser(Some(user)))
    }
}
