//! Bearer token decoding.
//!
//! Tokens are JWTs signed with one process-wide HMAC secret. The codec is
//! built once at startup and shared read-only by every request.

use std::str::FromStr;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, errors::ErrorKind};
use serde::{Deserialize, Serialize};

use crate::{error::ApiError, models::user::Principal};

/// Claims carried by a bearer token: the principal fields plus expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    #[serde(flatten)]
    pub principal: Principal,

    /// Seconds since the epoch. Tokens without `exp` never expire.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

/// Verifies token signatures and expiry with a fixed secret and algorithm.
#[derive(Clone)]
pub struct TokenCodec {
    key: DecodingKey,
    validation: Validation,
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithms", &self.validation.algorithms)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Build a codec for an HMAC algorithm name such as `HS256`.
    ///
    /// # Errors
    ///
    /// Returns an error if the algorithm name is unknown or is not in the
    /// HMAC family (only a shared secret is configured).
    pub fn new(secret: &str, algorithm: &str) -> anyhow::Result<Self> {
        let algorithm = Algorithm::from_str(algorithm)
            .map_err(|e| anyhow::anyhow!("unknown JWT algorithm {algorithm:?}: {e}"))?;
        if !matches!(
            algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            anyhow::bail!("JWT algorithm {algorithm:?} needs a key pair; only HS256/HS384/HS512 are supported");
        }

        let mut validation = Validation::new(algorithm);
        validation.leeway = 0;
        validation.validate_aud = false;
        validation.required_spec_claims.clear();

        Ok(Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        })
    }

    /// Decode a token, accepting an optional `Bearer ` prefix.
    ///
    /// # Errors
    ///
    /// - `ApiError::TokenExpired` if the signature is valid but `exp` has passed
    /// - `ApiError::TokenDecode` for anything else (bad shape, bad signature, bad claims)
    pub fn decode(&self, raw: &str) -> Result<TokenClaims, ApiError> {
        let token = raw.strip_prefix("Bearer ").unwrap_or(raw).trim();

        decode::<TokenClaims>(token, &self.key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => ApiError::TokenExpired,
                _ => {
                    tracing::debug!(error = %e, "bearer token rejected");
                    ApiError::TokenDecode
                }
            })
    }
}
