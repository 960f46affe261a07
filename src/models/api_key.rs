//! API key model for the signed service scheme.
//!
//! Service clients sign their query string with the secret half of a key
//! pair and identify themselves with the access half. Keys are provisioned
//! elsewhere; this service only reads them.

use chrono::{DateTime, Utc};

/// Represents an API key record from the database.
///
/// # Database Table
///
/// Maps to the `api_keys` table with columns:
/// - `id`: Unique identifier
/// - `access_key`: Public key string sent as the `key` query parameter
/// - `secret_key`: HMAC secret used to sign the query string
/// - `user_id`: Owning user (a reference, the user row lives in `users`)
/// - `is_active`: Whether the key is currently valid
/// - `created_at`: When the key was created
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ApiKeyRecord {
    pub id: i64,

    /// Lookup key supplied by the caller
    pub access_key: String,

    /// Secret material the caller's `secret` header is checked against
    pub secret_key: String,

    pub user_id: i64,

    /// Inactive keys are never returned by lookups. This provides a way to revoke access without deleting the record.
    pub is_active: bool,

    pub created_at: DateTime<Utc>,
}
