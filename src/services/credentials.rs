//! Credential lookups for the service API scheme.

use async_trait::async_trait;

use crate::{
    db::DbPool,
    models::{api_key::ApiKeyRecord, user::UserRecord},
};

/// Read-only access to API keys and the users that own them.
///
/// Implementations must be safe to call from many requests at once.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Find an active API key by its access key string.
    async fn find_api_key(&self, access_key: &str) -> Result<Option<ApiKeyRecord>, sqlx::Error>;

    async fn find_user(&self, user_id: i64) -> Result<Option<UserRecord>, sqlx::Error>;
}

/// PostgreSQL-backed credential store sharing the application pool.
#[derive(Debug, Clone)]
pub struct PgCredentialStore {
    pool: DbPool,
}

impl PgCredentialStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CredentialStore for PgCredentialStore {
    async fn find_api_key(&self, access_key: &str) -> Result<Option<ApiKeyRecord>, sqlx::Error> {
        sqlx::query_as::<_, ApiKeyRecord>(
            "SELECT id, access_key, secret_key, user_id, is_active, created_at
             FROM api_keys
             WHERE access_key = $1 AND is_active = true",
        )
        .bind(access_key)
        .fetch_optional(&self.pool)
        .await
    }

    async fn find_user(&self, user_id: i64) -> Result<Option<UserRecord>, sqlx::Error> {
        sqlx::query_as::<_, UserRecord>(
            "SELECT id, email, name, phone_number, profile_img, sns_type, is_admin, created_at
             FROM users
             WHERE id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
    }
}

#[cfg(test)]
pub use test_support::MemoryCredentialStore;

#[cfg(test)]
mod test_support {
    use std::collections::HashMap;

    use chrono::Utc;

    use super::*;

    /// In-memory store; `unavailable` makes every lookup fail like a dead pool.
    #[derive(Debug, Default)]
    pub struct MemoryCredentialStore {
        pub keys: HashMap<String, ApiKeyRecord>,
        pub users: HashMap<i64, UserRecord>,
        pub unavailable: bool,
    }

    impl MemoryCredentialStore {
        pub fn with_key(mut self, access_key: &str, secret_key: &str, user_id: i64) -> Self {
            self.keys.insert(
                access_key.to_string(),
                ApiKeyRecord {
                    id: self.keys.len() as i64 + 1,
                    access_key: access_key.to_string(),
                    secret_key: secret_key.to_string(),
                    user_id,
                    is_active: true,
                    created_at: Utc::now(),
                },
            );
            self
        }

        pub fn with_user(mut self, id: i64, email: &str) -> Self {
            self.users.insert(
                id,
                UserRecord {
                    id,
                    email: Some(email.to_string()),
                    name: Some(format!("user-{id}")),
                    phone_number: None,
                    profile_img: None,
                    sns_type: Some("email".into()),
                    is_admin: false,
                    created_at: Utc::now(),
                },
            );
            self
        }
    }

    #[async_trait]
    impl CredentialStore for MemoryCredentialStore {
        async fn find_api_key(
            &self,
            access_key: &str,
        ) -> Result<Option<ApiKeyRecord>, sqlx::Error> {
            if self.unavailable {
                return Err(sqlx::Error::PoolTimedOut);
            }
            Ok(self.keys.get(access_key).filter(|k| k.is_active).cloned())
        }

        async fn find_user(&self, user_id: i64) -> Result<Option<UserRecord>, sqlx::Error> {
            if self.unavailable {
                return Err(sqlx::Error::PoolTimedOut);
            }
            Ok(self.users.get(&user_id).cloned())
        }
    }
}
