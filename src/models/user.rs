//! User row and the authenticated principal derived from it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Represents a user record from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserRecord {
    pub id: i64,
    pub email: Option<String>,
    pub name: Option<String>,
    pub phone_number: Option<String>,
    pub profile_img: Option<String>,
    pub sns_type: Option<String>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

/// Authenticated identity attached to a request.
///
/// Built either from a decoded bearer token or from the user that owns a
/// service API key. Inserted into the request's extension map by the access
/// control layer; handlers extract it with `Extension<Principal>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub id: i64,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub profile_img: Option<String>,
    #[serde(default)]
    pub sns_type: Option<String>,
    #[serde(default)]
    pub is_admin: bool,
}

impl From<UserRecord> for Principal {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            email: user.email,
            name: user.name,
            phone_number: user.phone_number,
            profile_img: user.profile_img,
            sns_type: user.sns_type,
            is_admin: user.is_admin,
        }
    }
}

impl Principal {
    /// Email with the local part mostly hidden, for log output.
    ///
    /// `alice@example.com` becomes `al***@example.com`.
    pub fn masked_email(&self) -> Option<String> {
        let email = self.email.as_deref()?;
        let (local, domain) = email.split_once('@')?;
        let visible: String = local.chars().take(2).collect();
        Some(format!("{visible}***@{domain}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn principal_from_user_row_keeps_identity_fields() {
        let user = UserRecord {
            id: 42,
            email: Some("owner@example.com".into()),
            name: Some("Owner".into()),
            phone_number: None,
            profile_img: None,
            sns_type: Some("email".into()),
            is_admin: true,
            created_at: Utc::now(),
        };

        let principal = Principal::from(user);
        assert_eq!(principal.id, 42);
        assert_eq!(principal.name.as_deref(), Some("Owner"));
        assert!(principal.is_admin);
    }

    #[test]
    fn missing_optional_claims_default() {
        let principal: Principal = serde_json::from_str(r#"{"id": 3}"#).unwrap();
        assert_eq!(principal.id, 3);
        assert_eq!(principal.email, None);
        assert!(!principal.is_admin);
    }

    #[test]
    fn masked_email_hides_local_part() {
        let principal: Principal =
            serde_json::from_str(r#"{"id": 1, "email": "alice@example.com"}"#).unwrap();
        assert_eq!(principal.masked_email().as_deref(), Some("al***@example.com"));

        let no_email: Principal = serde_json::from_str(r#"{"id": 1}"#).unwrap();
        assert_eq!(no_email.masked_email(), None);
    }
}
