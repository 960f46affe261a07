//! Endpoints for bearer-token callers.

use axum::{Extension, Json};

use crate::models::user::Principal;

/// Return the principal decoded from the caller's token.
///
/// # Endpoint
///
/// `GET /api/users/me`
pub async fn me(Extension(principal): Extension<Principal>) -> Json<Principal> {
    Json(principal)
}
