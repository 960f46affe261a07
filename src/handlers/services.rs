//! Endpoints for signed service API callers.

use axum::{Extension, Json};
use serde::Serialize;
use uuid::Uuid;

use crate::{middleware::context::RequestContext, models::user::Principal};

#[derive(Debug, Serialize)]
pub struct WhoAmIResponse {
    pub user: Principal,
    pub ip: String,
    pub request_id: Uuid,
}

/// Echo the API key owner and request metadata back to the caller.
///
/// # Endpoint
///
/// `GET /api/services/whoami?key=<access key>&timestamp=<epoch>`
///
/// Requires the `secret` header (see the access control middleware).
pub async fn whoami(
    Extension(principal): Extension<Principal>,
    Extension(context): Extension<RequestContext>,
) -> Json<WhoAmIResponse> {
    Json(WhoAmIResponse {
        user: principal,
        ip: context.ip,
        request_id: context.request_id,
    })
}
