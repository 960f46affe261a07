//! Error types and HTTP error response handling.
//!
//! Every rejection produced by the access control layer is one of the
//! [`ApiError`] kinds below. Each kind carries its HTTP status, a human
//! message, a detail string and a machine-readable code, and is rendered to
//! the client as an [`ErrorEnvelope`].

use std::{any::Any, error::Error as StdError};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

/// Application-wide error type.
///
/// # Error Categories
///
/// - **Credential Errors**: missing or invalid bearer tokens and API headers (401)
/// - **Request Errors**: malformed service query strings or stale timestamps (400)
/// - **Lookup Errors**: unknown access keys or owning users (404)
/// - **Backend Errors**: database connectivity (503) and everything else (500)
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    /// No credential was presented at all.
    #[error("Not authorized")]
    NotAuthorized,

    /// The bearer token was valid but its `exp` claim is in the past.
    #[error("Token expired")]
    TokenExpired,

    /// The bearer token is malformed or its signature does not verify.
    #[error("Token could not be decoded")]
    TokenDecode,

    /// The `secret` header is missing or does not match the query signature.
    #[error("Invalid API header")]
    ApiHeaderInvalid,

    /// The service query string is missing `key`/`timestamp` or cannot be parsed.
    ///
    /// The String explains which part was rejected.
    #[error("Invalid API query string")]
    ApiQueryString(String),

    /// The service timestamp lies outside the replay window.
    #[error("Invalid API timestamp")]
    ApiTimestamp,

    /// The access key resolved, but its owning user does not exist.
    #[error("User not found")]
    NotFoundUser { user_id: i64 },

    /// No active API key matches the supplied access key.
    #[error("Access key not found")]
    NotFoundAccessKey { access_key: String },

    /// The credential store could not be reached.
    #[error("Database unavailable")]
    SqlFailure,

    /// Catch-all for anything that is not one of the kinds above.
    #[error("Internal server error")]
    Internal(String),
}

/// JSON body returned for every rejected request.
///
/// ```json
/// {
///   "status": 401,
///   "msg": "Token expired",
///   "detail": "Token has expired. Please log in again.",
///   "code": "4010002"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorEnvelope {
    pub status: u16,
    pub msg: String,
    pub detail: String,
    pub code: String,
}

impl ApiError {
    /// HTTP status mirrored in both the status line and the envelope.
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::NotAuthorized
            | ApiError::TokenExpired
            | ApiError::TokenDecode
            | ApiError::ApiHeaderInvalid => StatusCode::UNAUTHORIZED,
            ApiError::ApiQueryString(_) | ApiError::ApiTimestamp => StatusCode::BAD_REQUEST,
            ApiError::NotFoundUser { .. } | ApiError::NotFoundAccessKey { .. } => {
                StatusCode::NOT_FOUND
            }
            ApiError::SqlFailure => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable code: the status followed by a per-status sequence number.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::NotAuthorized => "4010001",
            ApiError::TokenExpired => "4010002",
            ApiError::TokenDecode => "4010003",
            ApiError::ApiHeaderInvalid => "4010004",
            ApiError::ApiQueryString(_) => "4000001",
            ApiError::ApiTimestamp => "4000002",
            ApiError::NotFoundUser { .. } => "4040001",
            ApiError::NotFoundAccessKey { .. } => "4040002",
            ApiError::Internal(_) => "5000000",
            ApiError::SqlFailure => "5030001",
        }
    }

    /// Stable name of the error kind, used in audit records.
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::NotAuthorized => "NotAuthorized",
            ApiError::TokenExpired => "TokenExpiredEx",
            ApiError::TokenDecode => "TokenDecodeEx",
            ApiError::ApiHeaderInvalid => "APIHeaderInvalidEx",
            ApiError::ApiQueryString(_) => "APIQueryStringEx",
            ApiError::ApiTimestamp => "APITimestampEx",
            ApiError::NotFoundUser { .. } => "NotFoundUserEx",
            ApiError::NotFoundAccessKey { .. } => "NotFoundAccessKeyEx",
            ApiError::SqlFailure => "SqlFailureEx",
            ApiError::Internal(_) => "APIException",
        }
    }

    pub fn detail(&self) -> String {
        match self {
            ApiError::NotAuthorized => "Authorization required".to_string(),
            ApiError::TokenExpired => "Token has expired. Please log in again.".to_string(),
            ApiError::TokenDecode => "Token has been compromised.".to_string(),
            ApiError::ApiHeaderInvalid => "Invalid or missing 'secret' header".to_string(),
            ApiError::ApiQueryString(reason) => reason.clone(),
            ApiError::ApiTimestamp => {
                "Query string timestamp is outside the acceptable window".to_string()
            }
            ApiError::NotFoundUser { user_id } => format!("Not found user ID: {user_id}"),
            ApiError::NotFoundAccessKey { access_key } => {
                format!("Not found such API access key: {access_key}")
            }
            ApiError::SqlFailure => "Could not connect to the database".to_string(),
            ApiError::Internal(detail) => detail.clone(),
        }
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            status: self.status().as_u16(),
            msg: self.to_string(),
            detail: self.detail(),
            code: self.code().to_string(),
        }
    }

    /// Map any error into one of the API error kinds.
    ///
    /// # Rules
    ///
    /// 1. An `ApiError` anywhere in the source chain passes through unchanged
    /// 2. A `sqlx::Error` caused by connectivity becomes `SqlFailure`
    /// 3. Anything else becomes `Internal` with the error's text as detail
    ///
    /// Never fails.
    pub fn classify(error: &(dyn StdError + 'static)) -> ApiError {
        let mut current: Option<&(dyn StdError + 'static)> = Some(error);
        while let Some(err) = current {
            if let Some(api_error) = err.downcast_ref::<ApiError>() {
                return api_error.clone();
            }
            if let Some(db_error) = err.downcast_ref::<sqlx::Error>() {
                if is_connectivity_error(db_error) {
                    tracing::error!(error = %db_error, "credential store unavailable");
                    return ApiError::SqlFailure;
                }
                break;
            }
            current = err.source();
        }
        ApiError::Internal(error.to_string())
    }
}

/// Errors that mean the database could not be reached, as opposed to a bad query.
fn is_connectivity_error(error: &sqlx::Error) -> bool {
    matches!(
        error,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::Configuration(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

impl From<sqlx::Error> for ApiError {
    fn from(error: sqlx::Error) -> Self {
        ApiError::classify(&error)
    }
}

/// Convert ApiError into an HTTP response.
///
/// The error itself is also stored in the response extensions so outer
/// layers (the audit logger) can report which kind was returned, even when a
/// route handler produced it.
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(self.envelope());
        let mut response = (status, body).into_response();
        response.extensions_mut().insert(self);
        response
    }
}

/// Turn a panic caught below the access control layer into an error envelope.
///
/// Used with `tower_http::catch_panic::CatchPanicLayer::custom`.
pub fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "handler panicked".to_string()
    };
    tracing::error!(%detail, "handler panicked");
    ApiError::Internal(detail).into_response()
}
