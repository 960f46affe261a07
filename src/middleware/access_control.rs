//! Access control middleware.
//!
//! This middleware intercepts every request to:
//! 1. Record arrival time, caller IP and request id
//! 2. Classify the path (exempt, service API, token API, or passthrough)
//! 3. Run the credential scheme the path requires
//! 4. Inject the resolved `Principal` into the request, or reject it with an error envelope
//! 5. Emit exactly one audit record for the request, whatever happened
//!
//! # Credential Schemes
//!
//! - **Signed query** (`/api/services/...`): `?key=<access key>&timestamp=<epoch>`
//!   plus a `secret` header holding the base64 HMAC-SHA256 of the raw query
//!   string, keyed by the API key's secret. The timestamp must fall inside
//!   the replay window around server time.
//! - **Access key** (`/api/services/...` in debug mode): the access key alone,
//!   sent in the `Authorization` header.
//! - **Bearer token** (`/api/...`, `/auth/...`): a JWT in the `Authorization`
//!   header or, failing that, in the `Authorization` cookie.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::{IntoResponse, Response},
};
use url::form_urlencoded;

use crate::{
    config::AccessPolicy,
    error::ApiError,
    middleware::{
        audit::{AuditGuard, AuditSink, Outcome},
        context::RequestContext,
    },
    models::{api_key::ApiKeyRecord, user::Principal},
    services::{clock::Clock, credentials::CredentialStore, signature, token::TokenCodec},
};

/// How a protected path proves who is calling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    SignedQuery,
    AccessKey,
    BearerToken,
}

/// Path prefix → credential scheme. First match wins.
const SCHEMES: &[(&str, Scheme)] = &[
    ("/api/services", Scheme::SignedQuery),
    ("/api", Scheme::BearerToken),
    ("/auth", Scheme::BearerToken),
];

/// Classification of a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Literal exempt path: no validation, no audit.
    Exempt,
    /// Matches the exempt pattern: no validation, audited.
    ExemptPattern,
    Protected(Scheme),
    /// Page or static content: no principal required.
    Passthrough,
}

/// Credential material pulled out of a request before any lookups run.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub raw_query: Option<String>,
    pub authorization: Option<String>,
    pub authorization_cookie: Option<String>,
    pub secret: Option<String>,
}

impl Credentials {
    pub fn from_request(request: &Request) -> Self {
        let headers = request.headers();
        Self {
            raw_query: request.uri().query().map(str::to_string),
            authorization: header_value(headers, "authorization"),
            authorization_cookie: cookie_value(headers, "Authorization"),
            secret: header_value(headers, "secret"),
        }
    }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(axum::http::header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|raw| raw.split(';'))
        .filter_map(|cookie| cookie.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| unquote(value).to_string())
}

/// Strip the double quotes servers put around cookie values containing spaces.
fn unquote(value: &str) -> &str {
    value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value)
}

/// Shared state of the access control layer.
///
/// Everything here is read-only after startup; clones share the same
/// configuration, codec, store and sink.
#[derive(Clone)]
pub struct AccessControl {
    policy: Arc<AccessPolicy>,
    tokens: Arc<TokenCodec>,
    credentials: Arc<dyn CredentialStore>,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditSink>,
}

impl AccessControl {
    pub fn new(
        policy: AccessPolicy,
        tokens: TokenCodec,
        credentials: Arc<dyn CredentialStore>,
        clock: Arc<dyn Clock>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            policy: Arc::new(policy),
            tokens: Arc::new(tokens),
            credentials,
            clock,
            audit,
        }
    }

    pub fn route(&self, path: &str) -> Route {
        if self.policy.except_paths.iter().any(|p| p == path) {
            return Route::Exempt;
        }
        if self.policy.matches_except_pattern(path) {
            return Route::ExemptPattern;
        }
        SCHEMES
            .iter()
            .find(|(prefix, _)| has_prefix(path, prefix))
            .map(|&(_, scheme)| match scheme {
                Scheme::SignedQuery if self.policy.debug => Route::Protected(Scheme::AccessKey),
                scheme => Route::Protected(scheme),
            })
            .unwrap_or(Route::Passthrough)
    }

    pub async fn authenticate(
        &self,
        scheme: Scheme,
        credentials: &Credentials,
    ) -> Result<Principal, ApiError> {
        match scheme {
            Scheme::SignedQuery => self.signed_query(credentials).await,
            Scheme::AccessKey => self.access_key(credentials).await,
            Scheme::BearerToken => self.bearer_token(credentials),
        }
    }

    async fn signed_query(&self, credentials: &Credentials) -> Result<Principal, ApiError> {
        let raw_query = credentials.raw_query.as_deref().unwrap_or_default();
        let (access_key, timestamp) = parse_service_query(raw_query)?;
        let provided = credentials
            .secret
            .as_deref()
            .ok_or(ApiError::ApiHeaderInvalid)?;

        let (key, user) = self.resolve_owner(&access_key).await?;

        let timestamp: i64 = timestamp.parse().map_err(|_| {
            ApiError::ApiQueryString(format!("timestamp {timestamp:?} is not an integer"))
        })?;
        let now = self.clock.timestamp(self.policy.timezone_hour_diff);
        let window = self.policy.timestamp_window_secs;
        if !(now - window < timestamp && timestamp < now + window) {
            return Err(ApiError::ApiTimestamp);
        }

        if !signature::verify_query(raw_query, &key.secret_key, provided) {
            return Err(ApiError::ApiHeaderInvalid);
        }

        Ok(user)
    }

    async fn access_key(&self, credentials: &Credentials) -> Result<Principal, ApiError> {
        let raw = credentials
            .authorization
            .as_deref()
            .ok_or(ApiError::NotAuthorized)?;
        let access_key = raw.strip_prefix("Bearer ").unwrap_or(raw);
        let (_, user) = self.resolve_owner(access_key).await?;
        Ok(user)
    }

    fn bearer_token(&self, credentials: &Credentials) -> Result<Principal, ApiError> {
        let token = credentials
            .authorization
            .as_deref()
            .or(credentials.authorization_cookie.as_deref())
            .ok_or(ApiError::NotAuthorized)?;
        Ok(self.tokens.decode(token)?.principal)
    }

    /// Look up an API key and the user that owns it.
    async fn resolve_owner(
        &self,
        access_key: &str,
    ) -> Result<(ApiKeyRecord, Principal), ApiError> {
        let key = self
            .credentials
            .find_api_key(access_key)
            .await?
            .ok_or_else(|| ApiError::NotFoundAccessKey {
                access_key: access_key.to_string(),
            })?;
        let user = self
            .credentials
            .find_user(key.user_id)
            .await?
            .ok_or(ApiError::NotFoundUser {
                user_id: key.user_id,
            })?;
        Ok((key, user.into()))
    }
}

/// `/api` matches `/api` and `/api/...` but not `/apiary`.
fn has_prefix(path: &str, prefix: &str) -> bool {
    path.strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with('/'))
}

/// Extract `key` and `timestamp` from a service query string.
///
/// Every `&`-separated segment must contain `=`. Values are percent-decoded;
/// when a name repeats, its first occurrence wins.
pub fn parse_service_query(raw_query: &str) -> Result<(String, String), ApiError> {
    if raw_query.is_empty() {
        return Err(ApiError::ApiQueryString(
            "query string with 'key' and 'timestamp' is required".into(),
        ));
    }
    if raw_query.split('&').any(|segment| !segment.contains('=')) {
        return Err(ApiError::ApiQueryString("malformed query string".into()));
    }

    let mut key = None;
    let mut timestamp = None;
    for (name, value) in form_urlencoded::parse(raw_query.as_bytes()) {
        match name.as_ref() {
            "key" if key.is_none() => key = Some(value.into_owned()),
            "timestamp" if timestamp.is_none() => timestamp = Some(value.into_owned()),
            _ => {}
        }
    }

    match (key, timestamp) {
        (Some(key), Some(timestamp)) => Ok((key, timestamp)),
        _ => Err(ApiError::ApiQueryString(
            "query string must contain 'key' and 'timestamp'".into(),
        )),
    }
}

/// Access control middleware function.
///
/// # Flow
///
/// 1. Build the `RequestContext` (arrival time, IP, no principal yet)
/// 2. Literal exempt paths go straight to the handler, unaudited
/// 3. Start the audit guard for everything else
/// 4. Protected paths run their credential scheme; failures are rejected here
/// 5. Inject `Principal` and `RequestContext`, call the next handler
/// 6. Finish the audit record with the handler's status (and `ApiError`, if any)
///
/// # Returns
///
/// The handler's response, or the `ApiError` envelope of the rejection.
pub async fn access_control(
    State(gate): State<AccessControl>,
    mut request: Request,
    next: Next,
) -> Response {
    let mut context = RequestContext::begin(&request, gate.clock.as_ref());
    let route = gate.route(request.uri().path());

    if route == Route::Exempt {
        request.extensions_mut().insert(context);
        return next.run(request).await;
    }

    let service = matches!(
        route,
        Route::Protected(Scheme::SignedQuery | Scheme::AccessKey)
    );
    let mut audit = AuditGuard::begin(
        gate.audit.clone(),
        &request,
        &context,
        gate.clock.local_now(gate.policy.timezone_hour_diff),
        gate.policy.audit_all_requests || route == Route::ExemptPattern,
        service,
    );

    if let Route::Protected(scheme) = route {
        let credentials = Credentials::from_request(&request);
        match gate.authenticate(scheme, &credentials).await {
            Ok(principal) => {
                audit.set_principal(&principal);
                request.extensions_mut().insert(principal.clone());
                context.principal = Some(principal);
            }
            Err(error) => {
                tracing::debug!(
                    path = %request.uri().path(),
                    kind = error.kind(),
                    "request rejected"
                );
                audit.rejected(&error);
                return error.into_response();
            }
        }
    }

    request.extensions_mut().insert(context);
    let response = next.run(request).await;

    let outcome = if route == Route::ExemptPattern {
        Outcome::Exempt
    } else {
        Outcome::Forwarded
    };
    audit.forwarded(
        outcome,
        response.status(),
        response.extensions().get::<ApiError>(),
    );
    response
}
