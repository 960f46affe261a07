//! Host header allow-list.
//!
//! Requests whose `Host` header names a host outside the configured list are
//! answered with `400 Invalid host header` before routing. Entries are exact
//! host names, `*.domain` wildcards matching any subdomain, or `*` for any
//! host. An empty list allows every host.

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{StatusCode, header::HOST},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Paths answered regardless of the `Host` header.
const EXCEPT_PATHS: &[&str] = &["/health"];

#[derive(Debug, Clone, Default)]
pub struct TrustedHosts {
    hosts: Arc<Vec<String>>,
}

impl TrustedHosts {
    pub fn new(hosts: Vec<String>) -> Self {
        Self {
            hosts: Arc::new(hosts),
        }
    }

    pub fn allows(&self, host: &str) -> bool {
        if self.hosts.is_empty() {
            return true;
        }
        // Port is not part of the comparison
        let host = host.split(':').next().unwrap_or_default();
        self.hosts.iter().any(|pattern| match pattern.strip_prefix('*') {
            Some("") => true,
            Some(suffix) => suffix.starts_with('.') && host.ends_with(suffix),
            None => pattern == host,
        })
    }
}

pub async fn trusted_hosts(
    State(trusted): State<TrustedHosts>,
    request: Request,
    next: Next,
) -> Response {
    if EXCEPT_PATHS.contains(&request.uri().path()) {
        return next.run(request).await;
    }

    let host = request
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if !trusted.allows(host) {
        tracing::warn!(host, path = %request.uri().path(), "untrusted host rejected");
        return (StatusCode::BAD_REQUEST, "Invalid host header").into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use axum::{
        Router,
        body::{Body, to_bytes},
        middleware,
        routing::get,
    };
    use tower::ServiceExt;

    use super::*;

    fn app(hosts: &[&str]) -> Router {
        let trusted = TrustedHosts::new(hosts.iter().map(|h| h.to_string()).collect());
        Router::new()
            .route("/health", get(|| async { "ok" }))
            .route("/api/users/me", get(|| async { "me" }))
            .layer(middleware::from_fn_with_state(trusted, trusted_hosts))
    }

    async fn status_for(app: &Router, path: &str, host: Option<&str>) -> StatusCode {
        let mut builder = axum::http::Request::builder().uri(path);
        if let Some(host) = host {
            builder = builder.header("Host", host);
        }
        let response = app
            .clone()
            .oneshot(builder.body(Body::empty()).unwrap())
            .await
            .unwrap();
        response.status()
    }

    #[test]
    fn host_patterns() {
        let trusted = TrustedHosts::new(vec!["example.com".into(), "*.internal.net".into()]);
        assert!(trusted.allows("example.com"));
        assert!(trusted.allows("example.com:8080"));
        assert!(trusted.allows("api.internal.net"));
        assert!(!trusted.allows("internal.net"));
        assert!(!trusted.allows("evil.com"));
        assert!(!trusted.allows("badexample.com"));
        assert!(!trusted.allows(""));

        assert!(TrustedHosts::new(vec!["*".into()]).allows("anything.org"));
        assert!(TrustedHosts::default().allows("anything.org"));
    }

    #[tokio::test]
    async fn untrusted_host_is_rejected() {
        let app = app(&["example.com"]);

        assert_eq!(
            status_for(&app, "/api/users/me", Some("example.com")).await,
            StatusCode::OK
        );

        let response = app
            .clone()
            .oneshot(
                axum::http::Request::builder()
                    .uri("/api/users/me")
                    .header("Host", "evil.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"Invalid host header");

        assert_eq!(
            status_for(&app, "/api/users/me", None).await,
            StatusCode::BAD_REQUEST
        );
    }

    #[tokio::test]
    async fn health_is_exempt_from_host_check() {
        let app = app(&["example.com"]);
        assert_eq!(
            status_for(&app, "/health", Some("evil.com")).await,
            StatusCode::OK
        );
    }

    #[tokio::test]
    async fn empty_list_allows_any_host() {
        let app = app(&[]);
        assert_eq!(
            status_for(&app, "/api/users/me", Some("evil.com")).await,
            StatusCode::OK
        );
    }
}
