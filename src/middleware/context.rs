//! Per-request scratch state.

use std::{net::SocketAddr, time::Instant};

use axum::{
    extract::{ConnectInfo, Request},
    http::HeaderMap,
};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::{models::user::Principal, services::clock::Clock};

/// Metadata captured when a request arrives.
///
/// Owned by the request for its whole lifetime and inserted into the
/// request's extension map before the handler runs, so handlers can read the
/// caller IP or the resolved principal without touching headers again.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    pub arrived_at: DateTime<Utc>,
    pub started: Instant,
    pub ip: String,
    /// `None` until (and unless) a credential scheme resolves one.
    pub principal: Option<Principal>,
}

impl RequestContext {
    pub fn begin(request: &Request, clock: &dyn Clock) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            arrived_at: clock.now(),
            started: Instant::now(),
            ip: client_ip(request),
            principal: None,
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }
}

/// Caller address: first hop of `X-Forwarded-For`, else the socket peer.
fn client_ip(request: &Request) -> String {
    if let Some(forwarded) = forwarded_for(request.headers()) {
        return forwarded;
    }
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_for(headers: &HeaderMap) -> Option<String> {
    let value = headers.get("x-forwarded-for")?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    (!first.is_empty()).then(|| first.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::clock::FixedClock;
    use axum::body::Body;

    fn clock() -> FixedClock {
        FixedClock(DateTime::from_timestamp(1_690_000_000, 0).unwrap())
    }

    #[test]
    fn takes_first_forwarded_hop() {
        let request = axum::http::Request::builder()
            .uri("/api/users/me")
            .header("X-Forwarded-For", "203.0.113.7, 10.0.0.1")
            .body(Body::empty())
            .unwrap();

        let context = RequestContext::begin(&request, &clock());
        assert_eq!(context.ip, "203.0.113.7");
        assert_eq!(context.arrived_at.timestamp(), 1_690_000_000);
        assert!(context.principal.is_none());
    }

    #[test]
    fn falls_back_to_peer_address() {
        let mut request = axum::http::Request::builder()
            .uri("/")
            .body(Body::empty())
            .unwrap();
        request
            .extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 20], 51000))));

        assert_eq!(RequestContext::begin(&request, &clock()).ip, "192.168.1.20");
    }

    #[test]
    fn unknown_without_any_source() {
        let request = axum::http::Request::builder().uri("/").body(Body::empty()).unwrap();
        assert_eq!(RequestContext::begin(&request, &clock()).ip, "unknown");
    }
}
