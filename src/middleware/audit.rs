//! Audit records for requests passing through the access control layer.
//!
//! One record is emitted per audited request. The [`AuditGuard`] owns the
//! pending record for the lifetime of the request future; if the future is
//! dropped before reaching a terminal outcome (client disconnect, an outer
//! timeout, a panic unwinding through the layer) the guard still emits a
//! `cancelled` record from its `Drop` impl.

use std::{collections::BTreeMap, sync::Arc};

use axum::{extract::Request, http::StatusCode};
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use url::form_urlencoded;
use uuid::Uuid;

use crate::{error::ApiError, middleware::context::RequestContext, models::user::Principal};

/// Header values replaced with a placeholder in audit output.
const REDACTED_HEADERS: &[&str] = &["authorization", "cookie", "proxy-authorization", "secret"];

/// Terminal state of an audited request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Matched the exempt pattern and went straight to the handler.
    Exempt,
    Forwarded,
    Rejected,
    /// The request future was dropped before it finished.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClientInfo {
    pub ip: String,
    pub user_id: Option<i64>,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub kind: &'static str,
    pub code: &'static str,
    pub msg: String,
    pub detail: String,
}

impl From<&ApiError> for ErrorInfo {
    fn from(error: &ApiError) -> Self {
        Self {
            kind: error.kind(),
            code: error.code(),
            msg: error.to_string(),
            detail: error.detail(),
        }
    }
}

/// Request headers, cookie names and query parameters.
///
/// Only attached for service API requests and for requests that errored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RequestDetails {
    pub headers: BTreeMap<String, String>,
    pub cookies: Vec<String>,
    pub query: Vec<(String, String)>,
}

impl RequestDetails {
    pub fn capture(request: &Request) -> Self {
        let mut headers = BTreeMap::new();
        let mut cookies = Vec::new();

        for (name, value) in request.headers() {
            let name = name.as_str();
            if name == "cookie" {
                if let Ok(raw) = value.to_str() {
                    cookies.extend(
                        raw.split(';')
                            .filter_map(|c| c.split_once('='))
                            .map(|(k, _)| k.trim().to_string()),
                    );
                }
            }
            let value = if REDACTED_HEADERS.contains(&name) {
                "[redacted]".to_string()
            } else {
                String::from_utf8_lossy(value.as_bytes()).into_owned()
            };
            headers.insert(name.to_string(), value);
        }

        let query = request
            .uri()
            .query()
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();

        Self {
            headers,
            cookies,
            query,
        }
    }
}

/// One audit log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditRecord {
    pub request_id: Uuid,
    pub method: String,
    pub path: String,
    pub outcome: Outcome,
    pub status_code: Option<u16>,
    pub client: ClientInfo,
    pub error: Option<ErrorInfo>,
    pub arrived_at: DateTime<Utc>,
    /// Arrival time at the configured service timezone.
    pub arrived_at_local: DateTime<FixedOffset>,
    pub processed_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<RequestDetails>,
}

/// Destination for audit records.
pub trait AuditSink: Send + Sync {
    fn emit(&self, record: &AuditRecord);
}

/// Writes audit records as `tracing` events under the `audit` target.
///
/// Successful requests log at INFO, client errors at WARN, server errors
/// and cancelled requests at ERROR.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn emit(&self, record: &AuditRecord) {
        let json = match serde_json::to_string(record) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(target: "audit", error = %e, "failed to serialize audit record");
                return;
            }
        };
        let error_code = record.error.as_ref().map(|e| e.code);

        match (record.outcome, record.status_code) {
            (Outcome::Cancelled, _) | (_, Some(500..)) => tracing::error!(
                target: "audit",
                request_id = %record.request_id,
                method = %record.method,
                path = %record.path,
                status = ?record.status_code,
                error_code = ?error_code,
                elapsed_ms = record.processed_ms,
                record = %json,
                "request audited"
            ),
            (_, Some(400..)) => tracing::warn!(
                target: "audit",
                request_id = %record.request_id,
                method = %record.method,
                path = %record.path,
                status = ?record.status_code,
                error_code = ?error_code,
                elapsed_ms = record.processed_ms,
                record = %json,
                "request audited"
            ),
            _ => tracing::info!(
                target: "audit",
                request_id = %record.request_id,
                method = %record.method,
                path = %record.path,
                status = ?record.status_code,
                user_id = ?record.client.user_id,
                elapsed_ms = record.processed_ms,
                record = %json,
                "request audited"
            ),
        }
    }
}

/// Pending audit record for one request.
///
/// Finished explicitly with [`AuditGuard::forwarded`] or
/// [`AuditGuard::rejected`]; otherwise `Drop` finishes it as cancelled.
pub struct AuditGuard {
    sink: Arc<dyn AuditSink>,
    pending: Option<AuditRecord>,
    context: RequestContext,
    captured: RequestDetails,
    /// Emit even when the request succeeds.
    always: bool,
    /// Attach request details even when the request succeeds.
    sensitive: bool,
}

impl AuditGuard {
    pub fn begin(
        sink: Arc<dyn AuditSink>,
        request: &Request,
        context: &RequestContext,
        arrived_at_local: DateTime<FixedOffset>,
        always: bool,
        sensitive: bool,
    ) -> Self {
        let record = AuditRecord {
            request_id: context.request_id,
            method: request.method().to_string(),
            path: request.uri().path().to_string(),
            outcome: Outcome::Cancelled,
            status_code: None,
            client: ClientInfo {
                ip: context.ip.clone(),
                user_id: None,
                email: None,
            },
            error: None,
            arrived_at: context.arrived_at,
            arrived_at_local,
            processed_ms: 0,
            details: None,
        };

        Self {
            sink,
            pending: Some(record),
            context: context.clone(),
            captured: RequestDetails::capture(request),
            always,
            sensitive,
        }
    }

    pub fn set_principal(&mut self, principal: &Principal) {
        if let Some(record) = self.pending.as_mut() {
            record.client.user_id = Some(principal.id);
            record.client.email = principal.masked_email();
        }
    }

    /// The handler ran. `error` is whatever `ApiError` the handler's response carried.
    pub fn forwarded(mut self, outcome: Outcome, status: StatusCode, error: Option<&ApiError>) {
        self.finish(outcome, Some(status), error);
    }

    pub fn rejected(mut self, error: &ApiError) {
        self.finish(Outcome::Rejected, Some(error.status()), Some(error));
    }

    fn finish(&mut self, outcome: Outcome, status: Option<StatusCode>, error: Option<&ApiError>) {
        let Some(mut record) = self.pending.take() else {
            return;
        };
        let errored = error.is_some()
            || outcome == Outcome::Cancelled
            || status.is_some_and(|s| s.is_server_error());
        if !(self.always || self.sensitive || errored) {
            return;
        }

        record.outcome = outcome;
        record.status_code = status.map(|s| s.as_u16());
        record.error = error.map(ErrorInfo::from);
        record.processed_ms = self.context.elapsed_ms();
        if self.sensitive || errored {
            record.details = Some(std::mem::take(&mut self.captured));
        }
        self.sink.emit(&record);
    }
}

impl Drop for AuditGuard {
    fn drop(&mut self) {
        if self.pending.is_some() {
            self.finish(Outcome::Cancelled, None, None);
        }
    }
}

#[cfg(test)]
pub use test_support::RecordingSink;

#[cfg(test)]
mod test_support {
    use std::sync::Mutex;

    use super::*;

    /// Keeps every emitted record in memory.
    #[derive(Debug, Default)]
    pub struct RecordingSink {
        records: Mutex<Vec<AuditRecord>>,
    }

    impl RecordingSink {
        pub fn records(&self) -> Vec<AuditRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    impl AuditSink for RecordingSink {
        fn emit(&self, record: &AuditRecord) {
            self.records.lock().unwrap().push(record.clone());
        }
    }
}
