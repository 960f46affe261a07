//! HTTP middleware components.
//!
//! Middleware are functions that run before route handlers.
//! They can:
//! - Authenticate requests
//! - Log requests
//! - Short-circuit requests (reject unauthorized)

/// Request authentication and path classification
pub mod access_control;
/// Audit records and sinks
pub mod audit;
/// Per-request metadata
pub mod context;
/// Host header allow-list
pub mod trusted_hosts;
