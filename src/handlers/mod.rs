//! HTTP request handlers (route handlers).
//!
//! Handlers behind `/api` read the `Principal` injected by the access
//! control middleware; they never inspect credentials themselves.

/// Health check endpoint
pub mod health;
/// Signed service API endpoints
pub mod services;
/// Bearer token endpoints
pub mod users;
