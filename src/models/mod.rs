//! Data models representing database entities.
//!
//! This module contains the rows the credential store reads and the
//! principal the access control layer attaches to requests.

/// Service API key model
pub mod api_key;
/// User model and authenticated principal
pub mod user;
