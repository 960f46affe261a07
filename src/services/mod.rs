//! Collaborators consumed by the access control layer.

/// UTC clock with fixed-offset helpers
pub mod clock;
/// API key and user lookups
pub mod credentials;
/// Query string HMAC signatures
pub mod signature;
/// Bearer token decoding
pub mod token;
