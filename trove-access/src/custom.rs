//! Optional pluggable auth step.
//!
//! When configured, the predicate runs after the token pre-check with the
//! resolved access and whatever trailing authority the transport extracted
//! (the tail of the `Authorization` header or a `callerid` header).
//! Rejection denies the call; an internal failure bubbles as a server
//! error, never as a permission denial.

use async_trait::async_trait;

use trove_model::Access;

#[derive(Debug, thiserror::Error)]
pub enum CustomAuthError {
    /// The predicate rejected the caller.
    #[error("custom auth step rejected the caller: {0}")]
    Rejected(String),
    /// The predicate itself failed.
    #[error("custom auth step failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait CustomAuthStep: Send + Sync {
    async fn check(&self, access: &Access, caller_id: Option<&str>) -> Result<(), CustomAuthError>;
}
