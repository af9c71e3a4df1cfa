//! Storage error bridging.
//!
//! Backends wrap their driver errors in [`StoreError::Backend`]; recognized
//! uniqueness violations surface as [`StoreError::AlreadyExists`] with the
//! offending keys so the API layer can map them to `ItemAlreadyExists`.

use serde_json::Value;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} already exists: {keys}")]
    AlreadyExists { kind: &'static str, keys: Value },

    #[error("item not found")]
    NotFound,

    #[error("storage failure: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn already_exists(kind: &'static str, keys: Value) -> Self {
        Self::AlreadyExists { kind, keys }
    }

    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}
