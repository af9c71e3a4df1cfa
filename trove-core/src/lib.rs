//! # trove-core — the request-processing engine
//!
//! Transport-agnostic machinery shared by every trove surface: the closed
//! error taxonomy, the response envelope, the ordered-step method
//! dispatcher, the sequential batch executor, the bounded result builder
//! and server configuration.

pub mod batch;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod meta;
pub mod result;
pub mod scrub;

pub use config::{TroveConfig, UpdateMode};
pub use dispatch::{step, Chain, Registry, Step};
pub use error::{ApiError, ErrorId};
pub use meta::Meta;
pub use result::ResultBuilder;

/// The API version carried in every envelope's `meta.apiVersion`.
pub const API_VERSION: &str = "1.9.0";
