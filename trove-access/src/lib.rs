//! # trove-access — the authorization model
//!
//! [`AccessLogic`] evaluates permissions over a user's stream tree;
//! [`token`] parses request authority; [`read_token`] derives the
//! deterministic attachment read tokens; [`custom`] declares the optional
//! pluggable auth step.

pub mod custom;
pub mod logic;
pub mod read_token;
pub mod token;

pub use custom::{CustomAuthError, CustomAuthStep};
pub use logic::AccessLogic;
pub use token::{parse_authorization, AuthPayload};
