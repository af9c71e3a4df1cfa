//! The closed error taxonomy.
//!
//! Every failure surfaced by the API is an [`ApiError`] carrying one of the
//! [`ErrorId`] kinds, a human message, optional machine-readable `data` and
//! optional `subErrors`. Mapping to HTTP status codes lives here so every
//! transport renders failures identically.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::{json, Value};

/// Closed set of error kinds, serialized verbatim in `error.id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorId {
    InvalidParametersFormat,
    InvalidOperation,
    UnknownReferencedResource,
    InvalidRequestStructure,
    InvalidAccessToken,
    InvalidCredentials,
    Forbidden,
    UnknownResource,
    ItemAlreadyExists,
    Gone,
    UnsupportedContentType,
    TooManyResults,
    #[serde(rename = "unexpectedError")]
    UnexpectedError,
}

impl ErrorId {
    pub fn http_status(self) -> StatusCode {
        match self {
            ErrorId::InvalidParametersFormat
            | ErrorId::InvalidOperation
            | ErrorId::UnknownReferencedResource
            | ErrorId::InvalidRequestStructure => StatusCode::BAD_REQUEST,
            ErrorId::InvalidAccessToken | ErrorId::InvalidCredentials => StatusCode::UNAUTHORIZED,
            ErrorId::Forbidden => StatusCode::FORBIDDEN,
            ErrorId::UnknownResource => StatusCode::NOT_FOUND,
            ErrorId::ItemAlreadyExists => StatusCode::CONFLICT,
            ErrorId::Gone => StatusCode::GONE,
            ErrorId::UnsupportedContentType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ErrorId::TooManyResults => StatusCode::PAYLOAD_TOO_LARGE,
            ErrorId::UnexpectedError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// A structured API error.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{id:?}: {message}")]
pub struct ApiError {
    pub id: ErrorId,
    pub message: String,
    pub data: Option<Value>,
    pub sub_errors: Vec<Value>,
}

impl ApiError {
    pub fn new(id: ErrorId, message: impl Into<String>) -> Self {
        Self {
            id,
            message: message.into(),
            data: None,
            sub_errors: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_sub_errors(mut self, sub_errors: Vec<Value>) -> Self {
        self.sub_errors = sub_errors;
        self
    }

    // ── Constructors for the common kinds ──

    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        Self::new(ErrorId::InvalidParametersFormat, message)
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::new(ErrorId::InvalidOperation, message)
    }

    pub fn unknown_referenced_resource(message: impl Into<String>, ids: Value) -> Self {
        Self::new(ErrorId::UnknownReferencedResource, message).with_data(ids)
    }

    pub fn invalid_request_structure(message: impl Into<String>) -> Self {
        Self::new(ErrorId::InvalidRequestStructure, message)
    }

    pub fn invalid_access_token(message: impl Into<String>) -> Self {
        Self::new(ErrorId::InvalidAccessToken, message)
    }

    pub fn invalid_credentials() -> Self {
        Self::new(ErrorId::InvalidCredentials, "The given username/password pair is invalid.")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorId::Forbidden, message)
    }

    pub fn unknown_resource(kind: &str, id: &str) -> Self {
        Self::new(ErrorId::UnknownResource, format!("Unknown {kind} \"{id}\""))
    }

    pub fn item_already_exists(kind: &str, keys: Value) -> Self {
        Self::new(
            ErrorId::ItemAlreadyExists,
            format!("A {kind} with the same unique field(s) already exists"),
        )
        .with_data(keys)
    }

    pub fn gone(message: impl Into<String>) -> Self {
        Self::new(ErrorId::Gone, message)
    }

    pub fn unsupported_content_type(content_type: &str) -> Self {
        Self::new(
            ErrorId::UnsupportedContentType,
            format!("Unsupported content type \"{content_type}\""),
        )
    }

    pub fn too_many_results(limit: usize) -> Self {
        Self::new(
            ErrorId::TooManyResults,
            format!("Result exceeds the maximum size of {limit} items; narrow the query"),
        )
    }

    /// Unclassified internal failure. The cause is logged by the caller and
    /// never returned to the client.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::new(ErrorId::UnexpectedError, message.into())
    }

    /// The `error` member of the failure envelope.
    pub fn to_value(&self) -> Value {
        let mut error = json!({
            "id": self.id,
            "message": self.message,
        });
        if let Some(map) = error.as_object_mut() {
            if let Some(data) = &self.data {
                map.insert("data".into(), data.clone());
            }
            if !self.sub_errors.is_empty() {
                map.insert("subErrors".into(), json!(self.sub_errors));
            }
        }
        error
    }

    /// Public rendering: internal details of unexpected errors are replaced
    /// by a generic message (stack traces and causes stay in the logs).
    pub fn public(&self) -> Self {
        if self.id == ErrorId::UnexpectedError {
            ApiError::new(ErrorId::UnexpectedError, "An unexpected error occurred")
        } else {
            self.clone()
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.id.http_status();
        let body = json!({ "error": self.public().to_value() });
        (status, Json(body)).into_response()
    }
}
