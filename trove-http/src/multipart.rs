//! Multipart event uploads.
//!
//! A multipart request carries file parts plus, for event creation,
//! exactly one non-file JSON part named `event`. Any other non-file part
//! is a structural error.

use axum::extract::Multipart;
use serde_json::Value;

use trove_api::Upload;
use trove_core::ApiError;

pub struct EventMultipart {
    /// The JSON `event` part, when present.
    pub event: Option<Value>,
    pub uploads: Vec<Upload>,
}

/// Collect all parts, separating files (anything with a filename) from the
/// single allowed JSON part.
pub async fn collect(mut multipart: Multipart) -> Result<EventMultipart, ApiError> {
    let mut event: Option<Value> = None;
    let mut uploads = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| {
        ApiError::invalid_request_structure(format!("Unreadable multipart body: {e}"))
    })? {
        let name = field.name().unwrap_or_default().to_string();
        let file_name = field.file_name().map(str::to_string);
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field.bytes().await.map_err(|e| {
            ApiError::invalid_request_structure(format!("Unreadable multipart part: {e}"))
        })?;

        match file_name {
            Some(file_name) => uploads.push(Upload {
                file_name,
                content_type,
                data,
            }),
            None if name == "event" => {
                if event.is_some() {
                    return Err(ApiError::invalid_request_structure(
                        "Multiple \"event\" parts in multipart content",
                    ));
                }
                let parsed: Value = serde_json::from_slice(&data).map_err(|e| {
                    ApiError::invalid_request_structure(format!(
                        "The \"event\" part is not valid JSON: {e}"
                    ))
                })?;
                event = Some(parsed);
            }
            None => {
                return Err(ApiError::invalid_request_structure(format!(
                    "Unexpected non-file part \"{name}\" in multipart content"
                )));
            }
        }
    }
    Ok(EventMultipart { event, uploads })
}

/// For event creation the JSON part is mandatory.
pub fn require_event(collected: EventMultipart) -> Result<(Value, Vec<Upload>), ApiError> {
    match collected.event {
        Some(event) => Ok((event, collected.uploads)),
        None => Err(ApiError::invalid_request_structure(
            "Missing the JSON \"event\" part in multipart content",
        )),
    }
}

/// Enforce the configured per-file upload bound.
pub fn check_upload_sizes(uploads: &[Upload], max_bytes: usize) -> Result<(), ApiError> {
    for upload in uploads {
        if upload.data.len() > max_bytes {
            return Err(ApiError::new(
                trove_core::ErrorId::TooManyResults,
                format!(
                    "Attachment \"{}\" exceeds the maximum size of {max_bytes} bytes",
                    upload.file_name
                ),
            ));
        }
    }
    Ok(())
}
