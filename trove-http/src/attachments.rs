//! Attachment download.
//!
//! Accepts a normal access token or a `readToken` query parameter; the
//! plain `auth` query parameter is refused on this path. The response body
//! is the raw file, with an RFC 5987 `filename*` disposition. A trailing
//! `/<anyname>` path suffix is ignored (URL prettiness).

use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};

use trove_access::parse_authorization;
use trove_api::{DownloadAuth, Services};
use trove_core::ApiError;

use crate::envelope;

/// RFC 5987 `attr-char` percent encoding for the `filename*` parameter.
fn rfc5987_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for byte in value.bytes() {
        let is_attr_char = byte.is_ascii_alphanumeric()
            || matches!(
                byte,
                b'!' | b'#' | b'$' | b'&' | b'+' | b'-' | b'.' | b'^' | b'_' | b'`' | b'|' | b'~'
            );
        if is_attr_char {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02X}"));
        }
    }
    out
}

pub async fn download(
    services: &Services,
    username: &str,
    event_id: &str,
    file_id: &str,
    headers: &HeaderMap,
    query: &serde_json::Map<String, serde_json::Value>,
) -> Response {
    let config = services.config.clone();
    let auth = if let Some(token) = query.get("readToken").and_then(|v| v.as_str()) {
        DownloadAuth::ReadToken(token.to_string())
    } else if let Some(payload) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_authorization)
    {
        DownloadAuth::Access(payload)
    } else {
        let err = if query.contains_key("auth") {
            // The plain auth parameter is refused for attachment routes.
            ApiError::invalid_access_token(
                "The auth query parameter is not accepted here; use readToken",
            )
        } else {
            ApiError::invalid_access_token("Missing access token or readToken")
        };
        return envelope::failure(&config, &err);
    };

    match trove_api::read_attachment(services, username, event_id, file_id, auth).await {
        Ok((attachment, data)) => {
            let mut response = (StatusCode::OK, data).into_response();
            let headers = response.headers_mut();
            if let Ok(content_type) = HeaderValue::from_str(&attachment.content_type) {
                headers.insert(header::CONTENT_TYPE, content_type);
            }
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(attachment.size));
            let disposition = format!(
                "attachment; filename*=UTF-8''{}",
                rfc5987_encode(&attachment.file_name)
            );
            if let Ok(value) = HeaderValue::from_str(&disposition) {
                headers.insert(header::CONTENT_DISPOSITION, value);
            }
            response
        }
        Err(err) => envelope::failure(&config, &err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rfc5987_keeps_attr_chars_and_escapes_the_rest() {
        assert_eq!(rfc5987_encode("photo.jpg"), "photo.jpg");
        assert_eq!(rfc5987_encode("été fou.jpg"), "%C3%A9t%C3%A9%20fou.jpg");
        assert_eq!(rfc5987_encode("a/b"), "a%2Fb");
    }
}
