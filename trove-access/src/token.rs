//! Token and caller-id parsing.
//!
//! The `Authorization` header carries `<token>` with an optional trailing
//! `<callerId>`; HTTP Basic auth is accepted with the token in the username
//! field; query-string `auth` is handled by the transport adapter.

use base64::Engine;

/// Parsed request authority, before validation against storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthPayload {
    pub token: String,
    pub caller_id: Option<String>,
}

impl AuthPayload {
    pub fn token_only(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            caller_id: None,
        }
    }
}

/// Parse an `Authorization` header value.
///
/// Accepted forms: `<token>`, `<token> <callerId>`, `Bearer <token>`, and
/// `Basic <base64>` where the basic-auth username field is the token.
pub fn parse_authorization(header: &str) -> Option<AuthPayload> {
    let header = header.trim();
    if header.is_empty() {
        return None;
    }
    if let Some(encoded) = strip_scheme(header, "Basic") {
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let token = decoded.split(':').next().unwrap_or_default();
        if token.is_empty() {
            return None;
        }
        return Some(AuthPayload::token_only(token));
    }
    let rest = strip_scheme(header, "Bearer").unwrap_or(header);
    let mut parts = rest.split_whitespace();
    let token = parts.next()?.to_string();
    let caller_id = parts.next().map(str::to_string);
    Some(AuthPayload { token, caller_id })
}

fn strip_scheme<'a>(header: &'a str, scheme: &str) -> Option<&'a str> {
    let (first, rest) = header.split_once(' ')?;
    first.eq_ignore_ascii_case(scheme).then_some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_token() {
        let auth = parse_authorization("ck3txyzabc").unwrap();
        assert_eq!(auth.token, "ck3txyzabc");
        assert_eq!(auth.caller_id, None);
    }

    #[test]
    fn trailing_caller_id() {
        let auth = parse_authorization("ck3txyzabc device-7").unwrap();
        assert_eq!(auth.token, "ck3txyzabc");
        assert_eq!(auth.caller_id.as_deref(), Some("device-7"));
    }

    #[test]
    fn bearer_scheme_is_stripped() {
        let auth = parse_authorization("Bearer ck3txyzabc").unwrap();
        assert_eq!(auth.token, "ck3txyzabc");
    }

    #[test]
    fn basic_auth_username_is_the_token() {
        let encoded = base64::engine::general_purpose::STANDARD.encode("ck3txyzabc:ignored");
        let auth = parse_authorization(&format!("Basic {encoded}")).unwrap();
        assert_eq!(auth.token, "ck3txyzabc");
        assert_eq!(auth.caller_id, None);
    }

    #[test]
    fn empty_or_malformed_is_none() {
        assert!(parse_authorization("").is_none());
        assert!(parse_authorization("   ").is_none());
        assert!(parse_authorization("Basic !!!not-base64!!!").is_none());
    }
}
