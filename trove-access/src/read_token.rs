//! Attachment read tokens.
//!
//! A read token grants access to one attachment without a full access
//! token: `<accessId>-<base64url(HMAC-SHA256(attachmentId!accessId!accessToken))>`
//! keyed by the server secret. Deterministic, so verifiers recompute rather
//! than store.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

fn mac(attachment_id: &str, access_id: &str, access_token: &str, secret: &str) -> Option<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).ok()?;
    mac.update(attachment_id.as_bytes());
    mac.update(b"!");
    mac.update(access_id.as_bytes());
    mac.update(b"!");
    mac.update(access_token.as_bytes());
    Some(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Derive the read token handed out at response assembly.
pub fn derive(
    attachment_id: &str,
    access_id: &str,
    access_token: &str,
    secret: &str,
) -> Option<String> {
    mac(attachment_id, access_id, access_token, secret).map(|m| format!("{access_id}-{m}"))
}

/// Recover the access id embedded in a read token.
pub fn access_id_of(read_token: &str) -> Option<&str> {
    let (access_id, rest) = read_token.split_once('-')?;
    (!access_id.is_empty() && !rest.is_empty()).then_some(access_id)
}

/// Verify a presented read token against the attachment and the access it
/// claims to come from. Constant-shape comparison over the recomputed value.
pub fn matches(
    read_token: &str,
    attachment_id: &str,
    access_id: &str,
    access_token: &str,
    secret: &str,
) -> bool {
    match derive(attachment_id, access_id, access_token, secret) {
        Some(expected) => constant_time_eq(expected.as_bytes(), read_token.as_bytes()),
        None => false,
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
