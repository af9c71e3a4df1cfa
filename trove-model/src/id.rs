//! Collision-resistant id generation.
//!
//! Generated ids are cuid-like: a `c` followed by 24 base-36 characters
//! built from the current time, a process counter and random padding.
//! Client-supplied ids are checked against the same shape, except for
//! streams where customer-prefixed ids are accepted.

use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const ID_LEN: usize = 25;

static COUNTER: AtomicU64 = AtomicU64::new(0);

fn to_base36(mut n: u64, width: usize) -> String {
    let mut out = vec![b'0'; width];
    let mut i = width;
    while n > 0 && i > 0 {
        i -= 1;
        out[i] = BASE36[(n % 36) as usize];
        n /= 36;
    }
    String::from_utf8(out).unwrap_or_default()
}

/// Generate a fresh cuid-like id (`c` + 24 base-36 chars).
pub fn generate() -> String {
    let millis = chrono::Utc::now().timestamp_millis() as u64;
    let count = COUNTER.fetch_add(1, Ordering::Relaxed) % (36u64.pow(4));
    let mut rng = rand::thread_rng();
    let mut tail = String::with_capacity(12);
    for _ in 0..12 {
        tail.push(BASE36[rng.gen_range(0..36)] as char);
    }
    format!("c{}{}{}", to_base36(millis, 8), to_base36(count, 4), tail)
}

/// Checks a client-supplied id for the generated shape: `^c[a-z0-9]{24}$`.
pub fn is_cuid_like(id: &str) -> bool {
    id.len() == ID_LEN
        && id.starts_with('c')
        && id[1..]
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// Checks a client-supplied stream id.
///
/// Streams additionally accept customer-prefixed ids: lowercase
/// alphanumerics, dash and underscore, up to 64 chars, never starting with
/// `:` (reserved for synthetic streams).
pub fn is_acceptable_stream_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && !id.starts_with(':')
        && id != crate::STAR_STREAM
        && id
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-' || b == b'_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn generated_ids_are_cuid_like() {
        for _ in 0..100 {
            let id = generate();
            assert!(is_cuid_like(&id), "bad id: {id}");
        }
    }

    #[test]
    fn generated_ids_are_unique() {
        let ids: HashSet<String> = (0..1000).map(|_| generate()).collect();
        assert_eq!(ids.len(), 1000);
    }

    #[test]
    fn rejects_malformed_ids() {
        assert!(!is_cuid_like(""));
        assert!(!is_cuid_like("c123"));
        assert!(!is_cuid_like("Xabcdefghijklmnopqrstuvwx"));
        assert!(!is_cuid_like("cABCDEFGHIJKLMNOPQRSTUVWX"));
    }

    #[test]
    fn stream_ids_allow_customer_prefixes() {
        assert!(is_acceptable_stream_id("acme-diary"));
        assert!(is_acceptable_stream_id("a"));
        assert!(!is_acceptable_stream_id(":_tag:hop"));
        assert!(!is_acceptable_stream_id("*"));
        assert!(!is_acceptable_stream_id(""));
        assert!(!is_acceptable_stream_id("Upper"));
    }
}
