//! Log scrubbing.
//!
//! Anything that might carry credentials goes through [`scrub`] before it
//! reaches a tracing macro: `passwordHash=…` values are masked and reset
//! tokens are dropped entirely.

/// Mask sensitive `key=value` pairs in a loggable string.
pub fn scrub(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for (i, part) in input.split_whitespace().enumerate() {
        if i > 0 {
            out.push(' ');
        }
        if let Some((key, _)) = part.split_once('=') {
            if key.eq_ignore_ascii_case("passwordHash") {
                out.push_str(key);
                out.push_str("=(hidden)");
                continue;
            }
            if key.eq_ignore_ascii_case("resetToken") {
                // Omitted entirely.
                out.truncate(out.trim_end().len());
                continue;
            }
        }
        out.push_str(part);
    }
    out
}
