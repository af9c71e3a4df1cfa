//! User accounts.

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

/// Advisory per-user storage figures, recomputed by a nightly job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsed {
    pub db_documents: i64,
    pub attached_files: i64,
}

/// A tenant. Owns its streams, events, accesses, profile buckets and
/// followed slices; deleting a user cascades.
///
/// The password hash is not part of the model; it lives behind the password
/// storage collaborator and never crosses the API boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    pub email: String,
    pub language: String,
    #[serde(default)]
    pub storage_used: StorageUsed,
    pub created: Timestamp,
    pub modified: Timestamp,
}

impl User {
    /// Account view returned by `account.get`: everything except the id.
    pub fn account_value(&self) -> serde_json::Value {
        serde_json::json!({
            "username": self.username,
            "email": self.email,
            "language": self.language,
            "storageUsed": self.storage_used,
        })
    }
}

/// Username rule: lowercase, 5-23 chars, alphanumerics plus dash, starting
/// with a letter or digit.
pub fn is_valid_username(username: &str) -> bool {
    let len = username.len();
    (5..=23).contains(&len)
        && username
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        && !username.starts_with('-')
        && !username.ends_with('-')
}

/// Email rule: case-insensitive, at most 300 chars, one `@` with content on
/// both sides. Anything stricter belongs to the mail collaborator.
pub fn is_valid_email(email: &str) -> bool {
    if email.is_empty() || email.len() > 300 {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => !local.is_empty() && domain.contains('.'),
        None => false,
    }
}

/// Language tag rule: 1-5 chars.
pub fn is_valid_language(language: &str) -> bool {
    (1..=5).contains(&language.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn username_bounds() {
        assert!(is_valid_username("alice"));
        assert!(is_valid_username("bob-the-builder"));
        assert!(!is_valid_username("bob"));
        assert!(!is_valid_username("Alice"));
        assert!(!is_valid_username("-alice"));
        assert!(!is_valid_username("a".repeat(24).as_str()));
    }

    #[test]
    fn email_bounds() {
        assert!(is_valid_email("a@b.co"));
        assert!(!is_valid_email("a@b"));
        assert!(!is_valid_email("nope"));
        assert!(!is_valid_email(&format!("{}@x.com", "a".repeat(300))));
    }

    #[test]
    fn language_bounds() {
        assert!(is_valid_language("en"));
        assert!(is_valid_language("en-US"));
        assert!(!is_valid_language(""));
        assert!(!is_valid_language("en-US-x"));
    }

    #[test]
    fn account_value_hides_id() {
        let user = User {
            id: "u1".into(),
            username: "alice".into(),
            email: "a@b.co".into(),
            language: "en".into(),
            storage_used: StorageUsed::default(),
            created: 0.0,
            modified: 0.0,
        };
        let v = user.account_value();
        assert!(v.get("id").is_none());
        assert_eq!(v["username"], "alice");
    }
}
