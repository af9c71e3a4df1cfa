//! Followed slices — bookmarks of accesses on other users' data.

use serde::{Deserialize, Serialize};

/// A saved pointer to another user's access. `name` is unique per user, and
/// so is the `(url, access_token)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowedSlice {
    pub id: String,
    pub name: String,
    pub url: String,
    pub access_token: String,
}
