//! User profile models.

use serde::{Deserialize, Serialize};

/// The signed-in user as returned by `POST /sessions`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct UserProfile {
    pub id: String,
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub avatar: Option<String>,
}

impl UserProfile {
    /// Merge a partial update into this profile. Absent fields are left as-is.
    pub fn apply(&mut self, patch: ProfilePatch) {
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(email) = patch.email {
            self.email = email;
        }
        if let Some(avatar) = patch.avatar {
            self.avatar = Some(avatar);
        }
    }
}

/// Local profile edit, merged field-wise into the stored profile.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(ts_rs::TS), ts(export))]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub avatar: Option<String>,
}

/// Body of `PUT /users`.
///
/// The server requires `old_password` whenever `password` is set.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UserUpdate {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_password: Option<String>,
}
