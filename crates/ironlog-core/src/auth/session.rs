use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::UserProfile;

/// Access + refresh token, as returned by sign-in and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub token: String,
    pub refresh_token: String,
}

/// The logged-in identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user: UserProfile,
    pub token: String,
    pub refresh_token: Option<String>,
    pub signed_in_at: DateTime<Utc>,
}

impl Session {
    pub fn new(user: UserProfile, tokens: TokenPair) -> Self {
        Self {
            user,
            token: tokens.token,
            refresh_token: Some(tokens.refresh_token),
            signed_in_at: Utc::now(),
        }
    }
}

/// What the UI should show. `Loading` is distinct from `SignedOut` so a
/// cold start still reading storage is not mistaken for a logged-out user.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionStatus {
    #[default]
    Loading,
    SignedOut,
    SignedIn(UserProfile),
}

impl SessionStatus {
    pub fn is_loading(&self) -> bool {
        matches!(self, SessionStatus::Loading)
    }

    pub fn user(&self) -> Option<&UserProfile> {
        match self {
            SessionStatus::SignedIn(user) => Some(user),
            _ => None,
        }
    }
}
