use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

/// Server messages on a `401` that mean the access token can be refreshed.
pub const REFRESHABLE_TOKEN_MESSAGES: [&str; 2] = ["token.expired", "token.invalid"];

/// Why an authenticated request could not be completed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("no refresh token is stored")]
    NoRefreshToken,

    #[error("{0}")]
    Rejected(String),

    #[error("token rejected again after refresh")]
    ReplayRejected,

    #[error("session ended while the token was being refreshed")]
    SessionEnded,
}

/// Every way a request can fail. `Clone` so a single refresh failure can be
/// handed to every queued caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    #[error("Not authorized: {0}")]
    Auth(AuthFailure),

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    #[error("{message}")]
    Domain { status: u16, message: String },

    #[error("Network error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Structured error payload: `{"message": "..."}`
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Extract the server's `message`, if the body is a structured error.
    pub fn server_message(body: &str) -> Option<String> {
        serde_json::from_str::<ErrorBody>(body)
            .ok()
            .map(|b| b.message)
    }

    /// Classify a non-2xx response that is not an auth escalation.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        match Self::server_message(body) {
            Some(message) => ApiError::Domain {
                status: status.as_u16(),
                message,
            },
            None => ApiError::Transport(format!(
                "Status {}: {}",
                status,
                Self::truncate_body(body)
            )),
        }
    }

    /// True when the session was torn down as part of this failure and the
    /// UI should route to the signed-out flow.
    pub fn is_session_ending(&self) -> bool {
        matches!(self, ApiError::Auth(_) | ApiError::RefreshFailed(_))
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Transport(format!("request timed out: {err}"))
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

/// Whether a `401` body asks for a token refresh.
pub fn is_refreshable_401(body: &str) -> bool {
    ApiError::server_message(body)
        .map(|m| REFRESHABLE_TOKEN_MESSAGES.contains(&m.as_str()))
        .unwrap_or(false)
}
