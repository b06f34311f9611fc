//! Request and response descriptors for the authenticated pipeline.
//!
//! An `ApiRequest` is plain data so it can be replayed after a token
//! refresh; an `ApiResponse` is the fully read body of a 2xx reply.

use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::ApiError;

/// Whether a request carries the bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthMode {
    /// Attach the current token; a token `401` is escalated for refresh.
    #[default]
    Bearer,
    /// Never attach a token and never escalate a `401`.
    Anonymous,
}

/// Refresh cycles a single logical request may go through before a token
/// `401` is treated as final.
pub(crate) const MAX_REFRESH_CYCLES: u8 = 2;

/// How many refresh cycles a request has already been replayed after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Attempt {
    refreshes: u8,
}

impl Attempt {
    pub(crate) const FIRST: Attempt = Attempt { refreshes: 0 };

    pub(crate) fn replayed(self) -> Self {
        Self {
            refreshes: self.refreshes.saturating_add(1),
        }
    }

    pub(crate) fn may_refresh(self) -> bool {
        self.refreshes < MAX_REFRESH_CYCLES
    }
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<serde_json::Value>,
    pub auth: AuthMode,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            body: None,
            auth: AuthMode::Bearer,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// Attach a JSON body.
    pub fn json<B: Serialize>(mut self, body: &B) -> Result<Self, ApiError> {
        let value = serde_json::to_value(body)
            .map_err(|e| ApiError::InvalidResponse(format!("unserializable body: {e}")))?;
        self.body = Some(value);
        Ok(self)
    }

    pub fn anonymous(mut self) -> Self {
        self.auth = AuthMode::Anonymous;
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.auth == AuthMode::Anonymous
    }
}

/// A successful response with its body already read.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub body: String,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| {
            ApiError::InvalidResponse(format!("{e} (status {})", self.status))
        })
    }
}
