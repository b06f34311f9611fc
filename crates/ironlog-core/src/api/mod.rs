//! REST API client module for the workout service.
//!
//! `ApiClient` is the authenticated request pipeline: it attaches the
//! current bearer token, classifies responses into `ApiError`, and hands
//! expired-token failures to the `RefreshCoordinator`, which refreshes the
//! token once for any number of concurrent failures and replays them.

pub mod client;
pub mod error;
pub mod refresh;
pub mod request;
pub mod signout;

pub use client::{ApiClient, SignInResponse};
pub use error::{ApiError, AuthFailure};
pub use refresh::RefreshCoordinator;
pub use request::{ApiRequest, ApiResponse, AuthMode};
pub use signout::{SignOutHook, SignOutRegistration};
