//! Core library for ironlog.
//!
//! This crate holds everything a front-end needs to talk to the workout API:
//!
//! - `api`: the authenticated request pipeline, the token refresh
//!   coordinator and the typed REST endpoints
//! - `auth`: session persistence backends and the session lifecycle manager
//! - `models`: user, exercise and history types
//! - `config`: on-disk configuration

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse, AuthFailure};
pub use auth::{Session, SessionError, SessionManager, SessionStatus, SessionStore, StorageKey};
pub use config::Config;
