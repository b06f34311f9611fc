//! API client for the workout REST API.
//!
//! This module provides the `ApiClient`, which wraps every outbound request
//! with the current bearer token and routes auth failures to the refresh
//! coordinator, plus the typed endpoints the front-ends call.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use anyhow::Result;
use futures::future::{BoxFuture, FutureExt};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tracing::{debug, warn};

use super::error::is_refreshable_401;
use super::refresh::{Outcome, RefreshCoordinator};
use super::request::{ApiRequest, ApiResponse, Attempt};
use super::signout::SignOutHook;
use super::{ApiError, AuthFailure};
use crate::auth::{SessionStore, TokenPair};
use crate::config::Config;
use crate::models::{Exercise, HistoryDay, UserProfile, UserUpdate};

// ============================================================================
// Constants
// ============================================================================

/// Maximum number of retries for rate-limited (429) requests.
/// 3 retries with exponential backoff usually succeeds without excessive delay.
const MAX_RATE_LIMIT_RETRIES: u32 = 3;

/// Initial backoff delay in milliseconds for rate limiting.
const INITIAL_BACKOFF_MS: u64 = 1000;

const SIGN_IN_PATH: &str = "/sessions";
const REFRESH_PATH: &str = "/sessions/refresh-token";

/// Body of a successful `POST /sessions`. Fields are optional so an
/// incomplete payload can be rejected explicitly by the caller.
#[derive(Debug, Clone, Deserialize)]
pub struct SignInResponse {
    pub user: Option<UserProfile>,
    pub token: Option<String>,
    pub refresh_token: Option<String>,
}

/// The bearer token plus a counter bumped on every sign-in, sign-out and
/// rotation, so a refresh started under one session cannot land in another.
#[derive(Debug, Clone, Default)]
pub(crate) struct TokenSlot {
    pub(crate) token: Option<String>,
    pub(crate) generation: u64,
}

struct ClientInner {
    http: Client,
    base_url: String,
    token: RwLock<TokenSlot>,
    store: Arc<dyn SessionStore>,
    sign_out: SignOutHook,
    refresh: RefreshCoordinator,
}

/// Authenticated API client.
/// Clone is cheap - all clones share the token, the connection pool and
/// the refresh coordinator.
#[derive(Clone)]
pub struct ApiClient {
    inner: Arc<ClientInner>,
}

impl ApiClient {
    /// Create a client for the API in `config`, persisting rotated tokens to `store`.
    pub fn new(config: &Config, store: Arc<dyn SessionStore>) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                http,
                base_url: config.base_url().to_string(),
                token: RwLock::new(TokenSlot::default()),
                store,
                sign_out: SignOutHook::new(),
                refresh: RefreshCoordinator::new(config.refresh_timeout()),
            }),
        })
    }

    // ===== Token and collaborators =====

    /// Set the bearer token for authenticated requests
    pub fn set_token(&self, token: String) {
        let mut slot = self.inner.token.write().unwrap_or_else(PoisonError::into_inner);
        slot.token = Some(token);
        slot.generation += 1;
    }

    pub fn clear_token(&self) {
        let mut slot = self.inner.token.write().unwrap_or_else(PoisonError::into_inner);
        slot.token = None;
        slot.generation += 1;
    }

    pub fn current_token(&self) -> Option<String> {
        self.token_slot().token
    }

    pub(crate) fn token_slot(&self) -> TokenSlot {
        self.inner
            .token
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Persist and install a rotated token pair, unless the session changed
    /// since `generation` was observed. The store write happens under the
    /// token lock so a concurrent sign-out always clears after it.
    pub(crate) fn install_rotated_tokens(&self, generation: u64, tokens: &TokenPair) -> bool {
        let mut slot = self.inner.token.write().unwrap_or_else(PoisonError::into_inner);
        if slot.generation != generation {
            return false;
        }
        if let Err(e) = self.inner.store.save_tokens(tokens) {
            warn!(error = %e, "Failed to persist refreshed tokens");
        }
        slot.token = Some(tokens.token.clone());
        slot.generation += 1;
        true
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.inner.store
    }

    /// The hook fired whenever the session must be torn down.
    pub fn sign_out_hook(&self) -> &SignOutHook {
        &self.inner.sign_out
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.refresh.is_refreshing()
    }

    /// Requests currently waiting on the in-flight refresh.
    pub fn refresh_queue_len(&self) -> usize {
        self.inner.refresh.queued_len()
    }

    pub fn base_url(&self) -> &str {
        &self.inner.base_url
    }

    pub(crate) fn refresh_coordinator(&self) -> &RefreshCoordinator {
        &self.inner.refresh
    }

    pub(crate) fn force_sign_out(&self) {
        self.inner.sign_out.fire();
    }

    // ===== Pipeline =====

    /// Send a request. Expired-token failures are refreshed and replayed
    /// transparently; the caller sees a single result.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        self.dispatch(request, Attempt::FIRST).await
    }

    /// Boxed because a dispatch may enter the coordinator, whose refresh
    /// task dispatches replays in turn.
    pub(crate) fn dispatch(&self, request: ApiRequest, attempt: Attempt) -> BoxFuture<'static, Outcome> {
        let client = self.clone();
        async move {
            let sent_with = if request.is_anonymous() {
                None
            } else {
                client.current_token()
            };

            let (status, body) = client.execute(&request, sent_with.as_deref()).await?;

            if status.is_success() {
                return Ok(ApiResponse { status, body });
            }

            if status == StatusCode::UNAUTHORIZED && !request.is_anonymous() {
                return client.handle_unauthorized(request, attempt, sent_with, &body).await;
            }

            Err(ApiError::from_status(status, &body))
        }
        .boxed()
    }

    async fn handle_unauthorized(
        &self,
        request: ApiRequest,
        attempt: Attempt,
        sent_with: Option<String>,
        body: &str,
    ) -> Outcome {
        if !is_refreshable_401(body) {
            let message = ApiError::server_message(body).unwrap_or_else(|| "unauthorized".to_string());
            warn!(path = %request.path, message = %message, "Request rejected, signing out");
            self.force_sign_out();
            return Err(ApiError::Auth(AuthFailure::Rejected(message)));
        }

        if !attempt.may_refresh() {
            warn!(path = %request.path, "Token still rejected after refreshing, signing out");
            self.force_sign_out();
            return Err(ApiError::Auth(AuthFailure::ReplayRejected));
        }

        debug!(path = %request.path, ?attempt, "Access token expired");
        self.inner.refresh.handle(self, request, attempt, sent_with).await
    }

    /// One HTTP exchange, retrying on 429. Returns the status and body text.
    async fn execute(&self, request: &ApiRequest, token: Option<&str>) -> Result<(StatusCode, String), ApiError> {
        let url = format!("{}{}", self.inner.base_url, request.path);
        let mut retries = 0;
        let mut backoff_ms = INITIAL_BACKOFF_MS;

        loop {
            let mut builder = self.inner.http.request(request.method.clone(), &url);
            if let Some(token) = token {
                builder = builder.bearer_auth(token);
            }
            if let Some(ref body) = request.body {
                builder = builder.json(body);
            }

            let response = builder.send().await?;
            let status = response.status();

            if status == StatusCode::TOO_MANY_REQUESTS && retries < MAX_RATE_LIMIT_RETRIES {
                retries += 1;
                warn!(url = %url, retry = retries, backoff_ms = backoff_ms, "Rate limited, backing off");
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
                backoff_ms *= 2; // Exponential backoff
                continue;
            }

            let body = response.text().await?;
            return Ok((status, body));
        }
    }

    /// Exchange a refresh token for a new token pair. Never escalated.
    pub(crate) async fn refresh_tokens(&self, refresh_token: &str) -> Result<TokenPair, ApiError> {
        let request = ApiRequest::post(REFRESH_PATH)
            .anonymous()
            .json(&serde_json::json!({ "refresh_token": refresh_token }))?;

        let (status, body) = self.execute(&request, None).await?;
        if !status.is_success() {
            let reason = ApiError::server_message(&body)
                .unwrap_or_else(|| format!("refresh endpoint returned {status}"));
            return Err(ApiError::RefreshFailed(reason));
        }

        serde_json::from_str(&body)
            .map_err(|e| ApiError::RefreshFailed(format!("malformed refresh response: {e}")))
    }

    // ===== Endpoints =====

    /// `POST /sessions`. Does not touch the client's token.
    pub async fn sign_in_request(&self, email: &str, password: &str) -> Result<SignInResponse, ApiError> {
        let request = ApiRequest::post(SIGN_IN_PATH)
            .anonymous()
            .json(&serde_json::json!({ "email": email, "password": password }))?;
        self.send(request).await?.json()
    }

    /// `POST /users` - register a new account.
    pub async fn create_user(&self, name: &str, email: &str, password: &str) -> Result<(), ApiError> {
        let request = ApiRequest::post("/users")
            .anonymous()
            .json(&serde_json::json!({ "name": name, "email": email, "password": password }))?;
        self.send(request).await?;
        Ok(())
    }

    /// `PUT /users` - change name and, optionally, password.
    pub async fn update_user(&self, update: &UserUpdate) -> Result<(), ApiError> {
        self.send(ApiRequest::put("/users").json(update)?).await?;
        Ok(())
    }

    /// Muscle groups available in the catalog
    pub async fn fetch_groups(&self) -> Result<Vec<String>, ApiError> {
        self.send(ApiRequest::get("/groups")).await?.json()
    }

    pub async fn fetch_exercises_by_group(&self, group: &str) -> Result<Vec<Exercise>, ApiError> {
        self.send(ApiRequest::get(format!("/exercises/bygroup/{group}")))
            .await?
            .json()
    }

    pub async fn fetch_exercise(&self, exercise_id: &str) -> Result<Exercise, ApiError> {
        self.send(ApiRequest::get(format!("/exercises/{exercise_id}")))
            .await?
            .json()
    }

    /// Training history, grouped by day (most recent first)
    pub async fn fetch_history(&self) -> Result<Vec<HistoryDay>, ApiError> {
        self.send(ApiRequest::get("/history")).await?.json()
    }

    /// Record that the user completed an exercise
    pub async fn register_history(&self, exercise_id: &str) -> Result<(), ApiError> {
        let request =
            ApiRequest::post("/history").json(&serde_json::json!({ "exercise_id": exercise_id }))?;
        self.send(request).await?;
        Ok(())
    }

    // ===== Media =====

    pub fn exercise_demo_url(&self, demo: &str) -> String {
        format!("{}/exercise/demo/{}", self.inner.base_url, demo)
    }

    pub fn exercise_thumb_url(&self, thumb: &str) -> String {
        format!("{}/exercise/thumb/{}", self.inner.base_url, thumb)
    }

    pub fn avatar_url(&self, avatar: &str) -> String {
        format!("{}/avatar/{}", self.inner.base_url, avatar)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::MemoryStore;

    fn client() -> ApiClient {
        ApiClient::new(
            &Config::for_api("http://gym.local:3333/"),
            Arc::new(MemoryStore::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_token_set_and_clear() {
        let client = client();
        assert!(client.current_token().is_none());

        client.set_token("T1".to_string());
        let clone = client.clone();
        assert_eq!(clone.current_token().as_deref(), Some("T1"));

        clone.clear_token();
        assert!(client.current_token().is_none());
    }

    #[test]
    fn test_rotation_refused_after_session_change() {
        let store = Arc::new(MemoryStore::new());
        let client =
            ApiClient::new(&Config::for_api("http://gym.local:3333"), store.clone()).unwrap();
        client.set_token("T1".to_string());
        let observed = client.token_slot().generation;

        client.clear_token();
        let tokens = TokenPair {
            token: "T2".to_string(),
            refresh_token: "R2".to_string(),
        };
        assert!(!client.install_rotated_tokens(observed, &tokens));
        assert!(client.current_token().is_none());
        assert!(store.is_empty());

        let observed = client.token_slot().generation;
        assert!(client.install_rotated_tokens(observed, &tokens));
        assert_eq!(client.current_token().as_deref(), Some("T2"));
        assert_ne!(client.token_slot().generation, observed);
    }

    #[test]
    fn test_media_urls() {
        let client = client();
        assert_eq!(
            client.exercise_thumb_url("squat.png"),
            "http://gym.local:3333/exercise/thumb/squat.png"
        );
        assert_eq!(
            client.exercise_demo_url("squat.gif"),
            "http://gym.local:3333/exercise/demo/squat.gif"
        );
        assert_eq!(client.avatar_url("me.jpg"), "http://gym.local:3333/avatar/me.jpg");
    }

    #[test]
    fn test_sign_in_response_tolerates_missing_fields() {
        let parsed: SignInResponse = serde_json::from_str(r#"{"token": "T1"}"#).unwrap();
        assert!(parsed.user.is_none());
        assert_eq!(parsed.token.as_deref(), Some("T1"));
        assert!(parsed.refresh_token.is_none());
    }
}
