//! Session lifecycle: sign-in, sign-up, sign-out, restore and profile edits.
//!
//! The manager is the single writer of the session store outside token
//! rotation, and the single implementation of sign-out: it registers itself
//! on the client's sign-out hook so a forced sign-out from the pipeline goes
//! through exactly the same code as a user pressing "sign out".

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::session::{Session, SessionStatus, TokenPair};
use super::store::{SessionStore, StorageKey};
use crate::api::{ApiClient, ApiError, SignOutRegistration};
use crate::models::{ProfilePatch, UserProfile, UserUpdate};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("Session storage failed: {0:#}")]
    Storage(#[from] anyhow::Error),

    #[error("No user is signed in")]
    NotSignedIn,
}

struct ManagerInner {
    client: ApiClient,
    store: Arc<dyn SessionStore>,
    session: Mutex<Option<Session>>,
    status: watch::Sender<SessionStatus>,
}

pub struct SessionManager {
    inner: Arc<ManagerInner>,
    _registration: SignOutRegistration,
}

impl SessionManager {
    /// Create a manager for `client` and register it as the client's sign-out callback.
    /// Status starts as `Loading` until `restore_session` runs.
    pub fn new(client: ApiClient) -> Self {
        let (status, _) = watch::channel(SessionStatus::Loading);
        let inner = Arc::new(ManagerInner {
            store: Arc::clone(client.store()),
            client,
            session: Mutex::new(None),
            status,
        });

        let weak: Weak<ManagerInner> = Arc::downgrade(&inner);
        let registration = inner.client.sign_out_hook().register(move || {
            if let Some(inner) = weak.upgrade() {
                if let Err(e) = inner.sign_out() {
                    error!(error = %e, "Forced sign-out could not clear session storage");
                }
            }
        });

        Self {
            inner,
            _registration: registration,
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.inner.client
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    pub fn status(&self) -> SessionStatus {
        self.inner.status.borrow().clone()
    }

    /// The current session; tokens reflect the latest rotation.
    pub fn session(&self) -> Option<Session> {
        let mut session = self.inner.lock_session().clone()?;
        if let Some(token) = self.inner.client.current_token() {
            session.token = token;
        }
        match self.inner.store.get(StorageKey::RefreshToken) {
            Ok(Some(refresh_token)) => session.refresh_token = Some(refresh_token),
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Could not read refresh token from session storage"),
        }
        Some(session)
    }

    pub fn is_signed_in(&self) -> bool {
        self.inner.lock_session().is_some()
    }

    /// Sign in with email and password. Nothing is mutated unless the
    /// server returns a complete payload and it is persisted.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, SessionError> {
        let response = self.inner.client.sign_in_request(email, password).await?;

        let (user, tokens) = match (response.user, response.token, response.refresh_token) {
            (Some(user), Some(token), Some(refresh_token)) => (
                user,
                TokenPair {
                    token,
                    refresh_token,
                },
            ),
            _ => {
                return Err(ApiError::InvalidResponse(
                    "incomplete authentication data".to_string(),
                )
                .into())
            }
        };

        if let Err(e) = self.inner.persist(&user, &tokens) {
            if let Err(cleanup) = self.inner.store.clear() {
                warn!(error = %cleanup, "Could not roll back partial session write");
            }
            return Err(e.into());
        }

        let session = Session::new(user, tokens);
        self.inner.publish(session.clone());
        info!(user_id = %session.user.id, "Signed in");
        Ok(session)
    }

    /// Create an account, then sign in with it.
    pub async fn sign_up(&self, name: &str, email: &str, password: &str) -> Result<Session, SessionError> {
        self.inner.client.create_user(name, email, password).await?;
        self.sign_in(email, password).await
    }

    /// Idempotent; safe to call when already signed out.
    pub fn sign_out(&self) -> Result<(), SessionError> {
        self.inner.sign_out().map_err(SessionError::from)
    }

    /// Read persisted state at startup. Publishes `SignedIn` when both an
    /// access token and a profile are stored, `SignedOut` otherwise.
    pub fn restore_session(&self) -> Result<Option<Session>, SessionError> {
        self.inner.status.send_replace(SessionStatus::Loading);

        let loaded = self.inner.load_persisted();
        match loaded {
            Ok(Some(session)) => {
                self.inner.publish(session.clone());
                info!(user_id = %session.user.id, "Session restored");
                Ok(Some(session))
            }
            Ok(None) => {
                debug!("No stored session");
                self.inner.status.send_replace(SessionStatus::SignedOut);
                Ok(None)
            }
            Err(e) => {
                error!(error = %e, "Failed to load stored session");
                self.inner.status.send_replace(SessionStatus::SignedOut);
                Err(e.into())
            }
        }
    }

    /// Merge `patch` into the signed-in profile and persist it. Tokens are untouched.
    pub fn update_profile(&self, patch: ProfilePatch) -> Result<UserProfile, SessionError> {
        let mut guard = self.inner.lock_session();
        let session = guard.as_mut().ok_or(SessionError::NotSignedIn)?;

        let mut user = session.user.clone();
        user.apply(patch);
        self.inner.store.save_user(&user)?;

        session.user = user.clone();
        drop(guard);

        self.inner
            .status
            .send_replace(SessionStatus::SignedIn(user.clone()));
        debug!(user_id = %user.id, "Profile updated");
        Ok(user)
    }

    /// `PUT /users`, then mirror the new name into the local profile.
    pub async fn update_account(&self, update: UserUpdate) -> Result<UserProfile, SessionError> {
        if !self.is_signed_in() {
            return Err(SessionError::NotSignedIn);
        }
        self.inner.client.update_user(&update).await?;
        self.update_profile(ProfilePatch {
            name: Some(update.name),
            ..ProfilePatch::default()
        })
    }
}

impl ManagerInner {
    fn lock_session(&self) -> MutexGuard<'_, Option<Session>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn persist(&self, user: &UserProfile, tokens: &TokenPair) -> anyhow::Result<()> {
        self.store.save_user(user)?;
        self.store.save_tokens(tokens)
    }

    fn load_persisted(&self) -> anyhow::Result<Option<Session>> {
        let user = self.store.user()?;
        let token = self.store.get(StorageKey::AccessToken)?;
        let refresh_token = self.store.get(StorageKey::RefreshToken)?;

        Ok(match (user, token) {
            (Some(user), Some(token)) => Some(Session {
                user,
                token,
                refresh_token,
                signed_in_at: chrono::Utc::now(),
            }),
            _ => None,
        })
    }

    fn publish(&self, session: Session) {
        self.client.set_token(session.token.clone());
        let user = session.user.clone();
        *self.lock_session() = Some(session);
        self.status.send_replace(SessionStatus::SignedIn(user));
    }

    fn sign_out(&self) -> anyhow::Result<()> {
        let was_signed_in = self.lock_session().take().is_some();
        self.client.clear_token();
        self.status.send_replace(SessionStatus::SignedOut);
        let cleared = self.store.clear();
        if was_signed_in {
            info!("Signed out");
        }
        cleared
    }
}
