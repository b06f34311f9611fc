//! Single-flight access token refresh.
//!
//! When a protected request comes back `401 token.expired`, the pipeline
//! hands it to the `RefreshCoordinator`. The first such request while the
//! coordinator is idle becomes the driver: it flips the state to refreshing
//! and starts the one refresh call. Every request that fails the same way
//! while that call is outstanding is queued. When the call completes, the
//! driver and then each queued request are replayed in arrival order with
//! the new token; if it fails, all of them are rejected with
//! `RefreshFailed` and the session is signed out once.
//!
//! A refresh only lands in the session it started from. If the session is
//! signed out or replaced while the call is outstanding, the new tokens are
//! dropped and every waiter gets `Auth(SessionEnded)`.
//!
//! The check-and-flip on the state is the only critical section. The
//! refresh call and the replays run without holding the lock.

use std::collections::VecDeque;
use std::iter;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::client::{ApiClient, TokenSlot};
use super::request::{ApiRequest, ApiResponse, Attempt};
use super::{ApiError, AuthFailure};
use crate::auth::StorageKey;

pub(crate) type Outcome = Result<ApiResponse, ApiError>;

/// A request blocked on an in-flight refresh.
struct PendingRequest {
    id: u64,
    request: ApiRequest,
    attempt: Attempt,
    reply: oneshot::Sender<Outcome>,
}

/// Invariant: `queue` is non-empty only while `refreshing` is true.
#[derive(Default)]
struct RefreshState {
    refreshing: bool,
    queue: VecDeque<PendingRequest>,
}

/// What a request hitting an expired token should do next.
enum Admission {
    /// A refresh completed after this request was sent; replay right away.
    Replay(ApiRequest, Attempt),
    /// This request flipped the state and must run the refresh for the
    /// session generation it observed.
    Drive(PendingRequest, u64, oneshot::Receiver<Outcome>),
    /// A refresh is in flight; wait for it.
    Queued(QueueTicket, oneshot::Receiver<Outcome>),
}

/// Removes a queued request if its caller stops waiting.
struct QueueTicket {
    state: Arc<Mutex<RefreshState>>,
    id: u64,
}

impl Drop for QueueTicket {
    fn drop(&mut self) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let before = state.queue.len();
        state.queue.retain(|pending| pending.id != self.id);
        if state.queue.len() != before {
            debug!(id = self.id, "Cancelled request removed from refresh queue");
        }
    }
}

pub struct RefreshCoordinator {
    state: Arc<Mutex<RefreshState>>,
    next_id: AtomicU64,
    timeout: Duration,
}

impl RefreshCoordinator {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: Arc::new(Mutex::new(RefreshState::default())),
            next_id: AtomicU64::new(0),
            timeout,
        }
    }

    pub fn is_refreshing(&self) -> bool {
        self.lock().refreshing
    }

    pub fn queued_len(&self) -> usize {
        self.lock().queue.len()
    }

    fn lock(&self) -> MutexGuard<'_, RefreshState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve a request that failed with a refreshable `401`.
    ///
    /// `sent_with` is the token the failing request carried.
    pub(crate) async fn handle(
        &self,
        client: &ApiClient,
        request: ApiRequest,
        attempt: Attempt,
        sent_with: Option<String>,
    ) -> Outcome {
        let refresh_token = match client.store().get(StorageKey::RefreshToken) {
            Ok(Some(token)) => token,
            Ok(None) => {
                warn!(path = %request.path, "Token expired and no refresh token stored, signing out");
                client.force_sign_out();
                return Err(ApiError::Auth(AuthFailure::NoRefreshToken));
            }
            Err(e) => {
                warn!(error = %e, "Could not read refresh token, signing out");
                client.force_sign_out();
                return Err(ApiError::Auth(AuthFailure::NoRefreshToken));
            }
        };

        match self.admit(request, attempt, sent_with.as_deref(), || client.token_slot()) {
            Admission::Replay(request, attempt) => {
                debug!(path = %request.path, "Token already rotated, replaying");
                client.dispatch(request, attempt).await
            }
            Admission::Drive(driver, generation, reply) => {
                tokio::spawn(run_cycle(client.clone(), refresh_token, generation, driver));
                reply.await.unwrap_or_else(|_| Err(abandoned()))
            }
            Admission::Queued(ticket, reply) => {
                let outcome = reply.await.unwrap_or_else(|_| Err(abandoned()));
                drop(ticket);
                outcome
            }
        }
    }

    /// The critical section: decide between replay, drive and queue, and
    /// flip `refreshing` if driving. `token_slot` is read under the lock.
    fn admit<F>(
        &self,
        request: ApiRequest,
        attempt: Attempt,
        sent_with: Option<&str>,
        token_slot: F,
    ) -> Admission
    where
        F: FnOnce() -> TokenSlot,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply, receiver) = oneshot::channel();
        let pending = PendingRequest {
            id,
            request,
            attempt,
            reply,
        };

        let mut state = self.lock();
        if state.refreshing {
            state.queue.push_back(pending);
            debug!(id, queued = state.queue.len(), "Request queued behind in-flight refresh");
            let ticket = QueueTicket {
                state: Arc::clone(&self.state),
                id,
            };
            return Admission::Queued(ticket, receiver);
        }

        let slot = token_slot();
        if slot.token.is_some() && slot.token.as_deref() != sent_with {
            return Admission::Replay(pending.request, attempt.replayed());
        }

        state.refreshing = true;
        debug!(id, generation = slot.generation, "Refresh started");
        Admission::Drive(pending, slot.generation, receiver)
    }

    /// Leave the refreshing state, handing back everything that queued up.
    fn finish(&self) -> VecDeque<PendingRequest> {
        let mut state = self.lock();
        state.refreshing = false;
        std::mem::take(&mut state.queue)
    }
}

fn abandoned() -> ApiError {
    ApiError::Transport("refresh task ended without a result".to_string())
}

/// Runs on its own task so a cancelled driver cannot leave the coordinator
/// stuck in the refreshing state.
async fn run_cycle(
    client: ApiClient,
    refresh_token: String,
    generation: u64,
    driver: PendingRequest,
) {
    let coordinator = client.refresh_coordinator();
    let result = match tokio::time::timeout(
        coordinator.timeout,
        client.refresh_tokens(&refresh_token),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(ApiError::RefreshFailed(format!(
            "refresh timed out after {}ms",
            coordinator.timeout.as_millis()
        ))),
    };

    match result {
        Ok(tokens) => {
            if !client.install_rotated_tokens(generation, &tokens) {
                let queue = coordinator.finish();
                warn!(
                    rejected = queue.len() + 1,
                    "Session changed during refresh, discarding new tokens"
                );
                let error = ApiError::Auth(AuthFailure::SessionEnded);
                for pending in iter::once(driver).chain(queue) {
                    let _ = pending.reply.send(Err(error.clone()));
                }
                return;
            }

            let queue = coordinator.finish();
            info!(released = queue.len() + 1, "Access token refreshed");

            for pending in iter::once(driver).chain(queue) {
                if pending.reply.is_closed() {
                    debug!(id = pending.id, "Skipping replay for cancelled request");
                    continue;
                }
                let outcome = client
                    .dispatch(pending.request, pending.attempt.replayed())
                    .await;
                let _ = pending.reply.send(outcome);
            }
        }
        Err(e) => {
            let reason = match e {
                ApiError::RefreshFailed(reason) => reason,
                other => other.to_string(),
            };
            let queue = coordinator.finish();
            warn!(rejected = queue.len() + 1, reason = %reason, "Token refresh failed, signing out");

            // A session started after this refresh began is not ours to end.
            if client.token_slot().generation == generation {
                client.force_sign_out();
            }

            let error = ApiError::RefreshFailed(reason);
            for pending in iter::once(driver).chain(queue) {
                let _ = pending.reply.send(Err(error.clone()));
            }
        }
    }
}
