//! Single-flight access token refresh.
//!
//! The [`RefreshCoordinator`] collapses concurrent refresh demand into one
//! network call. It is a two-state machine:
//!
//! ```text
//!            request_refresh()
//!   Idle ─────────────────────────▶ Refreshing { waiters }
//!    ▲                                   │   request_refresh() while here
//!    │                                   │   pushes a waiter, no network call
//!    └──── settle(outcome) ◀─────────────┘
//!          every waiter receives the same outcome
//! ```
//!
//! Settling takes the waiter list and returns to `Idle` under one lock, so no
//! caller can see `Idle` while undrained waiters exist. A drop guard settles
//! with [`PelotonError::RefreshAborted`] if the refreshing future is dropped
//! or panics, so the state never stays `Refreshing`.
//!
//! Construct one coordinator per application and share it by `Arc`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::future::BoxFuture;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tracing::{debug, info, info_span, warn, Instrument};

use super::lifecycle::{SessionLifecycle, TerminationReason};
use super::storage::SessionStore;
use super::token;
use crate::error::{PelotonError, PelotonResult};

/// Tokens minted by the refresh endpoint.
#[derive(Clone)]
pub struct RefreshedTokens {
    /// The new access token.
    pub access_token: SecretString,
    /// A rotated refresh token, if the backend issued one.
    pub refresh_token: Option<SecretString>,
}

impl std::fmt::Debug for RefreshedTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RefreshedTokens")
            .field("access_token", &"[REDACTED]")
            .field("rotated", &self.refresh_token.is_some())
            .finish()
    }
}

/// Performs the refresh network call.
pub trait RefreshTransport: Send + Sync {
    /// Exchanges `refresh_token` for new tokens.
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a SecretString,
    ) -> BoxFuture<'a, PelotonResult<RefreshedTokens>>;
}

/// What to do with the stored session when a refresh fails for a reason
/// other than the refresh credential being dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TransientRefreshPolicy {
    /// Clear the tokens and send the user to the login route.
    #[default]
    #[serde(rename = "clear")]
    ClearSession,
    /// Leave the tokens in place; the next request will try again.
    #[serde(rename = "keep")]
    KeepSession,
}

/// How a failed refresh call is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshFailure {
    /// The refresh credential is invalid or expired; the session is over.
    CredentialRejected,
    /// Anything else: network trouble, server errors, malformed responses.
    Transient,
}

/// Classifies an error returned by the refresh endpoint.
#[must_use]
pub fn classify_refresh_failure(err: &PelotonError) -> RefreshFailure {
    match err {
        PelotonError::Unauthorized { .. } | PelotonError::RefreshTokenRejected { .. } => {
            RefreshFailure::CredentialRejected
        }
        PelotonError::Http { status: 403, .. } => RefreshFailure::CredentialRejected,
        _ => RefreshFailure::Transient,
    }
}

type Waiter = oneshot::Sender<PelotonResult<SecretString>>;

enum State {
    Idle,
    Refreshing { waiters: Vec<Waiter> },
}

/// Serializes access token refreshes into at most one in-flight call.
pub struct RefreshCoordinator {
    store: Arc<dyn SessionStore>,
    transport: Arc<dyn RefreshTransport>,
    lifecycle: Arc<SessionLifecycle>,
    policy: TransientRefreshPolicy,
    state: Mutex<State>,
    network_refreshes: AtomicUsize,
}

impl RefreshCoordinator {
    /// Creates an idle coordinator.
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        transport: Arc<dyn RefreshTransport>,
        lifecycle: Arc<SessionLifecycle>,
    ) -> Self {
        Self {
            store,
            transport,
            lifecycle,
            policy: TransientRefreshPolicy::default(),
            state: Mutex::new(State::Idle),
            network_refreshes: AtomicUsize::new(0),
        }
    }

    /// Sets how transient refresh failures treat the stored session.
    #[must_use]
    pub fn with_transient_policy(mut self, policy: TransientRefreshPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Returns true while a refresh call is in flight.
    #[must_use]
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.lock_state(), State::Refreshing { .. })
    }

    /// Returns the number of callers waiting on the in-flight refresh.
    #[must_use]
    pub fn pending_waiters(&self) -> usize {
        match &*self.lock_state() {
            State::Refreshing { waiters } => waiters.len(),
            State::Idle => 0,
        }
    }

    /// Returns how many refresh network calls this coordinator has started.
    #[must_use]
    pub fn refresh_count(&self) -> usize {
        self.network_refreshes.load(Ordering::Relaxed)
    }

    /// Obtains a new access token, sharing any refresh already in flight.
    ///
    /// # Errors
    ///
    /// - `MissingRefreshToken` / `RefreshTokenExpired` when no usable refresh
    ///   token is stored (the session is force-logged-out)
    /// - `RefreshTokenRejected` when the backend refuses the refresh token
    ///   (the session is force-logged-out)
    /// - the transport error for transient failures
    /// - `RefreshAborted` if the in-flight refresh was abandoned
    /// - `SessionEnded` if the session was cleared or replaced before the
    ///   new tokens arrived (they are discarded)
    pub async fn request_refresh(&self) -> PelotonResult<SecretString> {
        let queued = {
            let mut state = self.lock_state();
            match &mut *state {
                State::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Some(rx)
                }
                State::Idle => {
                    *state = State::Refreshing {
                        waiters: Vec::new(),
                    };
                    None
                }
            }
        };

        if let Some(rx) = queued {
            debug!("Refresh already in flight, waiting for its outcome");
            return rx.await.unwrap_or(Err(PelotonError::RefreshAborted));
        }

        let mut guard = SettleGuard {
            coordinator: self,
            settled: false,
        };
        let outcome = self
            .run_refresh()
            .instrument(info_span!("token_refresh"))
            .await;
        guard.settle(outcome.clone());
        outcome
    }

    async fn run_refresh(&self) -> PelotonResult<SecretString> {
        let session = self.store.load()?;

        let Some(refresh_token) = session.and_then(|s| s.refresh_token().cloned()) else {
            self.lifecycle
                .force_logout(TerminationReason::MissingRefreshToken);
            return Err(PelotonError::MissingRefreshToken);
        };

        if token::is_expired(refresh_token.expose_secret()) {
            self.lifecycle
                .force_logout(TerminationReason::RefreshTokenExpired);
            return Err(PelotonError::RefreshTokenExpired);
        }

        self.network_refreshes.fetch_add(1, Ordering::Relaxed);
        info!("Refreshing access token");

        match self.transport.refresh(&refresh_token).await {
            Ok(tokens) => {
                let rotated = tokens.refresh_token.is_some();
                let swapped = self.store.update_access_token(
                    &refresh_token,
                    tokens.access_token.clone(),
                    tokens.refresh_token,
                )?;
                if swapped.is_none() {
                    info!("Session ended during refresh, discarding new tokens");
                    return Err(PelotonError::SessionEnded);
                }
                debug!(rotated, "Access token refreshed");
                Ok(tokens.access_token)
            }
            Err(err) => match classify_refresh_failure(&err) {
                RefreshFailure::CredentialRejected => {
                    warn!(error = %err, "Refresh token rejected by backend");
                    self.lifecycle
                        .force_logout(TerminationReason::RefreshTokenRejected);
                    Err(PelotonError::refresh_rejected(rejection_message(err)))
                }
                RefreshFailure::Transient => {
                    warn!(error = %err, policy = ?self.policy, "Token refresh failed");
                    if self.policy == TransientRefreshPolicy::ClearSession {
                        self.lifecycle
                            .end_session(TerminationReason::RefreshUnavailable);
                    }
                    Err(err)
                }
            },
        }
    }

    /// Returns to `Idle` and hands `outcome` to every waiter.
    fn settle(&self, outcome: &PelotonResult<SecretString>) {
        let waiters = match std::mem::replace(&mut *self.lock_state(), State::Idle) {
            State::Refreshing { waiters } => waiters,
            State::Idle => Vec::new(),
        };

        if !waiters.is_empty() {
            debug!(waiters = waiters.len(), "Releasing queued refresh callers");
        }
        for waiter in waiters {
            // A waiter whose caller went away is not an error.
            let _ = waiter.send(outcome.clone());
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn rejection_message(err: PelotonError) -> String {
    match err {
        PelotonError::Unauthorized { message }
        | PelotonError::RefreshTokenRejected { message }
        | PelotonError::Http { message, .. } => message,
        other => other.to_string(),
    }
}

/// Guarantees the coordinator leaves `Refreshing` however the leader exits.
struct SettleGuard<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl SettleGuard<'_> {
    fn settle(&mut self, outcome: PelotonResult<SecretString>) {
        self.settled = true;
        self.coordinator.settle(&outcome);
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if !self.settled {
            warn!("Token refresh abandoned before completion");
            self.coordinator.settle(&Err(PelotonError::RefreshAborted));
        }
    }
}
