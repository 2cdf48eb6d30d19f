//! Session lifecycle policy.
//!
//! Decides what ending a session means and tells the presentation layer
//! about it. Navigation is not performed here: the controller broadcasts a
//! [`SessionEvent`] carrying the route the UI should move to, and whoever
//! owns navigation subscribes to it.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use peloton::auth::lifecycle::{SessionEvent, SessionLifecycle, TerminationReason};
//! use peloton::auth::storage::MemoryStore;
//!
//! let lifecycle = SessionLifecycle::new(Arc::new(MemoryStore::new()));
//! let mut events = lifecycle.subscribe();
//!
//! lifecycle.force_logout(TerminationReason::RefreshTokenExpired);
//!
//! assert_eq!(
//!     events.try_recv().unwrap(),
//!     SessionEvent::Terminated {
//!         reason: TerminationReason::RefreshTokenExpired,
//!         redirect: Some("/auth".to_string()),
//!     }
//! );
//! ```

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::storage::SessionStore;
use super::Session;
use crate::error::PelotonResult;

/// Default login route of the console.
pub const DEFAULT_LOGIN_ROUTE: &str = "/auth";

/// Capacity of the session event channel.
const EVENT_CAPACITY: usize = 16;

/// External identity provider that issued the credentials the backend verified.
///
/// Signing out of it is always best-effort.
#[cfg_attr(test, mockall::automock)]
pub trait IdentityProvider: Send + Sync {
    /// Ends the provider-side session.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider could not be reached.
    fn sign_out(&self) -> PelotonResult<()>;
}

/// Why a session ended without the user asking for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationReason {
    /// A refresh was needed but no refresh token was stored.
    MissingRefreshToken,
    /// The stored refresh token was past its own expiry.
    RefreshTokenExpired,
    /// The backend rejected the refresh token.
    RefreshTokenRejected,
    /// The refresh call failed for a reason unrelated to the credential.
    RefreshUnavailable,
    /// An authentication endpoint rejected the credential it was given.
    AuthEndpointRejected,
}

impl TerminationReason {
    /// Returns `true` if the credential itself is dead, as opposed to the
    /// refresh call merely failing.
    #[must_use]
    pub fn is_security_event(self) -> bool {
        !matches!(self, Self::RefreshUnavailable)
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::MissingRefreshToken => "no refresh token stored",
            Self::RefreshTokenExpired => "refresh token expired",
            Self::RefreshTokenRejected => "refresh token rejected",
            Self::RefreshUnavailable => "token refresh unavailable",
            Self::AuthEndpointRejected => "credentials rejected",
        };
        f.write_str(text)
    }
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A login, registration or verification stored a new session.
    Established,
    /// The session ended on its own.
    Terminated {
        /// Why it ended.
        reason: TerminationReason,
        /// Route to navigate to, `None` when already on the login route.
        redirect: Option<String>,
    },
    /// The user logged out.
    LoggedOut,
}

/// Owns the policy for creating and tearing down sessions.
pub struct SessionLifecycle {
    store: Arc<dyn SessionStore>,
    identity: Option<Arc<dyn IdentityProvider>>,
    events: broadcast::Sender<SessionEvent>,
    login_route: String,
    current_route: Mutex<Option<String>>,
}

impl SessionLifecycle {
    /// Creates a controller over `store` with the default login route.
    #[must_use]
    pub fn new(store: Arc<dyn SessionStore>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            store,
            identity: None,
            events,
            login_route: DEFAULT_LOGIN_ROUTE.to_string(),
            current_route: Mutex::new(None),
        }
    }

    /// Sets the identity provider to sign out of on logout.
    #[must_use]
    pub fn with_identity_provider(mut self, identity: Arc<dyn IdentityProvider>) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Sets the route that terminated sessions redirect to.
    #[must_use]
    pub fn with_login_route(mut self, route: impl Into<String>) -> Self {
        self.login_route = route.into();
        self
    }

    /// Returns the login route.
    #[must_use]
    pub fn login_route(&self) -> &str {
        &self.login_route
    }

    /// Subscribes to session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Records where the presentation layer currently is.
    pub fn set_current_route(&self, route: impl Into<String>) {
        *self
            .current_route
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(route.into());
    }

    /// Stores a freshly issued session and announces it.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn establish(&self, session: &Session) -> PelotonResult<()> {
        self.store.store(session)?;
        info!("Session established");
        self.emit(SessionEvent::Established);
        Ok(())
    }

    /// Ends the session because its credential is dead.
    ///
    /// Clears both tokens, signs out of the identity provider (failures are
    /// logged and discarded), and asks the UI to go to the login route.
    pub fn force_logout(&self, reason: TerminationReason) {
        warn!(%reason, "Forcing logout");
        self.clear_tokens();
        self.sign_out_identity();
        self.emit_terminated(reason);
    }

    /// Ends the session without the security framing of [`force_logout`](Self::force_logout).
    ///
    /// Tokens are cleared and the UI is sent to the login route, but the
    /// identity provider session is left alone.
    pub fn end_session(&self, reason: TerminationReason) {
        info!(%reason, "Ending session");
        self.clear_tokens();
        self.emit_terminated(reason);
    }

    /// Finishes a user-initiated logout once the server-side revoke was attempted.
    pub fn complete_logout(&self) {
        self.sign_out_identity();
        self.clear_tokens();
        info!("Logged out");
        self.emit(SessionEvent::LoggedOut);
    }

    fn clear_tokens(&self) {
        if let Err(e) = self.store.clear() {
            warn!(error = %e, "Failed to clear stored session");
        }
    }

    fn sign_out_identity(&self) {
        let Some(identity) = &self.identity else {
            return;
        };
        // Logout never fails because the provider is unreachable.
        if let Err(e) = identity.sign_out() {
            warn!(error = %e, "Identity provider sign-out failed");
        }
    }

    fn emit_terminated(&self, reason: TerminationReason) {
        let already_there = self
            .current_route
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_deref()
            .is_some_and(|route| is_on_route(route, &self.login_route));

        let redirect = (!already_there).then(|| self.login_route.clone());
        self.emit(SessionEvent::Terminated { reason, redirect });
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("No session event subscribers");
        }
    }
}

/// True if `route` is `target` itself or one of its sub-paths, with or
/// without a query string or fragment.
fn is_on_route(route: &str, target: &str) -> bool {
    let target = match target.trim_end_matches('/') {
        "" => "/",
        trimmed => trimmed,
    };
    match route.strip_prefix(target) {
        Some(rest) => rest.is_empty() || rest.starts_with(['/', '?', '#']),
        None => false,
    }
}
