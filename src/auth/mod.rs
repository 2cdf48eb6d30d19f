//! Session continuity for the admin console.
//!
//! The backend issues a short-lived access token and a long-lived refresh
//! token. This module keeps the pair valid for as long as the refresh token
//! allows, without the caller noticing:
//!
//! - [`token`] reads expiry from a token without verifying it
//! - [`storage`] persists the pair
//! - [`coordinator`] renews the access token, one network call at a time
//! - [`lifecycle`] decides what ending a session means
//!
//! # Architecture
//!
//! ```text
//! AuthManager::login(id_token)
//!     ↓
//! POST /v1/auth/verify → store tokens → SessionEvent::Established
//!     ↓
//! ApiClient::send(..)                      (every later request)
//!     ├─ token expiring soon → RefreshCoordinator::request_refresh
//!     └─ 401                 → refresh, replay once
//!                                  └─ refresh token dead → SessionLifecycle::force_logout
//! ```
//!
//! # Example
//!
//! ```no_run
//! use peloton::auth::AuthManager;
//! use peloton::config::Config;
//! use secrecy::SecretString;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let manager = AuthManager::from_config(&Config::default(), None)?;
//!
//!     let outcome = manager.login(&SecretString::from("firebase-id-token")).await?;
//!     if outcome.is_new_user {
//!         println!("Registration required");
//!     }
//!
//!     let events = manager.client().events().list(Default::default()).await?;
//!     println!("{} events", events.items.len());
//!     Ok(())
//! }
//! ```

pub mod coordinator;
pub mod lifecycle;
pub mod storage;
pub mod token;

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use secrecy::{ExposeSecret, SecretString};
use tracing::{info, warn};

use self::coordinator::RefreshCoordinator;
use self::lifecycle::{IdentityProvider, SessionLifecycle};
use self::storage::SessionStore;
use self::token::TokenStatus;
use crate::api::auth::{HttpRefreshTransport, RegisterUser, UserProfile};
use crate::api::client::ApiClient;
use crate::config::Config;
use crate::error::{PelotonError, PelotonResult};

/// The access and refresh token pair.
///
/// Tokens are held as [`SecretString`] and never appear in `Debug` output.
#[derive(Clone)]
pub struct Session {
    access_token: SecretString,
    refresh_token: Option<SecretString>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("access_expires_at", &self.access_expires_at())
            .finish()
    }
}

impl Session {
    /// Creates a session.
    #[must_use]
    pub fn new(access_token: SecretString, refresh_token: Option<SecretString>) -> Self {
        Self {
            access_token,
            refresh_token,
        }
    }

    /// Returns the access token.
    #[must_use]
    pub fn access_token(&self) -> &SecretString {
        &self.access_token
    }

    /// Returns the refresh token, if one was issued.
    #[must_use]
    pub fn refresh_token(&self) -> Option<&SecretString> {
        self.refresh_token.as_ref()
    }

    /// Returns when the access token expires, if it says.
    #[must_use]
    pub fn access_expires_at(&self) -> Option<SystemTime> {
        token::decode_expiry(self.access_token.expose_secret())
    }

    /// Returns when the refresh token expires, if it says.
    #[must_use]
    pub fn refresh_expires_at(&self) -> Option<SystemTime> {
        self.refresh_token
            .as_ref()
            .and_then(|t| token::decode_expiry(t.expose_secret()))
    }

    /// Returns true if the session can be renewed, i.e. a refresh token is held.
    ///
    /// A freshly verified but unregistered identity holds only a temporary
    /// access token and is not authenticated in this sense.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.refresh_token.is_some()
    }
}

/// What a login produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginOutcome {
    /// True if the identity still has to register.
    pub is_new_user: bool,
    /// The user's profile, when it could be fetched.
    pub profile: Option<UserProfile>,
}

/// Snapshot of the stored session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub logged_in: bool,
    pub access: TokenStatus,
    pub access_expires_in: Option<Duration>,
    pub refresh: Option<TokenStatus>,
    pub refresh_expires_in: Option<Duration>,
}

impl SessionStatus {
    fn logged_out() -> Self {
        Self {
            logged_in: false,
            access: TokenStatus::Unknown,
            access_expires_in: None,
            refresh: None,
            refresh_expires_in: None,
        }
    }
}

/// Login, registration and logout on top of the refresh-aware client.
pub struct AuthManager {
    client: Arc<ApiClient>,
    lifecycle: Arc<SessionLifecycle>,
}

impl AuthManager {
    /// Creates a manager over an existing client and lifecycle controller.
    ///
    /// Both must share the same session store.
    #[must_use]
    pub fn new(client: Arc<ApiClient>, lifecycle: Arc<SessionLifecycle>) -> Self {
        Self { client, lifecycle }
    }

    /// Wires store, lifecycle, coordinator and client from `config`.
    ///
    /// # Errors
    ///
    /// Returns `Config` for invalid settings and `Storage` if the store
    /// cannot be opened.
    pub fn from_config(
        config: &Config,
        identity: Option<Arc<dyn IdentityProvider>>,
    ) -> PelotonResult<Self> {
        config.validate()?;
        let store = config.open_store()?;

        let mut lifecycle =
            SessionLifecycle::new(store.clone()).with_login_route(config.login_route.clone());
        if let Some(identity) = identity {
            lifecycle = lifecycle.with_identity_provider(identity);
        }
        let lifecycle = Arc::new(lifecycle);

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| PelotonError::config(format!("failed to build HTTP client: {e}")))?;

        let transport = HttpRefreshTransport::new(http.clone(), &config.base_url, &config.auth_path);
        let coordinator = RefreshCoordinator::new(store.clone(), Arc::new(transport), lifecycle.clone())
            .with_transient_policy(config.on_transient_refresh_failure);

        let client = ApiClient::new(http, &config.base_url, store, Arc::new(coordinator))?
            .with_auth_path(config.auth_path.clone())
            .with_expiry_horizon(config.expiry_horizon);

        Ok(Self::new(Arc::new(client), lifecycle))
    }

    /// Returns the refresh-aware client.
    #[must_use]
    pub fn client(&self) -> &Arc<ApiClient> {
        &self.client
    }

    /// Returns the lifecycle controller.
    #[must_use]
    pub fn lifecycle(&self) -> &Arc<SessionLifecycle> {
        &self.lifecycle
    }

    fn store(&self) -> &Arc<dyn SessionStore> {
        self.client.store()
    }

    /// Exchanges an identity-provider token for a backend session.
    ///
    /// New users get their temporary tokens stored and `is_new_user` set; they
    /// must call [`register`](Self::register) next. A failure to fetch the
    /// profile of an existing user does not fail the login.
    ///
    /// # Errors
    ///
    /// Returns the verification error.
    pub async fn login(&self, id_token: &SecretString) -> PelotonResult<LoginOutcome> {
        let verification = self.client.verify(id_token).await?;
        self.lifecycle.establish(&verification.session)?;

        if verification.is_new_user {
            info!("New user verified, registration required");
            return Ok(LoginOutcome {
                is_new_user: true,
                profile: verification.user,
            });
        }

        let profile = self.fetch_profile(verification.user).await;
        Ok(LoginOutcome {
            is_new_user: false,
            profile,
        })
    }

    /// Verifies `id_token` and registers the identity with `details`.
    ///
    /// An identity that is already registered is simply logged in.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the backend reports the user already exists
    /// during registration, or the verification error.
    pub async fn register(
        &self,
        id_token: &SecretString,
        details: &RegisterUser,
    ) -> PelotonResult<LoginOutcome> {
        let verification = self.client.verify(id_token).await?;

        if !verification.is_new_user {
            info!("Identity already registered, logging in instead");
            self.lifecycle.establish(&verification.session)?;
            let profile = self.fetch_profile(verification.user).await;
            return Ok(LoginOutcome {
                is_new_user: false,
                profile,
            });
        }

        // Registration is authorized by the temporary access token alone.
        let temporary = Session::new(verification.session.access_token().clone(), None);
        self.store().store(&temporary)?;

        let registration = self.client.register_user(details).await?;
        self.lifecycle.establish(&registration.session)?;
        info!(user = %registration.user.id, "User registered");

        Ok(LoginOutcome {
            is_new_user: false,
            profile: Some(registration.user),
        })
    }

    /// Fetches the signed-in user's profile.
    ///
    /// # Errors
    ///
    /// Returns the backend error or the refresh error.
    pub async fn current_user(&self) -> PelotonResult<UserProfile> {
        self.client.current_user().await
    }

    /// Logs out. Never fails: the server revoke and identity-provider
    /// sign-out are best-effort, and the local tokens are always cleared.
    pub async fn logout(&self) {
        let refresh_token = match self.store().load() {
            Ok(session) => session.and_then(|s| s.refresh_token().cloned()),
            Err(e) => {
                warn!(error = %e, "Failed to read session before logout");
                None
            }
        };

        if let Some(refresh_token) = refresh_token {
            if let Err(e) = self.client.revoke(&refresh_token).await {
                warn!(error = %e, "Server-side logout failed");
            }
        }

        self.lifecycle.complete_logout();
    }

    /// Reports the state of the stored tokens.
    ///
    /// # Errors
    ///
    /// Returns `Storage` if the store cannot be read.
    pub fn status(&self) -> PelotonResult<SessionStatus> {
        let Some(session) = self.store().load()? else {
            return Ok(SessionStatus::logged_out());
        };

        let horizon = self.client.expiry_horizon();
        let access = session.access_token().expose_secret();
        let refresh = session.refresh_token().map(|t| t.expose_secret());

        Ok(SessionStatus {
            logged_in: session.is_authenticated(),
            access: token::classify(access, horizon),
            access_expires_in: token::time_remaining(access),
            refresh: refresh.map(|t| token::classify(t, horizon)),
            refresh_expires_in: refresh.and_then(token::time_remaining),
        })
    }

    async fn fetch_profile(&self, fallback: Option<UserProfile>) -> Option<UserProfile> {
        match self.client.current_user().await {
            Ok(profile) => Some(profile),
            Err(e) => {
                warn!(error = %e, "Failed to fetch user profile");
                fallback
            }
        }
    }
}
