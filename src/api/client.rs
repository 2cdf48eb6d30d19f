//! Refresh-aware HTTP client for the console backend.
//!
//! Every request passes through two interception points:
//!
//! ```text
//! send(request)
//!     ↓
//! pre-flight (skipped for auth-surface endpoints)
//!     ├─ access token expiring soon → await RefreshCoordinator
//!     └─ attach bearer token if one is stored
//!     ↓
//! dispatch (Attempt::Initial)
//!     ├─ 413 / payload too large → PayloadTooLarge, no refresh
//!     ├─ 401 / token error, auth-surface endpoint → clear session, propagate
//!     ├─ 401 / token error → refresh, dispatch once more (Attempt::Replay)
//!     │       ├─ stored token already replaced → replay with it, no refresh
//!     │       └─ 401 again → propagate
//!     └─ anything else → returned unchanged
//! ```
//!
//! Requests built with [`ApiRequest::without_refresh`] skip both points: the
//! stored bearer is attached as-is and errors are returned unchanged.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Method, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::envelope::Envelope;
use crate::auth::coordinator::RefreshCoordinator;
use crate::auth::storage::SessionStore;
use crate::auth::token::{self, DEFAULT_EXPIRY_HORIZON};
use crate::error::{PelotonError, PelotonResult};

/// Default prefix of the authentication routes.
pub const DEFAULT_AUTH_PATH: &str = "/v1/auth";

/// Auth routes that never go through refresh interception.
const AUTH_SURFACE_ENDPOINTS: &[&str] = &["login", "verify", "register", "refresh"];

/// Which pass of a logical request is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attempt {
    /// The first send.
    Initial,
    /// The single resend after a refresh.
    Replay,
}

/// A buffered request that can be sent more than once.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    method: Method,
    path: String,
    query: Vec<(String, String)>,
    body: Option<Value>,
    refresh: bool,
}

impl ApiRequest {
    /// Creates a request for `path` relative to the base URL.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            refresh: true,
        }
    }

    /// Creates a GET request.
    #[must_use]
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    /// Creates a POST request.
    #[must_use]
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    /// Creates a PATCH request.
    #[must_use]
    pub fn patch(path: impl Into<String>) -> Self {
        Self::new(Method::PATCH, path)
    }

    /// Creates a PUT request.
    #[must_use]
    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    /// Creates a DELETE request.
    #[must_use]
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    /// Appends a query parameter.
    #[must_use]
    pub fn query(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.query.push((key.into(), value.to_string()));
        self
    }

    /// Sets a JSON body.
    ///
    /// # Errors
    ///
    /// Returns `InvalidResponse` if `body` cannot be serialized.
    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> PelotonResult<Self> {
        let value = serde_json::to_value(body)
            .map_err(|e| PelotonError::invalid_response(format!("failed to encode body: {e}")))?;
        self.body = Some(value);
        Ok(self)
    }

    /// Sends the request once with the stored bearer, never refreshing.
    #[must_use]
    pub fn without_refresh(mut self) -> Self {
        self.refresh = false;
        self
    }

    /// Returns the HTTP method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the path without the base URL.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }
}

/// A successful response with its JSON body (`Null` when empty).
#[derive(Debug, Clone)]
pub struct ApiResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Parsed body.
    pub body: Value,
}

impl ApiResponse {
    /// Decodes the `data` member of the response envelope.
    ///
    /// # Errors
    ///
    /// Returns `InvalidResponse` if the body does not match.
    pub fn into_data<T: DeserializeOwned>(self) -> PelotonResult<T> {
        serde_json::from_value::<Envelope<T>>(self.body)
            .map(|envelope| envelope.data)
            .map_err(|e| PelotonError::invalid_response(e.to_string()))
    }
}

/// HTTP client that keeps the session alive across token expiry.
pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    auth_path: String,
    expiry_horizon: Duration,
    store: Arc<dyn SessionStore>,
    coordinator: Arc<RefreshCoordinator>,
}

impl ApiClient {
    /// Creates a client for `base_url`.
    ///
    /// # Errors
    ///
    /// Returns `Config` if `base_url` is not an absolute URL.
    pub fn new(
        http: reqwest::Client,
        base_url: &str,
        store: Arc<dyn SessionStore>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> PelotonResult<Self> {
        reqwest::Url::parse(base_url)
            .map_err(|e| PelotonError::config(format!("invalid base URL '{base_url}': {e}")))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_path: DEFAULT_AUTH_PATH.to_string(),
            expiry_horizon: DEFAULT_EXPIRY_HORIZON,
            store,
            coordinator,
        })
    }

    /// Sets the prefix of the authentication routes.
    #[must_use]
    pub fn with_auth_path(mut self, auth_path: impl Into<String>) -> Self {
        self.auth_path = auth_path.into().trim_end_matches('/').to_string();
        self
    }

    /// Sets how close to expiry an access token is refreshed ahead of use.
    #[must_use]
    pub fn with_expiry_horizon(mut self, horizon: Duration) -> Self {
        self.expiry_horizon = horizon;
        self
    }

    /// Returns the base URL without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the prefix of the authentication routes.
    #[must_use]
    pub fn auth_path(&self) -> &str {
        &self.auth_path
    }

    /// Returns the pre-flight refresh horizon.
    #[must_use]
    pub fn expiry_horizon(&self) -> Duration {
        self.expiry_horizon
    }

    /// Returns the session store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Returns the refresh coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// Returns true if `path` is a login, verification, registration or
    /// refresh route.
    #[must_use]
    pub fn is_auth_surface(&self, path: &str) -> bool {
        let path = path.split('?').next().unwrap_or(path).trim_end_matches('/');
        let Some(endpoint) = path
            .strip_prefix(self.auth_path.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            return false;
        };
        AUTH_SURFACE_ENDPOINTS.contains(&endpoint)
    }

    /// Sends `request`, refreshing and replaying it once if the credential is refused.
    ///
    /// # Errors
    ///
    /// Returns the backend error, the refresh error if the session could not
    /// be renewed, or `Unauthorized` if the replay was refused as well.
    pub async fn send(&self, request: ApiRequest) -> PelotonResult<ApiResponse> {
        if !request.refresh {
            let token = self.stored_access_token()?;
            return self
                .dispatch(&request, token.as_ref(), Attempt::Initial)
                .await;
        }

        let token = self.preflight(&request).await?;

        match self
            .dispatch(&request, token.as_ref(), Attempt::Initial)
            .await
        {
            Err(err) if err.is_auth_failure() => self.recover(&request, token.as_ref(), err).await,
            other => other,
        }
    }

    /// Sends a GET and decodes the envelope's `data`.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> PelotonResult<T> {
        self.send(ApiRequest::get(path)).await?.into_data()
    }

    /// Sends a POST with a JSON body and decodes the envelope's `data`.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn post<B, T>(&self, path: &str, body: &B) -> PelotonResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::post(path).json(body)?)
            .await?
            .into_data()
    }

    /// Sends a PATCH with a JSON body and decodes the envelope's `data`.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn patch<B, T>(&self, path: &str, body: &B) -> PelotonResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::patch(path).json(body)?)
            .await?
            .into_data()
    }

    /// Sends a PUT with a JSON body and decodes the envelope's `data`.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn put<B, T>(&self, path: &str, body: &B) -> PelotonResult<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.send(ApiRequest::put(path).json(body)?)
            .await?
            .into_data()
    }

    /// Sends a DELETE, ignoring any response body.
    ///
    /// # Errors
    ///
    /// See [`send`](Self::send).
    pub async fn delete(&self, path: &str) -> PelotonResult<()> {
        self.send(ApiRequest::delete(path)).await.map(|_| ())
    }

    fn stored_access_token(&self) -> PelotonResult<Option<SecretString>> {
        Ok(self.store.load()?.map(|session| session.access_token().clone()))
    }

    /// Picks the bearer token for the first attempt.
    async fn preflight(&self, request: &ApiRequest) -> PelotonResult<Option<SecretString>> {
        let Some(access_token) = self.stored_access_token()? else {
            return Ok(None);
        };

        if self.is_auth_surface(&request.path) {
            return Ok(Some(access_token));
        }

        if token::is_expiring_soon(access_token.expose_secret(), self.expiry_horizon) {
            debug!(path = %request.path, "Access token expiring soon, refreshing first");
            return self.coordinator.request_refresh().await.map(Some);
        }

        Ok(Some(access_token))
    }

    /// Handles an authorization failure on the initial attempt that was sent with `used`.
    async fn recover(
        &self,
        request: &ApiRequest,
        used: Option<&SecretString>,
        err: PelotonError,
    ) -> PelotonResult<ApiResponse> {
        if self.is_auth_surface(&request.path) {
            warn!(path = %request.path, "Auth endpoint rejected credentials, clearing session");
            if let Err(e) = self.store.clear() {
                warn!(error = %e, "Failed to clear stored session");
            }
            return Err(err);
        }

        let fresh = match self.stored_access_token()? {
            Some(stored) if used.map(|t| t.expose_secret()) != Some(stored.expose_secret()) => {
                debug!(path = %request.path, "Access token replaced since request was sent");
                stored
            }
            _ => {
                debug!(path = %request.path, "Request unauthorized, refreshing and replaying");
                self.coordinator.request_refresh().await?
            }
        };
        self.dispatch(request, Some(&fresh), Attempt::Replay).await
    }

    async fn dispatch(
        &self,
        request: &ApiRequest,
        token: Option<&SecretString>,
        attempt: Attempt,
    ) -> PelotonResult<ApiResponse> {
        let url = format!("{}{}", self.base_url, request.path);
        debug!(
            method = %request.method,
            path = %request.path,
            ?attempt,
            authenticated = token.is_some(),
            "API request"
        );

        let mut builder = self.http.request(request.method.clone(), &url);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = token {
            builder = builder.bearer_auth(token.expose_secret());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            debug!(status = status.as_u16(), path = %request.path, "API response");
            let body = if text.trim().is_empty() {
                Value::Null
            } else {
                serde_json::from_str(&text)
                    .map_err(|e| PelotonError::invalid_response(e.to_string()))?
            };
            return Ok(ApiResponse { status, body });
        }

        let err = PelotonError::from_status(status.as_u16(), &text);
        match (&err, attempt) {
            (PelotonError::PayloadTooLarge { .. }, _) => {
                warn!(path = %request.path, "Payload too large - request body exceeds server limit");
            }
            (PelotonError::Unauthorized { .. }, Attempt::Replay) => {
                warn!(path = %request.path, "Request refused again after token refresh");
            }
            _ => {
                debug!(status = status.as_u16(), path = %request.path, error = %err, "API error");
            }
        }
        Err(err)
    }
}
