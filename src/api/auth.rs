//! Authentication endpoints.
//!
//! `verify`, `register` and `refresh` are auth-surface routes: the client never
//! refreshes around them. `me` and `logout` are ordinary authenticated routes.

use futures::future::BoxFuture;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

use super::client::{ApiClient, ApiRequest};
use super::envelope::Envelope;
use crate::auth::coordinator::{RefreshTransport, RefreshedTokens};
use crate::auth::Session;
use crate::error::{PelotonError, PelotonResult};
use crate::roles::Role;

/// Token pair as the backend issues it.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct IssuedTokens {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl IssuedTokens {
    fn into_session(self) -> Session {
        Session::new(
            SecretString::from(self.access_token),
            self.refresh_token.map(SecretString::from),
        )
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct VerifyData {
    #[serde(flatten)]
    tokens: IssuedTokens,
    #[serde(default)]
    is_new_user: bool,
    #[serde(default)]
    user: Option<UserProfile>,
}

#[derive(Deserialize)]
struct RegisterData {
    #[serde(flatten)]
    tokens: IssuedTokens,
    user: UserProfile,
}

/// A console user as the backend describes them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl UserProfile {
    /// Returns the console role, if the backend sent a known one.
    #[must_use]
    pub fn console_role(&self) -> Option<Role> {
        self.role.as_deref().and_then(|r| r.parse().ok())
    }

    /// Returns the best human-readable name available.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.full_name
            .as_deref()
            .or(self.email.as_deref())
            .or(self.phone.as_deref())
            .unwrap_or(&self.id)
    }
}

/// Gender accepted by registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
pub enum Gender {
    Male,
    Female,
}

/// Details a new user submits to finish registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterUser {
    pub full_name: String,
    pub gender: Gender,
    pub age: u32,
}

/// Result of exchanging an identity-provider token.
#[derive(Debug, Clone)]
pub struct Verification {
    /// Tokens issued by the backend. For a new user the access token only
    /// authorizes registration.
    pub session: Session,
    /// True if the identity is not yet registered with the backend.
    pub is_new_user: bool,
    /// Profile, when the backend included one.
    pub user: Option<UserProfile>,
}

/// Result of a completed registration.
#[derive(Debug, Clone)]
pub struct Registration {
    pub session: Session,
    pub user: UserProfile,
}

impl ApiClient {
    /// Exchanges an identity-provider token for backend tokens.
    ///
    /// # Errors
    ///
    /// Returns the backend error; a 401 also clears the stored session.
    pub async fn verify(&self, id_token: &SecretString) -> PelotonResult<Verification> {
        let path = format!("{}/verify", self.auth_path());
        let request =
            ApiRequest::post(path).json(&json!({ "idToken": id_token.expose_secret() }))?;
        let data: VerifyData = self.send(request).await?.into_data()?;
        debug!(is_new_user = data.is_new_user, "Identity verified");

        Ok(Verification {
            session: data.tokens.into_session(),
            is_new_user: data.is_new_user,
            user: data.user,
        })
    }

    /// Registers the identity whose temporary access token is stored.
    ///
    /// # Errors
    ///
    /// Returns `Conflict` if the user is already registered.
    pub async fn register_user(&self, details: &RegisterUser) -> PelotonResult<Registration> {
        let path = format!("{}/register", self.auth_path());
        let data: RegisterData = self.post(&path, details).await?;
        Ok(Registration {
            session: data.tokens.into_session(),
            user: data.user,
        })
    }

    /// Fetches the profile of the signed-in user.
    ///
    /// # Errors
    ///
    /// Returns the backend error or the refresh error.
    pub async fn current_user(&self) -> PelotonResult<UserProfile> {
        self.get(&format!("{}/me", self.auth_path())).await
    }

    /// Revokes `refresh_token` on the server.
    ///
    /// The call is sent once without refresh interception, so it never
    /// rotates the token it is revoking.
    ///
    /// # Errors
    ///
    /// Returns the backend error.
    pub async fn revoke(&self, refresh_token: &SecretString) -> PelotonResult<()> {
        let path = format!("{}/logout", self.auth_path());
        let request = ApiRequest::post(path)
            .json(&json!({ "refreshToken": refresh_token.expose_secret() }))?
            .without_refresh();
        self.send(request).await.map(|_| ())
    }
}

/// Refresh transport that posts straight to the refresh endpoint.
///
/// It bypasses [`ApiClient`] entirely so a refresh can never trigger another
/// refresh.
pub struct HttpRefreshTransport {
    http: reqwest::Client,
    url: String,
}

impl HttpRefreshTransport {
    /// Creates a transport for `<base_url><auth_path>/refresh`.
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: &str, auth_path: &str) -> Self {
        Self {
            http,
            url: format!(
                "{}{}/refresh",
                base_url.trim_end_matches('/'),
                auth_path.trim_end_matches('/')
            ),
        }
    }

    /// Returns the refresh endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    async fn exchange(&self, refresh_token: &SecretString) -> PelotonResult<RefreshedTokens> {
        let response = self
            .http
            .post(&self.url)
            .json(&json!({ "refreshToken": refresh_token.expose_secret() }))
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;
        if !status.is_success() {
            return Err(PelotonError::from_status(status.as_u16(), &text));
        }

        let envelope: Envelope<IssuedTokens> = serde_json::from_str(&text)
            .map_err(|e| PelotonError::invalid_response(format!("refresh response: {e}")))?;
        Ok(RefreshedTokens {
            access_token: SecretString::from(envelope.data.access_token),
            refresh_token: envelope.data.refresh_token.map(SecretString::from),
        })
    }
}

impl RefreshTransport for HttpRefreshTransport {
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a SecretString,
    ) -> BoxFuture<'a, PelotonResult<RefreshedTokens>> {
        Box::pin(self.exchange(refresh_token))
    }
}
