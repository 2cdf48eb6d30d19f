//! Centralized error types for Peloton.
//!
//! This module provides a unified error type (`PelotonError`) covering the
//! session, HTTP and storage failure modes of the client. Using a single
//! error type provides:
//!
//! - Consistent error handling patterns
//! - Clear error categorization (session-fatal, auth failure, retryable)
//! - Cheap cloning, so one refresh outcome can be handed to every queued caller
//!
//! # Example
//!
//! ```
//! use peloton::error::{PelotonError, PelotonResult};
//!
//! fn check_upload(size: usize) -> PelotonResult<()> {
//!     if size > 10 * 1024 * 1024 {
//!         return Err(PelotonError::payload_too_large("image exceeds server limit"));
//!     }
//!     Ok(())
//! }
//!
//! match check_upload(64 * 1024 * 1024) {
//!     Ok(()) => println!("upload accepted"),
//!     Err(e) => {
//!         assert!(!e.is_auth_failure());
//!         println!("Error: {}", e);
//!     }
//! }
//! ```

/// Result type alias using `PelotonError`.
pub type PelotonResult<T> = Result<T, PelotonError>;

/// Message fragments the backend uses when a bearer or refresh credential is
/// no longer acceptable.
const TOKEN_FAILURE_MARKERS: &[&str] = &[
    "invalid token",
    "token expired",
    "token has expired",
    "token is expired",
    "token is invalid",
    "jwt expired",
    "jwt malformed",
    "invalid signature",
    "invalid refresh token",
    "refresh token expired",
];

/// Message fragments that identify an oversized request body.
const PAYLOAD_TOO_LARGE_MARKERS: &[&str] = &["payloadtoolargeerror", "request entity too large"];

/// Centralized error type for Peloton.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PelotonError {
    // ============== Session Errors ==============
    /// No refresh credential is stored, so the session cannot be renewed.
    #[error("session: no refresh token stored")]
    MissingRefreshToken,

    /// The stored refresh token is past its own expiry.
    #[error("session: refresh token expired")]
    RefreshTokenExpired,

    /// The backend rejected the refresh token as invalid or expired.
    #[error("session: refresh token rejected: {message}")]
    RefreshTokenRejected {
        /// Description returned by the backend.
        message: String,
    },

    /// The in-flight refresh was abandoned before it settled.
    #[error("session: refresh aborted before completion")]
    RefreshAborted,

    /// The session was cleared while a refresh was in flight; its tokens were discarded.
    #[error("session: session ended during refresh")]
    SessionEnded,

    // ============== API Errors ==============
    /// The backend refused the bearer credential.
    #[error("api: unauthorized: {message}")]
    Unauthorized {
        /// Description returned by the backend.
        message: String,
    },

    /// The request body exceeded the server limit.
    #[error("api: payload too large: {message}")]
    PayloadTooLarge {
        /// Description returned by the backend.
        message: String,
    },

    /// The resource already exists.
    #[error("api: conflict: {message}")]
    Conflict {
        /// Description returned by the backend.
        message: String,
    },

    /// Any other non-success HTTP status.
    #[error("api: HTTP {status}: {message}")]
    Http {
        /// HTTP status code.
        status: u16,
        /// Description returned by the backend.
        message: String,
    },

    /// The request never produced a response.
    #[error("api: network error: {message}")]
    Network {
        /// Description of the transport failure.
        message: String,
    },

    /// The response could not be decoded.
    #[error("api: invalid response: {message}")]
    InvalidResponse {
        /// Description of the decoding failure.
        message: String,
    },

    // ============== Local Errors ==============
    /// The session store could not be read or written.
    #[error("storage: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// The client was configured with invalid values.
    #[error("config: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },
}

// ============== Constructor Methods ==============

impl PelotonError {
    /// Creates a refresh-rejected error.
    #[must_use]
    pub fn refresh_rejected(message: impl Into<String>) -> Self {
        Self::RefreshTokenRejected {
            message: message.into(),
        }
    }

    /// Creates an unauthorized error.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Creates a payload-too-large error.
    #[must_use]
    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::PayloadTooLarge {
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates an invalid response error.
    #[must_use]
    pub fn invalid_response(message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            message: message.into(),
        }
    }

    /// Creates a storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a configuration error.
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Maps a non-success HTTP response to an error.
    ///
    /// The body is searched for a JSON `message` field; otherwise the raw
    /// text is used. Payload-too-large is checked before the auth family so
    /// an oversized upload never triggers a token refresh.
    #[must_use]
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = extract_message(body);

        if status == 413 || signals_payload_too_large(&message) {
            return Self::PayloadTooLarge { message };
        }
        if status == 401 || signals_token_failure(&message) {
            return Self::Unauthorized { message };
        }
        if status == 409 {
            return Self::Conflict { message };
        }
        Self::Http { status, message }
    }
}

// ============== Category Methods ==============

impl PelotonError {
    /// Returns `true` if this is an authorization failure on a normal request.
    ///
    /// These are recoverable with one refresh-and-replay.
    #[must_use]
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Unauthorized { .. })
    }

    /// Returns `true` if the session cannot continue and the user must log in again.
    #[must_use]
    pub fn is_session_fatal(&self) -> bool {
        matches!(
            self,
            Self::MissingRefreshToken
                | Self::RefreshTokenExpired
                | Self::RefreshTokenRejected { .. }
                | Self::SessionEnded
        )
    }

    /// Returns `true` if retrying the same operation later may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } | Self::RefreshAborted => true,
            Self::Http { status, .. } => *status >= 500 || *status == 429,
            _ => false,
        }
    }

    /// Returns the module name where this error originated.
    #[must_use]
    pub fn module(&self) -> &'static str {
        match self {
            Self::MissingRefreshToken
            | Self::RefreshTokenExpired
            | Self::RefreshTokenRejected { .. }
            | Self::RefreshAborted
            | Self::SessionEnded => "session",

            Self::Unauthorized { .. }
            | Self::PayloadTooLarge { .. }
            | Self::Conflict { .. }
            | Self::Http { .. }
            | Self::Network { .. }
            | Self::InvalidResponse { .. } => "api",

            Self::Storage { .. } => "storage",
            Self::Config { .. } => "config",
        }
    }
}

// ============== Conversion Implementations ==============

impl From<reqwest::Error> for PelotonError {
    fn from(err: reqwest::Error) -> Self {
        let message = err.to_string();
        if signals_payload_too_large(&message) {
            return Self::PayloadTooLarge { message };
        }
        if err.is_decode() {
            return Self::InvalidResponse { message };
        }
        Self::Network { message }
    }
}

impl From<keyring::Error> for PelotonError {
    fn from(err: keyring::Error) -> Self {
        Self::Storage {
            message: err.to_string(),
        }
    }
}

/// Returns `true` if a backend message says the presented token is invalid or expired.
#[must_use]
pub fn signals_token_failure(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    TOKEN_FAILURE_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

fn signals_payload_too_large(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    PAYLOAD_TOO_LARGE_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

fn extract_message(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|value| {
            value
                .get("message")
                .or_else(|| value.get("error"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or_else(|| body.trim().to_string())
}

// ============== Unit Tests ==============
