//! Bearer token inspection.
//!
//! Decodes the expiry claim embedded in a JSON Web Token without verifying
//! its signature. The signature is the backend's concern; the client only
//! needs to know when a token stops being useful so it can refresh ahead of
//! time.
//!
//! Every function here is pure. Malformed input is reported as an unknown
//! expiry and is never logged or surfaced as an error.
//!
//! # Example
//!
//! ```
//! use peloton::auth::token::{decode_expiry, is_expiring_soon, DEFAULT_EXPIRY_HORIZON};
//!
//! assert!(decode_expiry("not-a-jwt").is_none());
//! assert!(!is_expiring_soon("not-a-jwt", DEFAULT_EXPIRY_HORIZON));
//! ```

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::Deserialize;

/// Default window before expiry in which a token counts as expiring soon (30 seconds).
pub const DEFAULT_EXPIRY_HORIZON: Duration = Duration::from_millis(30_000);

#[derive(Deserialize)]
struct ExpiryClaim {
    exp: f64,
}

/// How close a token is to the end of its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// Expiry is further away than the horizon.
    Fresh,
    /// Expiry falls within the horizon but has not passed.
    ExpiringSoon,
    /// Expiry has passed.
    Expired,
    /// The token carries no readable expiry.
    Unknown,
}

impl TokenStatus {
    /// Returns a short lowercase label for display.
    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Fresh => "fresh",
            Self::ExpiringSoon => "expiring soon",
            Self::Expired => "expired",
            Self::Unknown => "unknown",
        }
    }
}

/// Decodes the `exp` claim of a three-segment token.
///
/// Returns `None` if the token does not have exactly three segments, the
/// payload is not base64url, the payload is not a JSON object, or it has no
/// numeric `exp` claim.
#[must_use]
pub fn decode_expiry(token: &str) -> Option<SystemTime> {
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 {
        return None;
    }

    let payload = segments[1].trim_end_matches('=');
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    let claim: ExpiryClaim = serde_json::from_slice(&bytes).ok()?;

    if !claim.exp.is_finite() || claim.exp < 0.0 {
        return None;
    }

    // Seconds to whole milliseconds.
    let millis = (claim.exp * 1000.0).round();
    if millis > u64::MAX as f64 {
        return None;
    }
    UNIX_EPOCH.checked_add(Duration::from_millis(millis as u64))
}

/// Returns true iff the token expires after `now` but no later than `now + horizon`.
///
/// An unknown expiry and an already-expired token both return false.
#[must_use]
pub fn is_expiring_soon(token: &str, horizon: Duration) -> bool {
    is_expiring_soon_at(token, horizon, SystemTime::now())
}

/// [`is_expiring_soon`] with an explicit clock.
#[must_use]
pub fn is_expiring_soon_at(token: &str, horizon: Duration, now: SystemTime) -> bool {
    classify_at(token, horizon, now) == TokenStatus::ExpiringSoon
}

/// Returns true if the token has a known expiry at or before the current time.
#[must_use]
pub fn is_expired(token: &str) -> bool {
    is_expired_at(token, SystemTime::now())
}

/// [`is_expired`] with an explicit clock.
#[must_use]
pub fn is_expired_at(token: &str, now: SystemTime) -> bool {
    classify_at(token, Duration::ZERO, now) == TokenStatus::Expired
}

/// Classifies a token against the given horizon.
#[must_use]
pub fn classify(token: &str, horizon: Duration) -> TokenStatus {
    classify_at(token, horizon, SystemTime::now())
}

/// [`classify`] with an explicit clock.
#[must_use]
pub fn classify_at(token: &str, horizon: Duration, now: SystemTime) -> TokenStatus {
    let Some(expires_at) = decode_expiry(token) else {
        return TokenStatus::Unknown;
    };

    match expires_at.duration_since(now) {
        Ok(remaining) if remaining.is_zero() => TokenStatus::Expired,
        Ok(remaining) if remaining <= horizon => TokenStatus::ExpiringSoon,
        Ok(_) => TokenStatus::Fresh,
        Err(_) => TokenStatus::Expired,
    }
}

/// Returns the time left before the token expires.
///
/// `None` for an unknown expiry, `Duration::ZERO` once expired.
#[must_use]
pub fn time_remaining(token: &str) -> Option<Duration> {
    decode_expiry(token).map(|expires_at| {
        expires_at
            .duration_since(SystemTime::now())
            .unwrap_or(Duration::ZERO)
    })
}
