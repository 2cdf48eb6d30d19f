//! Unit tests for the token inspector.
//!
//! These tests verify:
//! - Expiry decoding never panics on arbitrary input
//! - Decoded expiry matches the `exp` claim to the millisecond
//! - `is_expiring_soon` agrees with `0 < exp - now <= horizon` everywhere

use std::time::{Duration, UNIX_EPOCH};

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use peloton::auth::token::{
    classify_at, decode_expiry, is_expired_at, is_expiring_soon, is_expiring_soon_at,
    TokenStatus, DEFAULT_EXPIRY_HORIZON,
};
use proptest::prelude::*;

use crate::common::{token_expired_ago, token_expiring_in, token_with_exp};

proptest! {
    #[test]
    fn decode_expiry_never_panics(input in ".*") {
        let _ = decode_expiry(&input);
    }

    #[test]
    fn decode_expiry_never_panics_on_three_segments(
        a in "[A-Za-z0-9_-]{0,20}",
        b in "[A-Za-z0-9_=-]{0,60}",
        c in "[A-Za-z0-9_-]{0,20}",
    ) {
        let _ = decode_expiry(&format!("{a}.{b}.{c}"));
    }

    #[test]
    fn decode_expiry_reads_any_exp(exp in 0u64..4_000_000_000) {
        prop_assert_eq!(
            decode_expiry(&token_with_exp(exp)),
            Some(UNIX_EPOCH + Duration::from_secs(exp))
        );
    }

    #[test]
    fn expiring_soon_matches_definition(
        exp in 1_000_000u64..4_000_000_000,
        offset_ms in -120_000i64..120_000,
        horizon_ms in 0u64..90_000,
    ) {
        let token = token_with_exp(exp);
        let expiry = UNIX_EPOCH + Duration::from_secs(exp);
        let now = if offset_ms >= 0 {
            expiry - Duration::from_millis(offset_ms as u64)
        } else {
            expiry + Duration::from_millis(offset_ms.unsigned_abs())
        };
        let horizon = Duration::from_millis(horizon_ms);

        let remaining = offset_ms;
        let expected = remaining > 0 && remaining as u64 <= horizon_ms;
        prop_assert_eq!(is_expiring_soon_at(&token, horizon, now), expected);
        prop_assert_eq!(is_expired_at(&token, now), remaining <= 0);
    }
}

#[test]
fn test_padded_payload_is_accepted() {
    let payload = URL_SAFE.encode(br#"{"exp": 1900000001}"#);
    assert!(payload.ends_with('='), "payload should carry padding");

    let token = format!("h.{payload}.s");
    assert_eq!(
        decode_expiry(&token),
        Some(UNIX_EPOCH + Duration::from_secs(1_900_000_001))
    );
}

#[test]
fn test_standard_base64_alphabet_is_rejected() {
    // '+' and '/' are not part of the URL-safe alphabet.
    let token = "h.eyJleHAiOjE5MDAwMDAwMDB9+/.s";
    assert_eq!(decode_expiry(token), None);
}

#[test]
fn test_payload_must_be_an_object() {
    let token = format!("h.{}.s", URL_SAFE_NO_PAD.encode(b"[1900000000]"));
    assert_eq!(decode_expiry(&token), None);
}

#[test]
fn test_live_tokens_against_wall_clock() {
    assert!(is_expiring_soon(
        &token_expiring_in(Duration::from_secs(10)),
        DEFAULT_EXPIRY_HORIZON
    ));
    assert!(!is_expiring_soon(
        &token_expiring_in(Duration::from_secs(3600)),
        DEFAULT_EXPIRY_HORIZON
    ));
    assert!(!is_expiring_soon(
        &token_expired_ago(Duration::from_secs(5)),
        DEFAULT_EXPIRY_HORIZON
    ));
}

#[test]
fn test_zero_horizon_never_expiring_soon() {
    let token = token_with_exp(1_900_000_000);
    let now = UNIX_EPOCH + Duration::from_secs(1_899_999_999);
    assert_eq!(classify_at(&token, Duration::ZERO, now), TokenStatus::Fresh);
}
