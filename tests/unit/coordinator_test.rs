//! Unit tests for the single-flight refresh coordinator.
//!
//! These tests verify:
//! - Concurrent refresh demand produces exactly one network call
//! - Every queued caller receives the leader's outcome
//! - The in-flight flag and waiter list are reset together
//! - A dead refresh credential ends the session
//! - Transient failures follow the configured policy
//! - A refresh that settles after logout never restores the session

use std::time::Duration;

use futures::future::join_all;
use peloton::auth::coordinator::TransientRefreshPolicy;
use peloton::auth::lifecycle::{SessionEvent, TerminationReason};
use peloton::error::PelotonError;
use pretty_assertions::assert_eq;
use secrecy::ExposeSecret;
use tokio_test::{assert_err, assert_ok};

use crate::common::{
    fresh_access, fresh_refresh, session, stored_tokens, token_expired_ago, token_expiring_in,
    CoordinatorFixture, FakeTransport,
};

fn expiring_session() -> peloton::auth::Session {
    session(
        &token_expiring_in(Duration::from_secs(5)),
        Some(&fresh_refresh()),
    )
}

#[tokio::test]
async fn test_concurrent_callers_share_one_refresh() {
    let new_access = fresh_access();
    let fixture = CoordinatorFixture::new(
        Some(expiring_session()),
        FakeTransport::issuing(&new_access, None).with_delay(Duration::from_millis(50)),
    );

    let results = join_all((0..10).map(|_| fixture.coordinator.request_refresh())).await;

    assert_eq!(fixture.transport.calls(), 1);
    assert_eq!(fixture.coordinator.refresh_count(), 1);
    for result in results {
        let token = assert_ok!(result);
        assert_eq!(token.expose_secret(), new_access);
    }
    assert!(!fixture.coordinator.is_refreshing());
    assert_eq!(fixture.coordinator.pending_waiters(), 0);
}

#[tokio::test]
async fn test_refresh_keeps_refresh_token_when_not_rotated() {
    let refresh = fresh_refresh();
    let new_access = fresh_access();
    let fixture = CoordinatorFixture::new(
        Some(session(&token_expiring_in(Duration::from_secs(5)), Some(&refresh))),
        FakeTransport::issuing(&new_access, None),
    );

    assert_ok!(fixture.coordinator.request_refresh().await);

    assert_eq!(
        stored_tokens(fixture.store.as_ref()),
        Some((new_access, Some(refresh)))
    );
}

#[tokio::test]
async fn test_refresh_stores_rotated_refresh_token() {
    let new_access = fresh_access();
    let rotated = fresh_refresh() + "-rotated";
    let fixture = CoordinatorFixture::new(
        Some(expiring_session()),
        FakeTransport::issuing(&new_access, Some(&rotated)),
    );

    assert_ok!(fixture.coordinator.request_refresh().await);

    assert_eq!(
        stored_tokens(fixture.store.as_ref()),
        Some((new_access, Some(rotated)))
    );
}

#[tokio::test]
async fn test_settled_coordinator_starts_a_new_refresh() {
    let fixture = CoordinatorFixture::new(
        Some(expiring_session()),
        FakeTransport::issuing("first", None),
    );

    let first = assert_ok!(fixture.coordinator.request_refresh().await);
    fixture.transport.set_issuing("second", None);
    let second = assert_ok!(fixture.coordinator.request_refresh().await);

    assert_eq!(first.expose_secret(), "first");
    assert_eq!(second.expose_secret(), "second");
    assert_eq!(fixture.transport.calls(), 2);
}

#[tokio::test]
async fn test_rejected_refresh_fails_every_caller_and_logs_out() {
    let fixture = CoordinatorFixture::new(
        Some(expiring_session()),
        FakeTransport::failing(PelotonError::unauthorized("Invalid refresh token"))
            .with_delay(Duration::from_millis(20)),
    );
    let mut events = fixture.lifecycle.subscribe();

    let results = join_all((0..5).map(|_| fixture.coordinator.request_refresh())).await;

    assert_eq!(fixture.transport.calls(), 1);
    for result in results {
        let err = assert_err!(result);
        assert_eq!(err, PelotonError::refresh_rejected("Invalid refresh token"));
        assert!(err.is_session_fatal());
    }
    assert_eq!(stored_tokens(fixture.store.as_ref()), None);
    assert_eq!(
        events.try_recv().unwrap(),
        SessionEvent::Terminated {
            reason: TerminationReason::RefreshTokenRejected,
            redirect: Some("/auth".to_string()),
        }
    );
    assert!(!fixture.coordinator.is_refreshing());
}

#[tokio::test]
async fn test_after_dead_refresh_no_further_network_calls() {
    let fixture = CoordinatorFixture::new(
        Some(expiring_session()),
        FakeTransport::failing(PelotonError::unauthorized("refresh token expired")),
    );

    assert_err!(fixture.coordinator.request_refresh().await);
    let err = assert_err!(fixture.coordinator.request_refresh().await);

    assert_eq!(err, PelotonError::MissingRefreshToken);
    assert_eq!(fixture.transport.calls(), 1);
}

#[tokio::test]
async fn test_missing_refresh_token_forces_logout_without_network() {
    let fixture = CoordinatorFixture::new(
        Some(session(&token_expiring_in(Duration::from_secs(5)), None)),
        FakeTransport::issuing("unused", None),
    );
    let mut events = fixture.lifecycle.subscribe();

    let err = assert_err!(fixture.coordinator.request_refresh().await);

    assert_eq!(err, PelotonError::MissingRefreshToken);
    assert_eq!(fixture.transport.calls(), 0);
    assert_eq!(stored_tokens(fixture.store.as_ref()), None);
    assert!(matches!(
        events.try_recv().unwrap(),
        SessionEvent::Terminated {
            reason: TerminationReason::MissingRefreshToken,
            ..
        }
    ));
}

#[tokio::test]
async fn test_expired_refresh_token_forces_logout_without_network() {
    let fixture = CoordinatorFixture::new(
        Some(session(
            &token_expired_ago(Duration::from_secs(60)),
            Some(&token_expired_ago(Duration::from_secs(1))),
        )),
        FakeTransport::issuing("unused", None),
    );

    let err = assert_err!(fixture.coordinator.request_refresh().await);

    assert_eq!(err, PelotonError::RefreshTokenExpired);
    assert_eq!(fixture.transport.calls(), 0);
    assert_eq!(stored_tokens(fixture.store.as_ref()), None);
}

#[tokio::test]
async fn test_transient_failure_clears_session_by_default() {
    let fixture = CoordinatorFixture::new(
        Some(expiring_session()),
        FakeTransport::failing(PelotonError::network("connection reset")),
    );
    let mut events = fixture.lifecycle.subscribe();

    let err = assert_err!(fixture.coordinator.request_refresh().await);

    assert_eq!(err, PelotonError::network("connection reset"));
    assert_eq!(stored_tokens(fixture.store.as_ref()), None);
    match events.try_recv().unwrap() {
        SessionEvent::Terminated { reason, redirect } => {
            assert_eq!(reason, TerminationReason::RefreshUnavailable);
            assert!(!reason.is_security_event());
            assert_eq!(redirect.as_deref(), Some("/auth"));
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn test_transient_failure_keeps_session_when_configured() {
    let original = expiring_session();
    let fixture = CoordinatorFixture::with_policy(
        Some(original),
        FakeTransport::failing(PelotonError::Http {
            status: 503,
            message: "Service Unavailable".to_string(),
        }),
        TransientRefreshPolicy::KeepSession,
    );
    let mut events = fixture.lifecycle.subscribe();

    let err = assert_err!(fixture.coordinator.request_refresh().await);

    assert!(err.is_retryable());
    assert!(stored_tokens(fixture.store.as_ref()).is_some());
    assert!(events.try_recv().is_err());
    assert!(!fixture.coordinator.is_refreshing());
}

#[tokio::test]
async fn test_logout_during_refresh_discards_new_tokens() {
    let fixture = CoordinatorFixture::new(
        Some(expiring_session()),
        FakeTransport::issuing(&fresh_access(), Some("rotated-refresh"))
            .with_delay(Duration::from_millis(100)),
    );

    let logout = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        fixture.lifecycle.complete_logout();
        assert_eq!(stored_tokens(fixture.store.as_ref()), None);
    };
    let (leader, waiter, ()) = tokio::join!(
        fixture.coordinator.request_refresh(),
        fixture.coordinator.request_refresh(),
        logout
    );

    assert_eq!(assert_err!(leader), PelotonError::SessionEnded);
    assert_eq!(assert_err!(waiter), PelotonError::SessionEnded);
    assert_eq!(fixture.transport.calls(), 1);
    assert_eq!(stored_tokens(fixture.store.as_ref()), None);
    assert!(!fixture.coordinator.is_refreshing());
}

#[tokio::test]
async fn test_session_replaced_during_refresh_is_kept() {
    let fixture = CoordinatorFixture::new(
        Some(expiring_session()),
        FakeTransport::issuing(&fresh_access(), Some("rotated-refresh"))
            .with_delay(Duration::from_millis(100)),
    );
    let relogin_access = fresh_access() + "-relogin";
    let relogin_refresh = fresh_refresh() + "-relogin";

    let relogin = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        fixture
            .lifecycle
            .establish(&session(&relogin_access, Some(&relogin_refresh)))
            .unwrap();
    };
    let (result, ()) = tokio::join!(fixture.coordinator.request_refresh(), relogin);

    assert_eq!(assert_err!(result), PelotonError::SessionEnded);
    assert_eq!(
        stored_tokens(fixture.store.as_ref()),
        Some((relogin_access, Some(relogin_refresh)))
    );
}
