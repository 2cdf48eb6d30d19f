//! Integration tests for login, registration and logout.

use std::time::Duration;

use peloton::api::auth::{Gender, RegisterUser};
use peloton::auth::lifecycle::SessionEvent;
use peloton::error::PelotonError;
use pretty_assertions::assert_eq;
use secrecy::SecretString;
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{
    fresh_access, fresh_refresh, session, token_expiring_in, Harness, RecordingIdentity,
};

fn envelope(data: serde_json::Value) -> serde_json::Value {
    json!({"success": true, "message": "OK", "data": data})
}

fn id_token() -> SecretString {
    SecretString::from("firebase-id-token")
}

async fn mount_verify(harness: &Harness, data: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path("/v1/auth/verify"))
        .and(body_json(json!({"idToken": "firebase-id-token"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(data)))
        .expect(1)
        .mount(&harness.server)
        .await;
}

fn rider_details() -> RegisterUser {
    RegisterUser {
        full_name: "Noura Al Ketbi".to_string(),
        gender: Gender::Female,
        age: 29,
    }
}

#[tokio::test]
async fn test_login_existing_user_fetches_profile() {
    let harness = Harness::start().await;
    let mut events = harness.lifecycle.subscribe();
    let access = fresh_access();
    let refresh = fresh_refresh();

    mount_verify(
        &harness,
        json!({"accessToken": access, "refreshToken": refresh, "isNewUser": false}),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/v1/auth/me"))
        .and(header("authorization", format!("Bearer {access}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "_id": "u7",
            "email": "ops@example.com",
            "role": "moderator",
            "createdAt": "2025-01-01T00:00:00Z",
            "updatedAt": "2025-01-01T00:00:00Z"
        }))))
        .expect(1)
        .mount(&harness.server)
        .await;

    let outcome = harness.manager.login(&id_token()).await.unwrap();

    assert!(!outcome.is_new_user);
    assert_eq!(outcome.profile.unwrap().display_name(), "ops@example.com");
    assert_eq!(harness.tokens(), Some((access, Some(refresh))));
    assert_eq!(events.try_recv().unwrap(), SessionEvent::Established);
}

#[tokio::test]
async fn test_login_new_user_skips_profile() {
    let harness = Harness::start().await;

    mount_verify(
        &harness,
        json!({"accessToken": "temporary", "refreshToken": "temporary-refresh", "isNewUser": true}),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/v1/auth/me"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&harness.server)
        .await;

    let outcome = harness.manager.login(&id_token()).await.unwrap();

    assert!(outcome.is_new_user);
    assert!(outcome.profile.is_none());
}

#[tokio::test]
async fn test_login_survives_profile_failure() {
    let harness = Harness::start().await;

    mount_verify(
        &harness,
        json!({
            "accessToken": fresh_access(),
            "refreshToken": fresh_refresh(),
            "isNewUser": false,
            "user": {"_id": "u9", "fullName": "Hamad Al Mansoori"}
        }),
    )
    .await;
    Mock::given(method("GET"))
        .and(path("/v1/auth/me"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&harness.server)
        .await;

    let outcome = harness.manager.login(&id_token()).await.unwrap();

    assert_eq!(outcome.profile.unwrap().id, "u9");
    assert!(harness.tokens().is_some());
}

#[tokio::test]
async fn test_register_new_user_uses_temporary_token() {
    let harness = Harness::start().await;
    let access = fresh_access();
    let refresh = fresh_refresh();

    mount_verify(
        &harness,
        json!({"accessToken": "temporary-access", "isNewUser": true}),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/register"))
        .and(header("authorization", "Bearer temporary-access"))
        .and(body_json(json!({"fullName": "Noura Al Ketbi", "gender": "Female", "age": 29})))
        .respond_with(ResponseTemplate::new(201).set_body_json(envelope(json!({
            "accessToken": access,
            "refreshToken": refresh,
            "user": {
                "_id": "u10",
                "fullName": "Noura Al Ketbi",
                "gender": "Female",
                "age": 29,
                "role": "content-manager"
            }
        }))))
        .expect(1)
        .mount(&harness.server)
        .await;

    let outcome = harness
        .manager
        .register(&id_token(), &rider_details())
        .await
        .unwrap();

    let profile = outcome.profile.unwrap();
    assert_eq!(profile.id, "u10");
    assert_eq!(profile.age, Some(29));
    assert_eq!(harness.tokens(), Some((access, Some(refresh))));
}

#[tokio::test]
async fn test_register_conflict() {
    let harness = Harness::start().await;

    mount_verify(
        &harness,
        json!({"accessToken": "temporary-access", "isNewUser": true}),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/register"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_json(json!({"success": false, "message": "User already registered"})),
        )
        .expect(1)
        .mount(&harness.server)
        .await;

    let err = harness
        .manager
        .register(&id_token(), &rider_details())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        PelotonError::Conflict {
            message: "User already registered".to_string()
        }
    );
}

#[tokio::test]
async fn test_register_existing_user_logs_in() {
    let harness = Harness::start().await;
    let access = fresh_access();

    mount_verify(
        &harness,
        json!({"accessToken": access, "refreshToken": fresh_refresh(), "isNewUser": false}),
    )
    .await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/register"))
        .respond_with(ResponseTemplate::new(201))
        .expect(0)
        .mount(&harness.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/v1/auth/me"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(envelope(json!({"_id": "u3", "role": "super-admin"}))),
        )
        .expect(1)
        .mount(&harness.server)
        .await;

    let outcome = harness
        .manager
        .register(&id_token(), &rider_details())
        .await
        .unwrap();

    assert!(!outcome.is_new_user);
    assert_eq!(outcome.profile.unwrap().id, "u3");
}

#[tokio::test]
async fn test_logout_revokes_and_clears() {
    let refresh = fresh_refresh();
    let harness = Harness::with_session(session(&fresh_access(), Some(&refresh))).await;
    let mut events = harness.lifecycle.subscribe();

    Mock::given(method("POST"))
        .and(path("/v1/auth/logout"))
        .and(body_json(json!({"refreshToken": refresh})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "message": "Logged out"})))
        .expect(1)
        .mount(&harness.server)
        .await;

    harness.manager.logout().await;

    assert_eq!(harness.tokens(), None);
    assert_eq!(harness.identity.sign_outs(), 1);
    assert_eq!(events.try_recv().unwrap(), SessionEvent::LoggedOut);
}

#[tokio::test]
async fn test_logout_succeeds_when_revoke_and_sign_out_fail() {
    let harness = Harness::build(
        Some(session(&fresh_access(), Some(&fresh_refresh()))),
        RecordingIdentity::failing(),
    )
    .await;

    Mock::given(method("POST"))
        .and(path("/v1/auth/logout"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .expect(1)
        .mount(&harness.server)
        .await;

    harness.manager.logout().await;

    assert_eq!(harness.tokens(), None);
    assert_eq!(harness.identity.sign_outs(), 1);
}

#[tokio::test]
async fn test_logout_without_session_skips_revoke() {
    let harness = Harness::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/auth/logout"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&harness.server)
        .await;

    harness.manager.logout().await;

    assert_eq!(harness.tokens(), None);
}

#[tokio::test]
async fn test_logout_revokes_stored_refresh_token_without_refreshing() {
    let refresh = fresh_refresh();
    let harness = Harness::with_session(session(
        &token_expiring_in(Duration::from_secs(5)),
        Some(&refresh),
    ))
    .await;

    Mock::given(method("POST"))
        .and(path("/v1/auth/refresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(envelope(json!({
            "accessToken": fresh_access(),
            "refreshToken": "rotated-refresh"
        }))))
        .expect(0)
        .mount(&harness.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/logout"))
        .and(body_json(json!({"refreshToken": refresh})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"success": true, "message": "Logged out"})))
        .expect(1)
        .mount(&harness.server)
        .await;

    harness.manager.logout().await;

    assert_eq!(harness.client.coordinator().refresh_count(), 0);
    assert_eq!(harness.tokens(), None);
}

#[tokio::test]
async fn test_logout_refused_revoke_is_not_retried() {
    let harness = Harness::with_session(session(&fresh_access(), Some(&fresh_refresh()))).await;
    let mut events = harness.lifecycle.subscribe();

    Mock::given(method("POST"))
        .and(path("/v1/auth/refresh"))
        .respond_with(ResponseTemplate::new(500))
        .expect(0)
        .mount(&harness.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/v1/auth/logout"))
        .respond_with(
            ResponseTemplate::new(401).set_body_json(json!({"success": false, "message": "jwt expired"})),
        )
        .expect(1)
        .mount(&harness.server)
        .await;

    harness.manager.logout().await;

    assert_eq!(harness.tokens(), None);
    assert_eq!(events.try_recv().unwrap(), SessionEvent::LoggedOut);
}
