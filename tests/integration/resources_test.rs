//! Integration tests for the event and community endpoints.

use peloton::api::communities::CommunityDraft;
use peloton::api::events::{EventDraft, EventQuery, EventStatus};
use pretty_assertions::assert_eq;
use serde_json::json;
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, ResponseTemplate};

use crate::common::{fresh_access, fresh_refresh, session, Harness};

async fn logged_in() -> Harness {
    Harness::with_session(session(&fresh_access(), Some(&fresh_refresh()))).await
}

#[tokio::test]
async fn test_list_events_sends_filters_and_reads_page() {
    let harness = logged_in().await;

    Mock::given(method("GET"))
        .and(path("/v1/events"))
        .and(query_param("status", "upcoming"))
        .and(query_param("page", "2"))
        .and(query_param("limit", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "Events fetched",
            "data": {
                "events": [{
                    "_id": "e42",
                    "title": "Jebel Jais Climb",
                    "eventDate": "2025-03-08",
                    "eventTime": "05:30",
                    "address": "Jebel Jais, Ras Al Khaimah",
                    "maxParticipants": 150,
                    "status": "upcoming"
                }],
                "pagination": {"page": 2, "limit": 1, "total": 3, "pages": 3}
            }
        })))
        .expect(1)
        .mount(&harness.server)
        .await;

    let page = harness
        .client
        .events()
        .list(EventQuery {
            status: Some(EventStatus::Upcoming),
            page: 2,
            limit: 1,
        })
        .await
        .unwrap();

    assert_eq!(page.items.len(), 1);
    assert_eq!(page.items[0].id, "e42");
    assert_eq!(page.items[0].max_participants, 150);
    assert_eq!(page.pagination.total_pages, 3);
    assert!(page.pagination.has_next());
}

#[tokio::test]
async fn test_update_event_patches_only_set_fields() {
    let harness = logged_in().await;

    Mock::given(method("PATCH"))
        .and(path("/v1/events/e42"))
        .and(body_json(json!({"status": "cancelled"})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": true,
            "message": "Event updated",
            "data": {"_id": "e42", "title": "Jebel Jais Climb", "status": "cancelled"}
        })))
        .expect(1)
        .mount(&harness.server)
        .await;

    let event = harness
        .client
        .events()
        .update(
            "e42",
            &EventDraft {
                status: Some(EventStatus::Cancelled),
                ..EventDraft::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(event.status, EventStatus::Cancelled);
}

#[tokio::test]
async fn test_create_community() {
    let harness = logged_in().await;

    Mock::given(method("POST"))
        .and(path("/v1/communities"))
        .and(body_json(json!({
            "title": "Hatta Trail Crew",
            "type": "club",
            "category": ["mtb"],
            "location": "Hatta",
            "isActive": true
        })))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({
            "success": true,
            "message": "Community created",
            "data": {
                "_id": "c5",
                "title": "Hatta Trail Crew",
                "type": "club",
                "category": ["mtb"],
                "location": "Hatta",
                "isActive": true
            }
        })))
        .expect(1)
        .mount(&harness.server)
        .await;

    let community = harness
        .client
        .communities()
        .create(&CommunityDraft {
            title: Some("Hatta Trail Crew".to_string()),
            kind: Some("club".to_string()),
            category: Some(vec!["mtb".to_string()]),
            location: Some("Hatta".to_string()),
            is_active: Some(true),
            ..CommunityDraft::default()
        })
        .await
        .unwrap();

    assert_eq!(community.id, "c5");
    assert!(community.is_active);
}

#[tokio::test]
async fn test_missing_resource_is_http_error() {
    let harness = logged_in().await;

    Mock::given(method("GET"))
        .and(path("/v1/communities/nope"))
        .respond_with(
            ResponseTemplate::new(404)
                .set_body_json(json!({"success": false, "message": "Community not found"})),
        )
        .expect(1)
        .mount(&harness.server)
        .await;

    let err = harness.client.communities().get("nope").await.unwrap_err();

    assert_eq!(
        err,
        peloton::error::PelotonError::Http {
            status: 404,
            message: "Community not found".to_string()
        }
    );
}
