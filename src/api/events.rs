//! Cycling events.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::client::{ApiClient, ApiRequest};
use super::envelope::Page;
use crate::error::PelotonResult;

const EVENTS_PATH: &str = "/v1/events";

/// Lifecycle state of an event. Records without one are treated as upcoming.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EventStatus {
    #[default]
    #[serde(rename = "upcoming")]
    Upcoming,
    #[serde(rename = "ongoing")]
    Ongoing,
    #[serde(rename = "completed")]
    Completed,
    #[serde(rename = "cancelled", alias = "Cancelled")]
    Cancelled,
    #[serde(rename = "Draft")]
    Draft,
    #[serde(rename = "Published")]
    Published,
}

impl EventStatus {
    /// Returns the wire spelling.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upcoming => "upcoming",
            Self::Ongoing => "ongoing",
            Self::Completed => "completed",
            Self::Cancelled => "cancelled",
            Self::Draft => "Draft",
            Self::Published => "Published",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl std::str::FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "upcoming" => Ok(Self::Upcoming),
            "ongoing" => Ok(Self::Ongoing),
            "completed" => Ok(Self::Completed),
            "cancelled" => Ok(Self::Cancelled),
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            other => Err(format!("unknown event status '{other}'")),
        }
    }
}

/// An event as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "_id", alias = "id", default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_image: Option<String>,
    #[serde(default)]
    pub event_date: String,
    #[serde(default)]
    pub event_time: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub max_participants: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub youtube_link: Option<String>,
    #[serde(default)]
    pub status: EventStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub views: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registrations: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shares: Option<u64>,
    #[serde(default)]
    pub featured: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registration_open: Option<bool>,
}

/// Fields sent when creating or patching an event. Unset fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub main_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_time: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_participants: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_age: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_age: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub youtube_link: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<EventStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub featured: Option<bool>,
}

/// Filter and page selection for listing events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EventQuery {
    pub status: Option<EventStatus>,
    pub page: u32,
    pub limit: u32,
}

impl Default for EventQuery {
    fn default() -> Self {
        Self {
            status: None,
            page: 1,
            limit: 10,
        }
    }
}

/// Event endpoints, borrowed from an [`ApiClient`].
#[derive(Clone, Copy)]
pub struct Events<'a> {
    client: &'a ApiClient,
}

impl ApiClient {
    /// Returns the event endpoints.
    #[must_use]
    pub fn events(&self) -> Events<'_> {
        Events { client: self }
    }
}

impl Events<'_> {
    /// Lists one page of events.
    ///
    /// # Errors
    ///
    /// Returns the backend error or the refresh error.
    pub async fn list(self, query: EventQuery) -> PelotonResult<Page<Event>> {
        let mut request = ApiRequest::get(EVENTS_PATH)
            .query("page", query.page)
            .query("limit", query.limit);
        if let Some(status) = query.status {
            request = request.query("status", status);
        }
        self.client.send(request).await?.into_data()
    }

    /// Fetches one event.
    ///
    /// # Errors
    ///
    /// Returns the backend error or the refresh error.
    pub async fn get(self, id: &str) -> PelotonResult<Event> {
        self.client.get(&event_path(id)).await
    }

    /// Creates an event.
    ///
    /// # Errors
    ///
    /// Returns `PayloadTooLarge` if the images exceed the server limit.
    pub async fn create(self, draft: &EventDraft) -> PelotonResult<Event> {
        self.client.post(EVENTS_PATH, draft).await
    }

    /// Patches an event.
    ///
    /// # Errors
    ///
    /// Returns `PayloadTooLarge` if the images exceed the server limit.
    pub async fn update(self, id: &str, draft: &EventDraft) -> PelotonResult<Event> {
        self.client.patch(&event_path(id), draft).await
    }

    /// Deletes an event.
    ///
    /// # Errors
    ///
    /// Returns the backend error or the refresh error.
    pub async fn delete(self, id: &str) -> PelotonResult<()> {
        self.client.delete(&event_path(id)).await
    }
}

fn event_path(id: &str) -> String {
    format!("{EVENTS_PATH}/{}", urlencoding::encode(id))
}
