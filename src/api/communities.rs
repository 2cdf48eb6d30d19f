//! Rider communities.

use serde::{Deserialize, Serialize};

use super::client::{ApiClient, ApiRequest};
use super::envelope::Page;
use crate::error::PelotonResult;

const COMMUNITIES_PATH: &str = "/v1/communities";

/// A community as stored by the backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Community {
    #[serde(rename = "_id", alias = "id", default)]
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub category: Vec<String>,
    #[serde(default)]
    pub location: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub track_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub terrain: Option<String>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub associated_teams: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,
    #[serde(default)]
    pub featured: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manager: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

/// Fields sent when creating or patching a community. Unset fields are omitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommunityDraft {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub track_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terrain: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
}

/// Community endpoints, borrowed from an [`ApiClient`].
#[derive(Clone, Copy)]
pub struct Communities<'a> {
    client: &'a ApiClient,
}

impl ApiClient {
    /// Returns the community endpoints.
    #[must_use]
    pub fn communities(&self) -> Communities<'_> {
        Communities { client: self }
    }
}

impl Communities<'_> {
    /// Lists one page of communities.
    ///
    /// # Errors
    ///
    /// Returns the backend error or the refresh error.
    pub async fn list(self, page: u32, limit: u32) -> PelotonResult<Page<Community>> {
        let request = ApiRequest::get(COMMUNITIES_PATH)
            .query("page", page)
            .query("limit", limit);
        self.client.send(request).await?.into_data()
    }

    /// Fetches one community.
    ///
    /// # Errors
    ///
    /// Returns the backend error or the refresh error.
    pub async fn get(self, id: &str) -> PelotonResult<Community> {
        self.client.get(&community_path(id)).await
    }

    /// Creates a community.
    ///
    /// # Errors
    ///
    /// Returns `PayloadTooLarge` if the image exceeds the server limit.
    pub async fn create(self, draft: &CommunityDraft) -> PelotonResult<Community> {
        self.client.post(COMMUNITIES_PATH, draft).await
    }

    /// Patches a community.
    ///
    /// # Errors
    ///
    /// Returns `PayloadTooLarge` if the image exceeds the server limit.
    pub async fn update(self, id: &str, draft: &CommunityDraft) -> PelotonResult<Community> {
        self.client.patch(&community_path(id), draft).await
    }

    /// Deletes a community.
    ///
    /// # Errors
    ///
    /// Returns the backend error or the refresh error.
    pub async fn delete(self, id: &str) -> PelotonResult<()> {
        self.client.delete(&community_path(id)).await
    }
}

fn community_path(id: &str) -> String {
    format!("{COMMUNITIES_PATH}/{}", urlencoding::encode(id))
}
