//! Response envelope shared by every backend endpoint.
//!
//! ```json
//! { "success": true, "message": "Events fetched", "data": { ... } }
//! ```
//!
//! List endpoints put a [`Page`] in `data`.

use serde::{Deserialize, Serialize};

/// The `{ success, message, data }` wrapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope<T> {
    #[serde(default = "default_success")]
    pub success: bool,
    #[serde(default)]
    pub message: String,
    pub data: T,
}

fn default_success() -> bool {
    true
}

/// Page position reported by list endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    #[serde(default)]
    pub page: u32,
    #[serde(default)]
    pub limit: u32,
    #[serde(default)]
    pub total: u64,
    #[serde(default, alias = "pages")]
    pub total_pages: u32,
}

impl Pagination {
    /// Returns true if a later page exists.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.page < self.total_pages
    }
}

/// One page of a list endpoint.
///
/// Backends name the list after the resource; all of those spellings land in
/// `items`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    #[serde(
        alias = "events",
        alias = "communities",
        alias = "tracks",
        alias = "users"
    )]
    pub items: Vec<T>,
    #[serde(default)]
    pub pagination: Pagination,
}
