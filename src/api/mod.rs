//! Console backend API.
//!
//! [`ApiClient`] is the only way requests reach the backend. It keeps the
//! session alive transparently; the endpoint modules build on it.

pub mod auth;
pub mod client;
pub mod communities;
pub mod envelope;
pub mod events;

pub use auth::{Gender, HttpRefreshTransport, RegisterUser, UserProfile};
pub use client::{ApiClient, ApiRequest, ApiResponse, Attempt, DEFAULT_AUTH_PATH};
pub use envelope::{Envelope, Page, Pagination};
