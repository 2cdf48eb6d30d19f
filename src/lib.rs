//! Peloton - session-continuity client for the cycling-community admin console
//!
//! Keeps an authenticated session to the console backend alive: tokens are
//! renewed ahead of expiry, concurrent renewals collapse into one call, and
//! requests refused for a stale token are replayed once after a refresh.
//!
//! This library exposes the client, the auth flows and the backend resources;
//! the `peloton` binary is a thin CLI on top of it.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod roles;
pub mod util;

// Re-export core types for convenient access
pub use api::ApiClient;
pub use auth::{AuthManager, Session};
pub use config::Config;
pub use error::{PelotonError, PelotonResult};
pub use roles::{Role, Section};
