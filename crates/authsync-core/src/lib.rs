//! authsync core library.
//!
//! Client-side authentication session management: an access/refresh token
//! pair kept in cookie-style storage, an API client that renews expired
//! access tokens once for all concurrently failing requests, session state
//! kept consistent across tabs, and a guard for server-rendered requests.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError};
pub use auth::{Session, ServerSideResult};
pub use config::AuthConfig;
pub use models::User;
