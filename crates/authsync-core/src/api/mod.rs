//! HTTP client module for the authentication service and protected API.
//!
//! - `ApiClient`: authenticated requests with transparent token renewal
//! - `RenewalCoordinator`: one renewal shared by all concurrently expired requests
//! - `Transport`: the pluggable HTTP pipeline (`ReqwestTransport` by default)

pub mod client;
pub mod error;
pub mod renewal;
pub mod transport;

pub use client::ApiClient;
pub use error::{ApiError, TOKEN_EXPIRED_CODE};
pub use renewal::RenewalCoordinator;
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};
