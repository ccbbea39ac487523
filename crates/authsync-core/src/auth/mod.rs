//! Authentication module for sessions, credentials, and cross-tab sync.
//!
//! This module provides:
//! - `CredentialStore`: access/refresh token persistence over a `CookieStore`
//! - `Session`: the signed-in user, sign-in/sign-out, startup restore
//! - `AuthNotifier`: sign-in/sign-out broadcast to the other tabs, in-process or
//!   across processes through `FileBroadcastChannel`
//! - `validate_user_permissions`: permission and role checks
//! - `with_ssr_auth`: guard for server-rendered requests
//!
//! Tokens are stored for 30 days under the root path.

pub mod channel;
pub mod context;
pub mod cookies;
pub mod credentials;
pub mod guard;
pub mod permissions;
pub mod session;

pub use channel::{
    AuthEvent, AuthNotifier, BroadcastChannel, FileBroadcastChannel, LocalBroadcastChannel,
    LocalBroadcastHub,
};
pub use context::{sign_out, ExecutionContext, Navigator};
pub use cookies::{CookieOptions, CookieStore, FileCookieStore, KeyringCookieStore, MemoryCookieStore};
pub use credentials::CredentialStore;
pub use guard::{with_ssr_auth, RequestContext, ServerSideResult};
pub use permissions::validate_user_permissions;
pub use session::Session;
