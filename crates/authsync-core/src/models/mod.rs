//! Data models shared by the session, client, and guard layers.
//!
//! - `User`: the signed-in user with permissions and roles
//! - `Credentials`: email/password sent to the sessions endpoint
//! - `TokenPair`, `SessionResponse`, `RefreshRequest`: authentication wire types

pub mod session;
pub mod user;

pub use session::{Credentials, RefreshRequest, SessionResponse, TokenPair};
pub use user::User;
