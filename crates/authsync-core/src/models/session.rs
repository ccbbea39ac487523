use serde::{Deserialize, Serialize};

use super::User;

/// Email and password posted to the session-creation endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            email: email.into(),
            password: password.into(),
        }
    }
}

/// Access and refresh tokens as issued by `POST /sessions` or `POST /refresh`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenPair {
    #[serde(rename = "token")]
    pub access_token: String,
    #[serde(rename = "refreshToken")]
    pub refresh_token: String,
}

/// Body of a successful `POST /sessions`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionResponse {
    #[serde(flatten)]
    pub tokens: TokenPair,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl SessionResponse {
    /// The sessions endpoint does not echo the email, so it comes from the request.
    pub fn into_user(self, email: &str) -> (TokenPair, User) {
        let user = User::new(email, self.permissions, self.roles);
        (self.tokens, user)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshRequest<'a> {
    #[serde(rename = "refreshToken")]
    pub refresh_token: &'a str,
}
