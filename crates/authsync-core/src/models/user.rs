use serde::{Deserialize, Serialize};

#[cfg(feature = "ts")]
use ts_rs::TS;

/// The authenticated user as reported by the authentication service.
///
/// Replaced wholesale on sign-in or profile refresh, never edited in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "ts", derive(TS), ts(export))]
pub struct User {
    pub email: String,
    #[serde(default)]
    pub permissions: Vec<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl User {
    pub fn new(email: impl Into<String>, permissions: Vec<String>, roles: Vec<String>) -> Self {
        Self {
            email: email.into(),
            permissions,
            roles,
        }
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_parses_me_response() {
        let json = r#"{"email":"diego@rocketseat.team","permissions":["users.list","users.create"],"roles":["administrator"]}"#;
        let user: User = serde_json::from_str(json).expect("Failed to parse user JSON");

        assert_eq!(user.email, "diego@rocketseat.team");
        assert!(user.has_permission("users.create"));
        assert!(!user.has_permission("users.edit"));
        assert!(user.has_role("administrator"));
    }

    #[test]
    fn test_user_missing_lists_default_to_empty() {
        let user: User = serde_json::from_str(r#"{"email":"a@b.c"}"#).expect("Failed to parse user JSON");
        assert!(user.permissions.is_empty());
        assert!(user.roles.is_empty());
    }

    #[test]
    fn test_membership_is_exact() {
        let user = User::new("a@b.c", vec!["users.create".to_string()], vec![]);
        assert!(!user.has_permission("users"));
        assert!(!user.has_permission("users.*"));
        assert!(!user.has_permission("USERS.CREATE"));
    }
}
