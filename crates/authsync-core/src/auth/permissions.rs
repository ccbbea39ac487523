//! Permission and role checks for the signed-in user.

use crate::models::User;

/// Check that `user` holds every required permission and every required role.
///
/// An absent user fails unconditionally. Empty requirement lists impose no
/// constraint. Membership is exact string equality, no wildcards.
pub fn validate_user_permissions(
    user: Option<&User>,
    permissions: &[&str],
    roles: &[&str],
) -> bool {
    let Some(user) = user else {
        return false;
    };

    if !permissions.iter().all(|p| user.has_permission(p)) {
        return false;
    }

    roles.iter().all(|r| user.has_role(r))
}
