//! Access control for incoming updates.

/// Whether a user may talk to the bot. An empty allowlist admits everyone;
/// updates without a sender are always rejected.
pub fn is_authorized(user_id: Option<i64>, allowed_users: &[i64]) -> bool {
    let Some(user_id) = user_id else {
        return false;
    };
    if allowed_users.is_empty() {
        return true;
    }
    allowed_users.contains(&user_id)
}
