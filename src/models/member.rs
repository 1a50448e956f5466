#[derive(Debug, Clone)]
pub struct MemberRow {
    pub user_id: String,
    pub guild_id: String,
    pub nickname: Option<String>,
    pub joined_at: String,
    /// RFC 3339; the member is under an active moderation timeout while this
    /// lies in the future.
    pub timeout_until: Option<String>,
}
