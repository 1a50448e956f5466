#[derive(Debug, Clone)]
pub struct ChannelRow {
    pub id: String,
    pub guild_id: String,
    pub name: String,
    /// `"text"` or `"voice"`.
    pub kind: String,
}
