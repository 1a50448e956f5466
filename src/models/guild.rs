#[derive(Debug, Clone)]
pub struct GuildRow {
    pub id: String,
    pub name: String,
    pub owner_id: String,
    /// The `@everyone` base bitfield, stored as a signed BIGINT.
    pub default_permissions: i64,
}
