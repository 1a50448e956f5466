/// A guild role carrying an allow/deny permission pair, stored as signed
/// BIGINT bitfields.
///
/// `position` is the role's rank: HIGHER position = HIGHER priority. The
/// resolver applies roles in ascending position order so the most senior
/// role's bits land last and win ties. The guild owner outranks every
/// position; a member with no roles sits at the `@everyone` base.
#[derive(Debug, Clone)]
pub struct RoleRow {
    pub id: String,
    pub guild_id: String,
    pub name: String,
    pub position: i64,
    pub allow: i64,
    pub deny: i64,
}
